use std::sync::atomic::AtomicBool;

use anyhow::{Result, anyhow};
use qwop_search::action::parse_actions;
use qwop_search::evaluate::{Rollout, RolloutConfig, evaluate};
use qwop_search::sim::{Ragdoll, RagdollFactory, SimulatorFactory};
use qwop_search::{
    Action, Candidate, CandidateState, SearchConfig, SearchState, StopReason, run_search,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn random_actions(rng: &mut SmallRng, len: usize) -> Result<Vec<Action>> {
    let codes: Vec<u8> = (0..len).map(|_| rng.random_range(0..4u8)).collect();
    Ok(parse_actions(&codes)?)
}

/// First single-action sequence that neither falls nor moves backward.
fn surviving_seed(factory: &RagdollFactory) -> Result<Candidate> {
    Candidate::seeds(factory, &RolloutConfig::default())?
        .into_iter()
        .find(|seed| !seed.is_rejected())
        .ok_or_else(|| anyhow!("every seed violated the walking constraint"))
}

#[test]
fn a_seed_survives_its_first_action() -> Result<()> {
    let factory = RagdollFactory::default();
    let seed = surviving_seed(&factory)?;
    let evaluation = seed.evaluation();
    assert!(evaluation.violation.is_none());
    assert!(evaluation.distance >= 0.0, "distance={}", evaluation.distance);
    assert!(evaluation.head_angle_error.abs() < std::f32::consts::FRAC_PI_4);
    Ok(())
}

#[test]
fn short_search_expands_on_the_ragdoll() -> Result<()> {
    let factory = RagdollFactory::default();
    let config = SearchConfig {
        max_expansions: Some(1),
        checkpoint_interval: None,
        ..SearchConfig::default()
    };
    let mut state = SearchState::seeded(&factory, &config)?;
    let report = run_search(&factory, &config, &mut state, &AtomicBool::new(false))?;
    assert_eq!(report.expanded, 1, "{report:?}");
    assert_eq!(report.stop_reason, Some(StopReason::ExpansionLimit));
    assert!(state.frontier.iter().any(|candidate| candidate.len() == 2));
    Ok(())
}

#[test]
fn evaluation_is_deterministic() -> Result<()> {
    let factory = RagdollFactory::default();
    let config = RolloutConfig::default();
    let actions = parse_actions(&[0, 2, 1, 3, 0, 0])?;

    let first = evaluate(&factory, &config, &actions)?;
    let second = evaluate(&factory, &config, &actions)?;
    assert_eq!(first, second);
    assert_eq!(first.score.to_bits(), second.score.to_bits());
    Ok(())
}

#[test]
fn extending_a_sequence_replays_its_prefix_exactly() -> Result<()> {
    let factory = RagdollFactory::default();
    let config = RolloutConfig::default();
    let first = surviving_seed(&factory)?.actions()[0];
    let single = evaluate(&factory, &config, &[first])?;

    let mut rollout: Rollout<Ragdoll> = Rollout::new(factory.create()?, &config)?;
    let after_first = rollout.advance(first)?;
    assert_eq!(after_first.distance, single.distance);
    assert_eq!(after_first.head_angle_error, single.head_angle_error);
    assert!(after_first.violation.is_none());

    for next in Action::ALL {
        let pair = evaluate(&factory, &config, &[first, next])?;
        let mut replay: Rollout<Ragdoll> = Rollout::new(factory.create()?, &config)?;
        assert_eq!(replay.advance(first)?, after_first);
        let after_second = replay.advance(next)?;
        assert_eq!(after_second.distance, pair.distance);
        assert_eq!(after_second.head_angle_error, pair.head_angle_error);
        assert_eq!(after_second.violation.is_some(), pair.constraint_violated);
        assert_eq!(replay.actions_applied(), 2);
    }
    Ok(())
}

#[test]
fn violations_persist_under_extension() -> Result<()> {
    let factory = RagdollFactory::default();
    let config = RolloutConfig::default();
    let mut rng = SmallRng::seed_from_u64(0x5157_4f50);

    for _ in 0..12 {
        let prefix = random_actions(&mut rng, 8)?;
        let base = evaluate(&factory, &config, &prefix)?;
        let Some(violation) = base.violation else {
            continue;
        };

        let mut extended = prefix.clone();
        extended.extend(random_actions(&mut rng, 4)?);
        let longer = evaluate(&factory, &config, &extended)?;
        assert!(longer.constraint_violated);
        assert_eq!(longer.violation, Some(violation));
        assert_eq!(longer.distance, base.distance);
    }
    Ok(())
}

#[test]
fn acceptance_requires_length_and_no_violation() -> Result<()> {
    let factory = RagdollFactory::default();
    let config = RolloutConfig::default();
    let seed = surviving_seed(&factory)?;
    assert_eq!(seed.classify(1), CandidateState::Accepted);
    assert_eq!(seed.classify(2), CandidateState::Expanded);

    let mut rng = SmallRng::seed_from_u64(42);
    let accept_length = 5;

    for len in [3, 5, 7] {
        let candidate = Candidate::evaluate(&factory, &config, random_actions(&mut rng, len)?)?;
        let expected = if candidate.evaluation().constraint_violated {
            CandidateState::Rejected
        } else if len >= accept_length {
            CandidateState::Accepted
        } else {
            CandidateState::Expanded
        };
        assert_eq!(candidate.classify(accept_length), expected);
        assert_eq!(
            candidate.is_accepted(accept_length),
            expected == CandidateState::Accepted
        );
    }
    Ok(())
}

#[test]
fn seeds_cover_every_action() -> Result<()> {
    let factory = RagdollFactory::default();
    let seeds = Candidate::seeds(&factory, &RolloutConfig::default())?;
    let firsts: Vec<Action> = seeds.iter().map(|seed| seed.actions()[0]).collect();
    assert_eq!(firsts, Action::ALL.to_vec());
    assert!(seeds.iter().all(|seed| seed.len() == 1));
    assert!(seeds.iter().all(|seed| seed.score().is_finite()));
    Ok(())
}
