//! Greedy best-first search over action sequences.
//!
//! Every popped candidate is rejected (constraint violated), accepted (long
//! enough) or expanded into four children. The frontier and accepted set are
//! owned by [`SearchState`] and handed to [`run_search`] explicitly.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::action::action_codes;
use crate::candidate::{Candidate, CandidateState};
use crate::checkpoint::{CheckpointFile, save_checkpoint};
use crate::error::Result;
use crate::evaluate::RolloutConfig;
use crate::frontier::{Frontier, SearchOrder};
use crate::sim::SimulatorFactory;

/// ~600 simulation steps.
pub const DEFAULT_ACCEPT_LENGTH: usize = 100;
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_MAX_FRONTIER: usize = 1_000_000;

#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub accept_length: usize,
    pub order: SearchOrder,
    /// Frontier capacity; the worst candidate is evicted past it.
    pub max_frontier: Option<usize>,
    /// Stop after this many expansions.
    pub max_expansions: Option<u64>,
    /// Wall-clock period between checkpoints; `None` writes only the final one.
    pub checkpoint_interval: Option<Duration>,
    /// Where checkpoints go; `None` disables them.
    pub checkpoint_dir: Option<PathBuf>,
    pub rollout: RolloutConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            accept_length: DEFAULT_ACCEPT_LENGTH,
            order: SearchOrder::BestFirst,
            max_frontier: Some(DEFAULT_MAX_FRONTIER),
            max_expansions: None,
            checkpoint_interval: Some(DEFAULT_CHECKPOINT_INTERVAL),
            checkpoint_dir: None,
            rollout: RolloutConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    FrontierExhausted,
    ExpansionLimit,
    Interrupted,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchReport {
    pub popped: u64,
    pub expanded: u64,
    pub rejected: u64,
    pub accepted: u64,
    pub evicted: u64,
    pub checkpoints_written: u64,
    pub stop_reason: Option<StopReason>,
}

/// The open frontier and the accepted set.
#[derive(Clone, Debug)]
pub struct SearchState {
    pub frontier: Frontier,
    pub accepted: Frontier,
}

impl SearchState {
    pub fn empty(config: &SearchConfig) -> Self {
        Self {
            frontier: Frontier::bounded(config.order, config.max_frontier),
            accepted: Frontier::new(SearchOrder::BestFirst),
        }
    }

    /// Frontier holding the four single-action sequences.
    pub fn seeded<F: SimulatorFactory>(factory: &F, config: &SearchConfig) -> Result<Self> {
        let mut state = Self::empty(config);
        for seed in Candidate::seeds(factory, &config.rollout)? {
            state.frontier.push(seed);
        }
        Ok(state)
    }

    /// Restores both collections from a checkpoint, keeping its best-first
    /// listing order.
    pub fn from_checkpoint(file: CheckpointFile, config: &SearchConfig) -> Self {
        Self {
            frontier: Frontier::from_candidates(config.order, config.max_frontier, file.frontier),
            accepted: Frontier::from_candidates(SearchOrder::BestFirst, None, file.accepted),
        }
    }
}

/// Runs until the frontier empties, `max_expansions` is reached or `stop` is
/// raised, then writes a final checkpoint when a directory is configured.
pub fn run_search<F: SimulatorFactory>(
    factory: &F,
    config: &SearchConfig,
    state: &mut SearchState,
    stop: &AtomicBool,
) -> Result<SearchReport> {
    let mut report = SearchReport::default();
    let mut last_checkpoint = Instant::now();
    let evicted_before = state.frontier.evicted();

    info!(
        "search started: frontier={}, accepted={}, accept_length={}, order={:?}, max_frontier={:?}",
        state.frontier.len(),
        state.accepted.len(),
        config.accept_length,
        config.order,
        config.max_frontier
    );

    let stop_reason = loop {
        if stop.load(Ordering::Relaxed) {
            break StopReason::Interrupted;
        }
        if config
            .max_expansions
            .is_some_and(|limit| report.expanded >= limit)
        {
            break StopReason::ExpansionLimit;
        }
        if let (Some(interval), Some(dir)) = (config.checkpoint_interval, &config.checkpoint_dir) {
            if last_checkpoint.elapsed() >= interval {
                last_checkpoint = Instant::now();
                report.evicted = state.frontier.evicted() - evicted_before;
                match save_checkpoint(dir, state, &report, Some("periodic")) {
                    Ok(saved) => {
                        report.checkpoints_written += 1;
                        info!("checkpoint written: id={}", saved.id);
                    }
                    Err(err) => warn!("periodic checkpoint failed: {err}"),
                }
                log_search_summary(state);
            }
        }

        let Some(candidate) = state.frontier.pop() else {
            break StopReason::FrontierExhausted;
        };
        report.popped += 1;

        match candidate.classify(config.accept_length) {
            CandidateState::Rejected => {
                report.rejected += 1;
                debug!(
                    "rejected: len={}, score={:.4}, violation={:?}",
                    candidate.len(),
                    candidate.score(),
                    candidate.evaluation().violation
                );
            }
            CandidateState::Accepted => {
                report.accepted += 1;
                info!(
                    "accepted: len={}, score={:.4}, distance={:.3}m",
                    candidate.len(),
                    candidate.score(),
                    candidate.evaluation().distance
                );
                state.accepted.push(candidate);
            }
            CandidateState::Expanded => {
                report.expanded += 1;
                for child in candidate.children(factory, &config.rollout)? {
                    state.frontier.push(child);
                }
            }
        }
    };

    report.evicted = state.frontier.evicted() - evicted_before;
    report.stop_reason = Some(stop_reason);
    info!(
        "search finished: reason={stop_reason:?}, popped={}, expanded={}, rejected={}, accepted={}, evicted={}",
        report.popped, report.expanded, report.rejected, report.accepted, report.evicted
    );

    if let Some(dir) = &config.checkpoint_dir {
        report.checkpoints_written += 1;
        let saved = save_checkpoint(dir, state, &report, Some("final"))?;
        info!("final checkpoint written: {}", saved.path.display());
    }
    log_search_summary(state);
    Ok(report)
}

/// Logs the size of both collections and the best candidate in each.
pub fn log_search_summary(state: &SearchState) {
    info!(
        "{} open candidates | {} accepted candidates",
        state.frontier.len(),
        state.accepted.len()
    );
    if let Some(best) = state.frontier.peek() {
        log_candidate("best open", best);
    }
    if let Some(best) = state.accepted.peek() {
        log_candidate("best accepted", best);
    }
}

fn log_candidate(label: &str, candidate: &Candidate) {
    let evaluation = candidate.evaluation();
    info!(
        "{label}: len={}, score={:.4}, distance={:.3}m, head_angle_error={:.4}, constraint={}, actions={:?}",
        candidate.len(),
        evaluation.score,
        evaluation.distance,
        evaluation.head_angle_error,
        evaluation.constraint_violated,
        action_codes(candidate.actions())
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, Actuator};
    use crate::sim::{BodyPart, Simulator};

    /// Thigh actions step forward; calf actions step backward.
    struct Corridor {
        x: f32,
    }

    impl Simulator for Corridor {
        fn character_position(&self) -> Result<[f32; 2]> {
            Ok([self.x, 1.0])
        }

        fn body_part_position(&self, part: BodyPart) -> Result<[f32; 2]> {
            Ok(match part {
                BodyPart::Torso => [self.x, 1.0],
                BodyPart::Head => [self.x, 2.0],
            })
        }

        fn apply(&mut self, actuator: Actuator, command: f32) {
            match actuator {
                Actuator::ThighLeft if command > 0.0 => self.x += 0.5,
                Actuator::ThighLeft => self.x += 0.1,
                Actuator::CalfLeft => self.x -= 1.0,
                _ => {}
            }
        }

        fn step(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn corridor() -> Result<Corridor> {
        Ok(Corridor { x: 0.0 })
    }

    fn config(accept_length: usize) -> SearchConfig {
        SearchConfig {
            accept_length,
            checkpoint_interval: None,
            ..SearchConfig::default()
        }
    }

    #[test]
    fn greedy_search_finds_the_fastest_gait_first() {
        let config = config(4);
        let mut state = SearchState::seeded(&corridor, &config).unwrap();
        let report = run_search(&corridor, &config, &mut state, &AtomicBool::new(false)).unwrap();

        assert_eq!(report.stop_reason, Some(StopReason::FrontierExhausted));
        // Two of four actions walk forward, so 2^4 sequences of length 4 survive.
        assert_eq!(state.accepted.len(), 16);
        assert_eq!(report.accepted, 16);
        let best = state.accepted.peek().unwrap();
        assert_eq!(best.actions(), &[Action::ThighsForward; 4]);
        assert!(state.frontier.is_empty());
        assert_eq!(report.popped, report.expanded + report.rejected + report.accepted);
    }

    #[test]
    fn expansion_limit_stops_early() {
        let config = SearchConfig {
            max_expansions: Some(3),
            ..config(50)
        };
        let mut state = SearchState::seeded(&corridor, &config).unwrap();
        let report = run_search(&corridor, &config, &mut state, &AtomicBool::new(false)).unwrap();
        assert_eq!(report.stop_reason, Some(StopReason::ExpansionLimit));
        assert_eq!(report.expanded, 3);
        // Greedy descent: each expansion follows the thighs-forward branch.
        assert_eq!(state.frontier.peek().unwrap().actions(), &[Action::ThighsForward; 4]);
    }

    #[test]
    fn raised_stop_flag_interrupts_before_popping() {
        let config = config(50);
        let mut state = SearchState::seeded(&corridor, &config).unwrap();
        let report = run_search(&corridor, &config, &mut state, &AtomicBool::new(true)).unwrap();
        assert_eq!(report.stop_reason, Some(StopReason::Interrupted));
        assert_eq!(report.popped, 0);
        assert_eq!(state.frontier.len(), 4);
    }

    #[test]
    fn bounded_frontier_counts_evictions() {
        let config = SearchConfig {
            max_frontier: Some(5),
            max_expansions: Some(10),
            ..config(50)
        };
        let mut state = SearchState::seeded(&corridor, &config).unwrap();
        let report = run_search(&corridor, &config, &mut state, &AtomicBool::new(false)).unwrap();
        assert!(state.frontier.len() <= 5);
        assert!(report.evicted > 0);
        assert_eq!(report.evicted, state.frontier.evicted());
    }
}
