//! Scoring an action sequence by replaying it through a fresh simulator.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, FRAC_PI_6};

use serde::{Deserialize, Serialize};

use crate::action::{ACTION_REPEAT, Action};
use crate::error::{Result, SearchError};
use crate::sim::{BodyPart, Simulator, SimulatorFactory};

const DISTANCE_WEIGHT: f32 = 20.0;
/// Head-bob tolerance around upright before the character counts as fallen.
const HEAD_BOB_TOLERANCE: f32 = FRAC_PI_4;
/// Errors inside this band are halved.
const SOFT_ANGLE_BAND: f32 = FRAC_PI_6;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackwardReference {
    /// Compare against the position after the previous action.
    #[default]
    PreviousAction,
    /// Compare against the starting position. The reference never advances,
    /// so a gait may give ground between actions as long as it stays ahead
    /// of where it started.
    Origin,
}

#[derive(Clone, Debug, Default)]
pub struct RolloutConfig {
    pub backward_reference: BackwardReference,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCause {
    Fallen,
    MovingBackward,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub cause: ViolationCause,
    /// Index of the action after which the rollout stopped.
    pub action_index: usize,
}

/// State measured after one action's repetitions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActionOutcome {
    pub distance: f32,
    pub raw_head_angle_error: f32,
    pub head_angle_error: f32,
    pub violation: Option<ViolationCause>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: f32,
    pub constraint_violated: bool,
    pub distance: f32,
    pub head_angle_error: f32,
    #[serde(default)]
    pub violation: Option<Violation>,
}

/// `-20 * (distance / len)^2 + error^2`; lower is better.
pub fn score(distance: f32, head_angle_error: f32, sequence_len: usize) -> f32 {
    let pace = distance / sequence_len.max(1) as f32;
    -DISTANCE_WEIGHT * pace * pace + head_angle_error * head_angle_error
}

pub fn soften_angle_error(raw: f32) -> f32 {
    if raw.abs() < SOFT_ANGLE_BAND {
        raw / 2.0
    } else {
        raw
    }
}

pub fn is_fallen(raw_head_angle_error: f32) -> bool {
    raw_head_angle_error.abs() > HEAD_BOB_TOLERANCE
}

/// Head tilt relative to upright: the torso-to-head direction minus PI/2.
pub fn head_angle_error<S: Simulator>(sim: &S) -> Result<f32> {
    let head = sim.body_part_position(BodyPart::Head)?;
    let torso = sim.body_part_position(BodyPart::Torso)?;
    let angle = (head[1] - torso[1]).atan2(head[0] - torso[0]);
    Ok(angle - FRAC_PI_2)
}

/// Incremental replay of an action sequence from the simulator's initial
/// state. [`evaluate`] drives one of these to completion.
pub struct Rollout<S: Simulator> {
    sim: S,
    origin_x: f32,
    reference_x: f32,
    backward_reference: BackwardReference,
    actions_applied: usize,
}

impl<S: Simulator> Rollout<S> {
    pub fn new(sim: S, config: &RolloutConfig) -> Result<Self> {
        let origin_x = sim.character_position()?[0];
        Ok(Self {
            sim,
            origin_x,
            reference_x: origin_x,
            backward_reference: config.backward_reference,
            actions_applied: 0,
        })
    }

    pub fn actions_applied(&self) -> usize {
        self.actions_applied
    }

    pub fn simulator(&self) -> &S {
        &self.sim
    }

    pub fn advance(&mut self, action: Action) -> Result<ActionOutcome> {
        for _ in 0..ACTION_REPEAT {
            for (actuator, command) in action.force_pair() {
                self.sim.apply(actuator, command);
            }
            self.sim.step()?;
        }
        self.actions_applied += 1;

        let x = self.sim.character_position()?[0];
        let raw = head_angle_error(&self.sim)?;
        let violation = if is_fallen(raw) {
            Some(ViolationCause::Fallen)
        } else if x - self.reference_x < 0.0 {
            Some(ViolationCause::MovingBackward)
        } else {
            None
        };
        if self.backward_reference == BackwardReference::PreviousAction {
            self.reference_x = x;
        }

        Ok(ActionOutcome {
            distance: x - self.origin_x,
            raw_head_angle_error: raw,
            head_angle_error: soften_angle_error(raw),
            violation,
        })
    }
}

/// Replays `actions` from scratch and scores the result, stopping at the first
/// action after which the character has fallen or moved backward.
pub fn evaluate<F: SimulatorFactory>(
    factory: &F,
    config: &RolloutConfig,
    actions: &[Action],
) -> Result<Evaluation> {
    if actions.is_empty() {
        return Err(SearchError::EmptySequence);
    }

    let mut rollout = Rollout::new(factory.create()?, config)?;
    let mut last = None;
    for (index, &action) in actions.iter().enumerate() {
        let outcome = rollout.advance(action)?;
        if let Some(cause) = outcome.violation {
            return Ok(Evaluation {
                score: score(outcome.distance, outcome.head_angle_error, actions.len()),
                constraint_violated: true,
                distance: outcome.distance,
                head_angle_error: outcome.head_angle_error,
                violation: Some(Violation {
                    cause,
                    action_index: index,
                }),
            });
        }
        last = Some(outcome);
    }

    let outcome = last.ok_or(SearchError::EmptySequence)?;
    Ok(Evaluation {
        score: score(outcome.distance, outcome.head_angle_error, actions.len()),
        constraint_violated: false,
        distance: outcome.distance,
        head_angle_error: outcome.head_angle_error,
        violation: None,
    })
}
