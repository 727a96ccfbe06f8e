//! Simulator seam.
//!
//! The search only ever talks to a [`Simulator`]: it reads positions, issues
//! muscle commands and advances time. [`Ragdoll`] is the physics-backed
//! implementation; tests plug in lightweight scripted ones.

mod ragdoll;

use serde::Serialize;

use crate::action::Actuator;
use crate::error::Result;

pub use ragdoll::{FIXED_SIM_DT, Ragdoll, RagdollConfig, RagdollFactory};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyPart {
    Head,
    Torso,
}

pub trait Simulator {
    /// Planar position of the character (x forward, y up).
    fn character_position(&self) -> Result<[f32; 2]>;

    fn body_part_position(&self, part: BodyPart) -> Result<[f32; 2]>;

    /// Queues a command for the next [`Simulator::step`]. Commands do not
    /// persist past that step.
    fn apply(&mut self, actuator: Actuator, command: f32);

    fn step(&mut self) -> Result<()>;
}

/// Builds fresh simulators in their initial state.
pub trait SimulatorFactory {
    type Sim: Simulator;

    fn create(&self) -> Result<Self::Sim>;
}

impl<S, F> SimulatorFactory for F
where
    S: Simulator,
    F: Fn() -> Result<S>,
{
    type Sim = S;

    fn create(&self) -> Result<S> {
        self()
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyPoseSnapshot {
    pub p: [f32; 3],
    pub q: [f32; 4],
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFrame {
    pub time: f32,
    pub distance: f32,
    pub bodies: Vec<BodyPoseSnapshot>,
}
