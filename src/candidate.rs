use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::error::Result;
use crate::evaluate::{Evaluation, RolloutConfig, evaluate};
use crate::sim::SimulatorFactory;

/// Where a popped candidate goes next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandidateState {
    Rejected,
    Accepted,
    Expanded,
}

/// An action sequence together with the evaluation of replaying it from the
/// initial state. Fields are private so the two can never drift apart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    actions: Vec<Action>,
    evaluation: Evaluation,
}

impl Candidate {
    pub fn evaluate<F: SimulatorFactory>(
        factory: &F,
        config: &RolloutConfig,
        actions: Vec<Action>,
    ) -> Result<Self> {
        let evaluation = evaluate(factory, config, &actions)?;
        Ok(Self {
            actions,
            evaluation,
        })
    }

    /// The four single-action sequences the search starts from.
    pub fn seeds<F: SimulatorFactory>(factory: &F, config: &RolloutConfig) -> Result<Vec<Self>> {
        Action::ALL
            .iter()
            .map(|&action| Self::evaluate(factory, config, vec![action]))
            .collect()
    }

    /// One child per action, each evaluated from scratch.
    pub fn children<F: SimulatorFactory>(
        &self,
        factory: &F,
        config: &RolloutConfig,
    ) -> Result<Vec<Self>> {
        Action::ALL
            .iter()
            .map(|&action| {
                let mut actions = Vec::with_capacity(self.actions.len() + 1);
                actions.extend_from_slice(&self.actions);
                actions.push(action);
                Self::evaluate(factory, config, actions)
            })
            .collect()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn evaluation(&self) -> &Evaluation {
        &self.evaluation
    }

    pub fn score(&self) -> f32 {
        self.evaluation.score
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn is_rejected(&self) -> bool {
        self.evaluation.constraint_violated
    }

    pub fn is_accepted(&self, accept_length: usize) -> bool {
        !self.is_rejected() && self.actions.len() >= accept_length
    }

    pub fn classify(&self, accept_length: usize) -> CandidateState {
        if self.is_rejected() {
            CandidateState::Rejected
        } else if self.is_accepted(accept_length) {
            CandidateState::Accepted
        } else {
            CandidateState::Expanded
        }
    }
}
