pub mod action;
pub mod candidate;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod frontier;
pub mod replay;
pub mod search;
pub mod sim;

pub use action::{Action, Actuator};
pub use candidate::{Candidate, CandidateState};
pub use error::{Result, SearchError};
pub use evaluate::{Evaluation, RolloutConfig, evaluate};
pub use frontier::{Frontier, SearchOrder};
pub use search::{SearchConfig, SearchReport, SearchState, StopReason, run_search};
pub use sim::{Ragdoll, RagdollFactory, Simulator, SimulatorFactory};
