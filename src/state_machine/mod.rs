//! # Node State Machine
//!
//! Staged per-node progression with strict ordering, plus the stage
//! postconditions the orchestrator enforces before advancing.

pub mod errors;
pub mod events;
pub mod machine;
pub mod postconditions;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::NodeEvent;
pub use machine::NodeStateMachine;
pub use postconditions::{check_stage, PostconditionInputs, PostconditionViolation};
pub use states::{NodeState, Stage};
