use thiserror::Error;

use super::events::NodeEvent;
use super::states::{NodeState, Stage};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("illegal transition from {from} on {event:?}")]
    InvalidTransition { from: NodeState, event: NodeEvent },

    #[error("stage {stage} does not belong to state {state}")]
    StageMismatch { state: NodeState, stage: Stage },

    #[error("internal state machine error: {0}")]
    Internal(String),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
