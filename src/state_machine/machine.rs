//! Per-node staged progression.
//!
//! The transition function is pure: the orchestrator loop owns node records
//! and asks this module where an event takes the node. Strict ordering is
//! enforced here, not in the loop; an event whose stage does not match the
//! node's current state is an error, never a silent no-op.
//!
//! Success path:
//! `PENDING -> IMPLEMENTING -> LINTING -> TESTBENCHING -> SIMULATING ->
//! DISTILLING -> REFLECTING -> DONE`.
//!
//! Repair cycle (entered when simulation fails with repair budget left):
//! `SIMULATING -> DISTILLING -> REFLECTING -> DEBUGGING -> SIMULATING`.

use super::errors::{StateMachineError, StateMachineResult};
use super::events::NodeEvent;
use super::states::{NodeState, Stage};

pub struct NodeStateMachine;

impl NodeStateMachine {
    /// Compute the target state for an event.
    ///
    /// `repair_active` selects the repair branch at REFLECTING: inside a
    /// repair cycle reflection chains into debug, on the success path it
    /// completes the node.
    pub fn determine_target_state(
        current: NodeState,
        event: &NodeEvent,
        repair_active: bool,
    ) -> StateMachineResult<NodeState> {
        // Stage events must match the state the node actually occupies.
        if let Some(stage) = event.stage() {
            if current.stage() != Some(stage) {
                return Err(StateMachineError::StageMismatch {
                    state: current,
                    stage,
                });
            }
        }

        let target = match (current, event) {
            (NodeState::Pending, NodeEvent::Start) => NodeState::Implementing,

            (NodeState::Implementing, NodeEvent::StageSucceeded(_)) => NodeState::Linting,
            (NodeState::Linting, NodeEvent::StageSucceeded(_)) => NodeState::Testbenching,
            (NodeState::Testbenching, NodeEvent::StageSucceeded(_)) => NodeState::Simulating,
            (NodeState::Simulating, NodeEvent::StageSucceeded(_)) => NodeState::Distilling,
            (NodeState::Distilling, NodeEvent::StageSucceeded(_)) => NodeState::Reflecting,
            (NodeState::Reflecting, NodeEvent::StageSucceeded(_)) => {
                if repair_active {
                    NodeState::Debugging
                } else {
                    NodeState::Done
                }
            }
            (NodeState::Debugging, NodeEvent::StageSucceeded(_)) => NodeState::Simulating,

            (NodeState::Simulating, NodeEvent::EnterRepair) => NodeState::Distilling,

            (state, NodeEvent::StageFailedTerminal(_)) if !state.is_terminal() => NodeState::Failed,

            (from, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from,
                    event: event.clone(),
                })
            }
        };

        Ok(target)
    }
}
