use serde::{Deserialize, Serialize};

use super::states::Stage;

/// Events that drive per-node state transitions.
///
/// Events are produced by the orchestrator loop only: worker results and
/// synthesized timeouts are classified first, then applied here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeEvent {
    /// All dependencies are DONE; begin the first stage.
    Start,
    /// The stage reported SUCCESS and its postconditions held.
    StageSucceeded(Stage),
    /// The stage failed terminally (classifier verdict, exhausted retry,
    /// postcondition violation, or escalation).
    StageFailedTerminal(Stage),
    /// Simulation failed with repair budget remaining; enter the
    /// distill -> reflect -> debug repair cycle.
    EnterRepair,
}

impl NodeEvent {
    /// The stage the event concerns, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Start => None,
            Self::StageSucceeded(stage) | Self::StageFailedTerminal(stage) => Some(*stage),
            Self::EnterRepair => Some(Stage::Simulation),
        }
    }
}
