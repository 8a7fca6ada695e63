use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::contracts::TaskKind;

/// One unit of work for a node. Each non-terminal node state maps to
/// exactly one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[serde(rename = "impl")]
    Implementation,
    Lint,
    #[serde(rename = "tb")]
    Testbench,
    #[serde(rename = "sim")]
    Simulation,
    Distill,
    Reflect,
    Debug,
}

impl Stage {
    /// Directory name under the task memory root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Implementation => "impl",
            Self::Lint => "lint",
            Self::Testbench => "tb",
            Self::Simulation => "sim",
            Self::Distill => "distill",
            Self::Reflect => "reflect",
            Self::Debug => "debug",
        }
    }

    /// The task kind dispatched for this stage.
    pub fn task_kind(&self) -> TaskKind {
        match self {
            Self::Implementation => TaskKind::Implementation,
            Self::Lint => TaskKind::Linter,
            Self::Testbench => TaskKind::Testbench,
            Self::Simulation => TaskKind::Simulator,
            Self::Distill => TaskKind::Distiller,
            Self::Reflect => TaskKind::Reflection,
            Self::Debug => TaskKind::Debug,
        }
    }

    /// Default in-flight deadline for the stage.
    pub fn default_deadline(&self) -> Duration {
        match self {
            Self::Implementation | Self::Testbench | Self::Debug => Duration::from_secs(120),
            Self::Simulation => Duration::from_secs(300),
            Self::Lint | Self::Distill | Self::Reflect => Duration::from_secs(60),
        }
    }

    /// Success-path ordering used by the happy path and invariant checks.
    pub const SUCCESS_ORDER: [Stage; 6] = [
        Stage::Implementation,
        Stage::Lint,
        Stage::Testbench,
        Stage::Simulation,
        Stage::Distill,
        Stage::Reflect,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "impl" => Ok(Self::Implementation),
            "lint" => Ok(Self::Lint),
            "tb" => Ok(Self::Testbench),
            "sim" => Ok(Self::Simulation),
            "distill" => Ok(Self::Distill),
            "reflect" => Ok(Self::Reflect),
            "debug" => Ok(Self::Debug),
            _ => Err(format!("Invalid stage: {s}")),
        }
    }
}

/// Per-node lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Pending,
    Implementing,
    Linting,
    Testbenching,
    Simulating,
    Distilling,
    Reflecting,
    Debugging,
    Done,
    Failed,
}

impl NodeState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether a node in this state satisfies dependency edges.
    pub fn satisfies_dependencies(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// The stage executing while a node sits in this state.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Implementing => Some(Stage::Implementation),
            Self::Linting => Some(Stage::Lint),
            Self::Testbenching => Some(Stage::Testbench),
            Self::Simulating => Some(Stage::Simulation),
            Self::Distilling => Some(Stage::Distill),
            Self::Reflecting => Some(Stage::Reflect),
            Self::Debugging => Some(Stage::Debug),
            Self::Pending | Self::Done | Self::Failed => None,
        }
    }

    /// The state a node occupies while the given stage is executing.
    pub fn for_stage(stage: Stage) -> NodeState {
        match stage {
            Stage::Implementation => Self::Implementing,
            Stage::Lint => Self::Linting,
            Stage::Testbench => Self::Testbenching,
            Stage::Simulation => Self::Simulating,
            Stage::Distill => Self::Distilling,
            Stage::Reflect => Self::Reflecting,
            Stage::Debug => Self::Debugging,
        }
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Implementing => "IMPLEMENTING",
            Self::Linting => "LINTING",
            Self::Testbenching => "TESTBENCHING",
            Self::Simulating => "SIMULATING",
            Self::Distilling => "DISTILLING",
            Self::Reflecting => "REFLECTING",
            Self::Debugging => "DEBUGGING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for NodeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IMPLEMENTING" => Ok(Self::Implementing),
            "LINTING" => Ok(Self::Linting),
            "TESTBENCHING" => Ok(Self::Testbenching),
            "SIMULATING" => Ok(Self::Simulating),
            "DISTILLING" => Ok(Self::Distilling),
            "REFLECTING" => Ok(Self::Reflecting),
            "DEBUGGING" => Ok(Self::Debugging),
            "DONE" => Ok(Self::Done),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Invalid node state: {s}")),
        }
    }
}
