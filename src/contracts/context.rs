//! Per-stage task context payloads.
//!
//! The `context` block of a [`TaskMessage`](super::TaskMessage) is a
//! discriminated union over the stage being dispatched, tagged by the
//! `stage` wire field. Each variant carries the shared [`NodeContext`] plus
//! only the fields that stage's worker consumes; deterministic tool stages
//! never see LLM-specific settings.
//!
//! Maps use `BTreeMap` so that identical inputs serialize byte-identically,
//! which the context builder relies on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::vocab::TaskKind;
use super::{DistilledDataset, ReflectionInsights};

/// A single port on the module interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSpec {
    pub name: String,
    pub direction: SignalDirection,
    pub width: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalDirection {
    Input,
    Output,
    Inout,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InterfaceSpec {
    pub signals: Vec<SignalSpec>,
}

/// Clock and reset semantics for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockSpec {
    pub freq_hz: f64,
    pub reset: String,
    pub reset_active_low: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockingSpec {
    pub clk: ClockSpec,
}

impl Default for ClockingSpec {
    fn default() -> Self {
        Self {
            clk: ClockSpec {
                freq_hz: 100_000_000.0,
                reset: "rst_n".to_string(),
                reset_active_low: true,
            },
        }
    }
}

/// Optional execution caps forwarded to reasoning workers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_hint: Option<String>,
}

/// Artifact and log produced by an already-completed stage of this node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PriorArtifact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

/// Fields shared by every stage payload for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeContext {
    pub node_id: String,
    pub interface: InterfaceSpec,
    pub clocking: ClockingSpec,
    pub rtl_path: PathBuf,
    pub testbench_path: PathBuf,
    pub design_context_hash: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub library_refs: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_goals: Option<serde_json::Value>,
    /// Stage -> artifact/log recorded so far, oldest first.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prior_artifacts: BTreeMap<String, PriorArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<TaskSettings>,
}

/// Context captured when a stage fails, threaded into the repair cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    pub failure_stage: String,
    pub failure_log_excerpt: String,
    pub failure_log_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_artifact_path: Option<String>,
}

/// Discriminated union of per-stage payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageContext {
    #[serde(rename = "impl")]
    Implementation {
        #[serde(flatten)]
        node: NodeContext,
        #[serde(skip_serializing_if = "Option::is_none")]
        spec_summary: Option<String>,
    },
    #[serde(rename = "tb")]
    Testbench {
        #[serde(flatten)]
        node: NodeContext,
        /// Scenario names the testbench must exercise.
        test_plan: Vec<String>,
        rtl_artifact: PathBuf,
    },
    Lint {
        #[serde(flatten)]
        node: NodeContext,
        artifact: PathBuf,
        tool_flags: Vec<String>,
    },
    #[serde(rename = "sim")]
    Simulation {
        #[serde(flatten)]
        node: NodeContext,
        rtl_artifact: PathBuf,
        testbench_artifact: PathBuf,
        tool_timeout_secs: u64,
    },
    Distill {
        #[serde(flatten)]
        node: NodeContext,
        sim_log_path: PathBuf,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure: Option<FailureContext>,
    },
    Reflect {
        #[serde(flatten)]
        node: NodeContext,
        #[serde(skip_serializing_if = "Option::is_none")]
        distilled_dataset: Option<DistilledDataset>,
        sim_log_path: PathBuf,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure: Option<FailureContext>,
    },
    Debug {
        #[serde(flatten)]
        node: NodeContext,
        failing_rtl_path: PathBuf,
        /// Deterministic fingerprint of the failing simulation log.
        failure_signature: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reflection_insights: Option<ReflectionInsights>,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure: Option<FailureContext>,
    },
}

impl StageContext {
    pub fn node(&self) -> &NodeContext {
        match self {
            Self::Implementation { node, .. }
            | Self::Testbench { node, .. }
            | Self::Lint { node, .. }
            | Self::Simulation { node, .. }
            | Self::Distill { node, .. }
            | Self::Reflect { node, .. }
            | Self::Debug { node, .. } => node,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node().node_id
    }

    /// The task kind this payload shape belongs to.
    pub fn task_kind(&self) -> TaskKind {
        match self {
            Self::Implementation { .. } => TaskKind::Implementation,
            Self::Testbench { .. } => TaskKind::Testbench,
            Self::Lint { .. } => TaskKind::Linter,
            Self::Simulation { .. } => TaskKind::Simulator,
            Self::Distill { .. } => TaskKind::Distiller,
            Self::Reflect { .. } => TaskKind::Reflection,
            Self::Debug { .. } => TaskKind::Debug,
        }
    }
}
