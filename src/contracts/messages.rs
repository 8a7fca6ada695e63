//! Task and result envelopes exchanged with workers over the broker.
//!
//! Envelope fields are stable identifiers. Evolution is additive: known
//! fields keep their meaning and unknown fields are tolerated on consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::StageContext;
use super::vocab::{EntityType, TaskKind, TaskPriority, TaskStatus};

/// Token and cost accounting reported by reasoning workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostMetrics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Descriptor of a distilled failure dataset written by the distiller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistilledDataset {
    pub original_data_size: u64,
    pub distilled_data_size: u64,
    pub compression_ratio: f64,
    pub failure_focus_areas: Vec<String>,
    pub data_path: String,
}

/// Structured analysis produced by the reflection agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionInsights {
    pub hypotheses: Vec<String>,
    pub likely_failure_points: Vec<String>,
    pub recommended_probes: Vec<String>,
    pub confidence_score: f64,
    pub analysis_notes: String,
}

/// The unit of work published by the orchestrator.
///
/// `task_id` is unique per published attempt; `correlation_id` is stable
/// across every attempt of one node lineage so traces group together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: Uuid,
    pub correlation_id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub priority: TaskPriority,
    pub entity_type: EntityType,
    pub task_kind: TaskKind,
    pub context: StageContext,
}

impl TaskMessage {
    /// Create a task for a stage payload, deriving the entity type from the
    /// kind so the envelope is consistent by construction.
    pub fn new(correlation_id: Uuid, priority: TaskPriority, context: StageContext) -> Self {
        let task_kind = context.task_kind();
        Self {
            task_id: Uuid::new_v4(),
            correlation_id,
            created_at: Utc::now(),
            priority,
            entity_type: task_kind.entity_type(),
            task_kind,
            context,
        }
    }

    pub fn node_id(&self) -> &str {
        self.context.node_id()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// The unit of result consumed from the `results` queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub task_id: Uuid,
    pub correlation_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts_path: Option<String>,
    pub log_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflections: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<CostMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distilled_dataset: Option<DistilledDataset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection_insights: Option<ReflectionInsights>,
}

impl ResultMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Build a success result for a task (worker-side and test helper).
    pub fn success(task: &TaskMessage, log_output: impl Into<String>) -> Self {
        Self {
            task_id: task.task_id,
            correlation_id: task.correlation_id,
            completed_at: Utc::now(),
            status: TaskStatus::Success,
            artifacts_path: None,
            log_output: log_output.into(),
            reflections: None,
            metrics: None,
            distilled_dataset: None,
            reflection_insights: None,
        }
    }

    /// Build a failure result for a task (worker-side and test helper).
    pub fn failure(task: &TaskMessage, log_output: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failure,
            ..Self::success(task, log_output)
        }
    }

    pub fn with_artifacts_path(mut self, path: impl Into<String>) -> Self {
        self.artifacts_path = Some(path.into());
        self
    }

    pub fn with_distilled_dataset(mut self, dataset: DistilledDataset) -> Self {
        self.distilled_dataset = Some(dataset);
        self
    }

    pub fn with_reflection_insights(mut self, insights: ReflectionInsights) -> Self {
        self.reflection_insights = Some(insights);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::context::{
        ClockingSpec, InterfaceSpec, NodeContext, StageContext,
    };
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn sample_context() -> StageContext {
        StageContext::Implementation {
            node: NodeContext {
                node_id: "counter4".to_string(),
                interface: InterfaceSpec::default(),
                clocking: ClockingSpec::default(),
                rtl_path: PathBuf::from("generated/rtl/counter4.sv"),
                testbench_path: PathBuf::from("generated/rtl/counter4_tb.sv"),
                design_context_hash: "abcd1234".to_string(),
                library_refs: serde_json::Value::Null,
                coverage_goals: None,
                prior_artifacts: BTreeMap::new(),
                settings: None,
            },
            spec_summary: Some("4-bit synchronous counter".to_string()),
        }
    }

    #[test]
    fn test_task_envelope_derives_entity_from_kind() {
        let task = TaskMessage::new(Uuid::new_v4(), TaskPriority::High, sample_context());
        assert_eq!(task.task_kind, TaskKind::Implementation);
        assert_eq!(task.entity_type, EntityType::Reasoning);
        assert_eq!(task.node_id(), "counter4");
    }

    #[test]
    fn test_task_envelope_roundtrip() {
        let task = TaskMessage::new(Uuid::new_v4(), TaskPriority::default(), sample_context());
        let bytes = task.to_bytes().unwrap();
        let parsed = TaskMessage::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn test_result_tolerates_unknown_fields() {
        let task = TaskMessage::new(Uuid::new_v4(), TaskPriority::default(), sample_context());
        let mut json = serde_json::to_value(ResultMessage::success(&task, "ok")).unwrap();
        json["some_future_field"] = serde_json::json!({"x": 1});
        let parsed: ResultMessage = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.task_id, task.task_id);
        assert!(parsed.status.is_success());
    }

    #[test]
    fn test_unique_task_ids_per_attempt() {
        let correlation = Uuid::new_v4();
        let a = TaskMessage::new(correlation, TaskPriority::default(), sample_context());
        let b = TaskMessage::new(correlation, TaskPriority::default(), sample_context());
        assert_ne!(a.task_id, b.task_id);
        assert_eq!(a.correlation_id, b.correlation_id);
    }
}
