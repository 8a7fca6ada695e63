//! Boundary validation for task and result envelopes.
//!
//! Runs on both sides of the broker: before publish (a malformed task is
//! never sent) and after consume (a malformed result never mutates DAG
//! state). Unknown enum values are already rejected at deserialization;
//! this layer checks cross-field invariants.

use thiserror::Error;
use uuid::Uuid;

use super::messages::{ResultMessage, TaskMessage};
use super::vocab::{EntityType, TaskKind, TaskStatus};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("entity type {entity} cannot carry task kind {kind}")]
    EntityKindMismatch { entity: EntityType, kind: TaskKind },

    #[error("context stage payload is for {payload_kind}, envelope says {envelope_kind}")]
    ContextKindMismatch {
        envelope_kind: TaskKind,
        payload_kind: TaskKind,
    },

    #[error("required field is missing or empty: {field}")]
    MissingField { field: &'static str },

    #[error("successful result for task {task_id} has empty log_output")]
    EmptyLogOutput { task_id: Uuid },
}

impl ValidationError {
    /// Canonical machine-readable reason recorded in task memory and the
    /// run summary.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::EntityKindMismatch { .. } => "validation/entity_kind_mismatch",
            Self::ContextKindMismatch { .. } => "validation/context_kind_mismatch",
            Self::MissingField { .. } => "validation/missing_field",
            Self::EmptyLogOutput { .. } => "validation/empty_log_output",
        }
    }
}

/// Validate a task envelope before it reaches the broker.
pub fn validate_task(task: &TaskMessage) -> Result<(), ValidationError> {
    if task.task_kind.entity_type() != task.entity_type {
        return Err(ValidationError::EntityKindMismatch {
            entity: task.entity_type,
            kind: task.task_kind,
        });
    }
    let payload_kind = task.context.task_kind();
    if payload_kind != task.task_kind {
        return Err(ValidationError::ContextKindMismatch {
            envelope_kind: task.task_kind,
            payload_kind,
        });
    }
    if task.context.node_id().is_empty() {
        return Err(ValidationError::MissingField { field: "node_id" });
    }
    Ok(())
}

/// Validate a result envelope before it is applied to the DAG.
pub fn validate_result(result: &ResultMessage) -> Result<(), ValidationError> {
    if result.task_id.is_nil() {
        return Err(ValidationError::MissingField { field: "task_id" });
    }
    if result.correlation_id.is_nil() {
        return Err(ValidationError::MissingField {
            field: "correlation_id",
        });
    }
    if result.status == TaskStatus::Success && result.log_output.trim().is_empty() {
        return Err(ValidationError::EmptyLogOutput {
            task_id: result.task_id,
        });
    }
    Ok(())
}
