//! # Message Contracts
//!
//! Typed envelopes and controlled vocabularies for everything that crosses
//! the broker. All communication between the orchestrator and execution
//! entities (reasoning agents and deterministic workers) adheres to these
//! schemas; both publish and consume paths validate before acting.

pub mod context;
pub mod messages;
pub mod validation;
pub mod vocab;

pub use context::{
    ClockSpec, ClockingSpec, FailureContext, InterfaceSpec, NodeContext, PriorArtifact,
    SignalDirection, SignalSpec, StageContext, TaskSettings,
};
pub use messages::{CostMetrics, DistilledDataset, ReflectionInsights, ResultMessage, TaskMessage};
pub use validation::{validate_result, validate_task, ValidationError};
pub use vocab::{EntityType, TaskKind, TaskPriority, TaskStatus};
