//! # Orchestration
//!
//! The control plane: context building, failure classification, the
//! single-writer coordinator loop, and the final run summary.

pub mod context_builder;
pub mod coordinator;
pub mod dlq_classifier;
pub mod summary;

pub use context_builder::{ContextBuilder, RepairContext};
pub use coordinator::Coordinator;
pub use dlq_classifier::{
    failure_signature, DlqClassifier, FailureDisposition, FailureFingerprint, FingerprintRules,
};
pub use summary::{NodeSummary, RunOutcome, RunSummary};
