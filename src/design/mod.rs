//! # Design Inputs
//!
//! Read-only planner outputs (`design_context.json`, `dag.json`) and the
//! mutable execution graph built from them.

pub mod context;
pub mod dag;
pub mod errors;

pub use context::{DesignContext, DesignNode};
pub use dag::{DagPlan, ExecutionDag, FailureRecord, InFlight, NodeRecord, PlanNode};
pub use errors::DesignInputError;
