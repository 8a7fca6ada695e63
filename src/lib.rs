//! # rtlforge
//!
//! Orchestration core for agent-driven RTL generation. Walks a DAG of
//! design nodes, dispatches typed tasks across differentiated worker
//! queues over an AMQP broker, consumes correlated results, advances a
//! per-node staged state machine, persists per-stage artifacts to task
//! memory, and routes unrecoverable failures to a dead-letter queue.

pub mod config;
pub mod contracts;
pub mod design;
pub mod error;
pub mod events;
pub mod logging;
pub mod memory;
pub mod messaging;
pub mod orchestration;
pub mod state_machine;

pub use config::ForgeConfig;
pub use error::{ForgeError, Result};
