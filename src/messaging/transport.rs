//! Provider-agnostic transport trait for task dispatch and result
//! consumption.
//!
//! The orchestrator loop programs against this trait; the AMQP
//! implementation carries production traffic and the in-memory
//! implementation backs integration tests. Deliveries surface raw payload
//! bytes so that envelope validation stays at the loop boundary: a
//! malformed result is rejected (`requeue=false`) without ever touching
//! DAG state.

use std::time::Duration;

use async_trait::async_trait;

use crate::contracts::{ResultMessage, TaskMessage};

use super::errors::MessagingError;

/// A raw delivery from a queue, not yet validated.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub payload: Vec<u8>,
    pub redelivered: bool,
}

#[async_trait]
pub trait TaskTransport: Send + Sync + 'static {
    /// Declare exchanges, queues, and bindings. Idempotent: running twice
    /// yields the same broker state as running once.
    async fn declare_topology(&self) -> Result<(), MessagingError>;

    /// Publish a task, routed by its entity type, persistent, with the
    /// priority header set. Resolves once the broker confirms.
    async fn publish_task(&self, task: &TaskMessage) -> Result<(), MessagingError>;

    /// Publish a result onto the results stream (worker side; scripted
    /// workers in tests use this too).
    async fn publish_result(&self, result: &ResultMessage) -> Result<(), MessagingError>;

    /// Next delivery from the results stream, waiting at most `timeout`.
    async fn recv_result(&self, timeout: Duration) -> Result<Option<Delivery>, MessagingError>;

    /// Acknowledge an applied result.
    async fn ack_result(&self, delivery_tag: u64) -> Result<(), MessagingError>;

    /// Reject a result with `requeue=false`, routing it to the DLQ.
    /// `reason` is preserved where the provider supports headers.
    async fn reject_result(&self, delivery_tag: u64, reason: &str) -> Result<(), MessagingError>;

    /// Worker-side: next task from a named queue. Used by integrators and
    /// by scripted workers in tests.
    async fn recv_task(
        &self,
        queue_name: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>, MessagingError>;

    /// Worker-side ack of a consumed task.
    async fn ack_task(&self, queue_name: &str, delivery_tag: u64) -> Result<(), MessagingError>;

    /// Worker-side unrecoverable failure: `requeue=false` to the DLQ with
    /// identifying headers preserved.
    async fn reject_task(
        &self,
        queue_name: &str,
        delivery_tag: u64,
        reason: &str,
    ) -> Result<(), MessagingError>;
}
