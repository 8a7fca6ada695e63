//! In-memory transport for integration tests and local development.
//!
//! Mirrors the broker semantics the orchestrator depends on: routing by
//! entity type, priority ordering on `agent_tasks`, ack/nack with
//! `requeue=false` landing in `dead_letter_queue`. No visibility timeout:
//! an unacked message stays checked out until acked or rejected.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::contracts::{ResultMessage, TaskMessage};

use super::errors::MessagingError;
use super::topology::{
    QUEUE_AGENT_TASKS, QUEUE_DEAD_LETTER, QUEUE_RESULTS, TASK_QUEUE_BINDINGS,
};
use super::transport::{Delivery, TaskTransport};

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    priority: u8,
    delivered_count: u32,
}

#[derive(Debug)]
struct Unacked {
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct Inner {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    unacked: HashMap<u64, Unacked>,
}

impl Inner {
    fn queue_mut(&mut self, name: &str) -> Result<&mut VecDeque<StoredMessage>, MessagingError> {
        self.queues
            .get_mut(name)
            .ok_or_else(|| MessagingError::consume(name, "queue not declared"))
    }
}

/// In-memory [`TaskTransport`].
#[derive(Debug, Default)]
pub struct InMemoryTaskTransport {
    inner: Mutex<Inner>,
    next_tag: AtomicU64,
}

impl InMemoryTaskTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages waiting in a queue (test helper).
    pub async fn queue_len(&self, queue_name: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.queues.get(queue_name).map_or(0, |q| q.len())
    }

    /// Number of dead-lettered messages (test helper).
    pub async fn dead_letter_len(&self) -> usize {
        self.queue_len(QUEUE_DEAD_LETTER).await
    }

    async fn push(&self, queue_name: &str, payload: Vec<u8>, priority: u8) -> Result<(), MessagingError> {
        let mut inner = self.inner.lock().await;
        let queue = inner
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::publish(queue_name, "queue not declared"))?;
        let message = StoredMessage {
            payload,
            priority,
            delivered_count: 0,
        };
        // Priority queues deliver higher priorities first; FIFO within a
        // priority level.
        if queue_name == QUEUE_AGENT_TASKS {
            let position = queue
                .iter()
                .position(|m| m.priority < priority)
                .unwrap_or(queue.len());
            queue.insert(position, message);
        } else {
            queue.push_back(message);
        }
        Ok(())
    }

    async fn pop(&self, queue_name: &str) -> Result<Option<Delivery>, MessagingError> {
        let mut inner = self.inner.lock().await;
        let queue = inner.queue_mut(queue_name)?;
        let Some(mut message) = queue.pop_front() else {
            return Ok(None);
        };
        message.delivered_count += 1;
        let delivery_tag = self.next_tag.fetch_add(1, Ordering::Relaxed) + 1;
        let delivery = Delivery {
            delivery_tag,
            payload: message.payload.clone(),
            redelivered: message.delivered_count > 1,
        };
        inner.unacked.insert(
            delivery_tag,
            Unacked {
                payload: message.payload,
            },
        );
        Ok(Some(delivery))
    }

    async fn pop_with_timeout(
        &self,
        queue_name: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>, MessagingError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(delivery) = self.pop(queue_name).await? {
                return Ok(Some(delivery));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), MessagingError> {
        let mut inner = self.inner.lock().await;
        inner
            .unacked
            .remove(&delivery_tag)
            .map(|_| ())
            .ok_or_else(|| MessagingError::ack(delivery_tag, "unknown delivery tag"))
    }

    async fn reject(&self, delivery_tag: u64) -> Result<(), MessagingError> {
        let mut inner = self.inner.lock().await;
        let unacked = inner
            .unacked
            .remove(&delivery_tag)
            .ok_or_else(|| MessagingError::nack(delivery_tag, "unknown delivery tag"))?;
        let dlq = inner.queue_mut(QUEUE_DEAD_LETTER)?;
        dlq.push_back(StoredMessage {
            payload: unacked.payload,
            priority: 0,
            delivered_count: 0,
        });
        Ok(())
    }
}

#[async_trait]
impl TaskTransport for InMemoryTaskTransport {
    async fn declare_topology(&self) -> Result<(), MessagingError> {
        let mut inner = self.inner.lock().await;
        for (queue_name, _) in TASK_QUEUE_BINDINGS {
            inner.queues.entry(queue_name.to_string()).or_default();
        }
        inner.queues.entry(QUEUE_RESULTS.to_string()).or_default();
        inner
            .queues
            .entry(QUEUE_DEAD_LETTER.to_string())
            .or_default();
        Ok(())
    }

    async fn publish_task(&self, task: &TaskMessage) -> Result<(), MessagingError> {
        let queue_name = task.entity_type.queue_name();
        self.push(
            queue_name,
            task.to_bytes()?,
            task.priority.as_amqp_priority(),
        )
        .await
    }

    async fn publish_result(&self, result: &ResultMessage) -> Result<(), MessagingError> {
        self.push(QUEUE_RESULTS, result.to_bytes()?, 0).await
    }

    async fn recv_result(&self, timeout: Duration) -> Result<Option<Delivery>, MessagingError> {
        self.pop_with_timeout(QUEUE_RESULTS, timeout).await
    }

    async fn ack_result(&self, delivery_tag: u64) -> Result<(), MessagingError> {
        self.ack(delivery_tag).await
    }

    async fn reject_result(&self, delivery_tag: u64, _reason: &str) -> Result<(), MessagingError> {
        self.reject(delivery_tag).await
    }

    async fn recv_task(
        &self,
        queue_name: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>, MessagingError> {
        self.pop_with_timeout(queue_name, timeout).await
    }

    async fn ack_task(&self, _queue_name: &str, delivery_tag: u64) -> Result<(), MessagingError> {
        self.ack(delivery_tag).await
    }

    async fn reject_task(
        &self,
        _queue_name: &str,
        delivery_tag: u64,
        _reason: &str,
    ) -> Result<(), MessagingError> {
        self.reject(delivery_tag).await
    }
}
