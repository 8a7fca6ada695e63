//! # Runtime Events
//!
//! Structured events emitted by the orchestrator as it works. The emitter
//! is passed explicitly to the components that need it; there is no
//! process-wide sink. Every event is logged through `tracing`, and an
//! optional channel fans events out to embedders (UIs, test harnesses).

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::contracts::TaskStatus;
use crate::state_machine::{NodeState, Stage};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum RunEvent {
    TaskPublished {
        node_id: String,
        stage: Stage,
        task_id: Uuid,
        attempt: u32,
    },
    ResultApplied {
        node_id: String,
        stage: Stage,
        task_id: Uuid,
        status: TaskStatus,
    },
    ResultRejected {
        task_id: Option<Uuid>,
        reason: String,
    },
    StateTransition {
        node_id: String,
        from: NodeState,
        to: NodeState,
    },
    DeadlineExpired {
        node_id: String,
        stage: Stage,
        task_id: Uuid,
    },
    NodeFailed {
        node_id: String,
        stage: Stage,
        reason: String,
    },
    RunFinished {
        done: usize,
        failed: usize,
    },
}

/// Emits [`RunEvent`]s to tracing and, optionally, a channel.
#[derive(Debug, Clone, Default)]
pub struct EventEmitter {
    sink: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl EventEmitter {
    /// Log-only emitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Emitter that also forwards every event on a channel.
    pub fn with_channel() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sink: Some(tx) }, rx)
    }

    pub fn emit(&self, event: RunEvent) {
        match &event {
            RunEvent::TaskPublished {
                node_id,
                stage,
                task_id,
                attempt,
            } => info!(%node_id, %stage, %task_id, attempt, "task published"),
            RunEvent::ResultApplied {
                node_id,
                stage,
                task_id,
                status,
            } => info!(%node_id, %stage, %task_id, %status, "result applied"),
            RunEvent::ResultRejected { task_id, reason } => {
                info!(task_id = ?task_id, %reason, "result rejected")
            }
            RunEvent::StateTransition { node_id, from, to } => {
                info!(%node_id, %from, %to, "state transition")
            }
            RunEvent::DeadlineExpired {
                node_id,
                stage,
                task_id,
            } => info!(%node_id, %stage, %task_id, "deadline expired"),
            RunEvent::NodeFailed {
                node_id,
                stage,
                reason,
            } => info!(%node_id, %stage, %reason, "node failed"),
            RunEvent::RunFinished { done, failed } => info!(done, failed, "run finished"),
        }
        if let Some(sink) = &self.sink {
            // A closed receiver just means nobody is watching.
            let _ = sink.send(event);
        }
    }
}
