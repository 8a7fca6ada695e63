//! Wire-observable broker topology names and headers.
//!
//! These identifiers are shared with worker integrators; changing any of
//! them is a breaking protocol change.

use crate::contracts::EntityType;

pub const TASKS_EXCHANGE: &str = "tasks_exchange";
pub const TASKS_DLX: &str = "tasks_dlx";

pub const QUEUE_AGENT_TASKS: &str = "agent_tasks";
pub const QUEUE_PROCESS_TASKS: &str = "process_tasks";
pub const QUEUE_SIMULATION_TASKS: &str = "simulation_tasks";
pub const QUEUE_RESULTS: &str = "results";
pub const QUEUE_DEAD_LETTER: &str = "dead_letter_queue";

pub const RESULTS_ROUTING_KEY: &str = "RESULTS";

/// `agent_tasks` is priority-aware: `x-max-priority` matches the highest
/// `TaskPriority` value.
pub const AGENT_TASKS_MAX_PRIORITY: u8 = 3;

/// Headers preserved across the failure path so the DLQ stays debuggable.
pub const HEADER_TASK_ID: &str = "x-task-id";
pub const HEADER_CORRELATION_ID: &str = "x-correlation-id";
pub const HEADER_RETRY_COUNT: &str = "x-retry-count";
pub const HEADER_FAILURE_REASON: &str = "x-failure-reason";

/// The three task queues, paired with the routing key that selects each.
pub const TASK_QUEUE_BINDINGS: [(&str, EntityType); 3] = [
    (QUEUE_AGENT_TASKS, EntityType::Reasoning),
    (QUEUE_PROCESS_TASKS, EntityType::LightDeterministic),
    (QUEUE_SIMULATION_TASKS, EntityType::HeavyDeterministic),
];
