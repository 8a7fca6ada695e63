//! Controlled vocabularies for task routing and result reporting.
//!
//! These enums are wire-stable: the serialized form of [`EntityType`] doubles
//! as the broker routing key, and [`TaskPriority`] maps directly onto the
//! AMQP priority header. Unknown values are rejected at the validation
//! boundary, never silently coerced.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which worker pool a task is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    /// LLM-backed agents (implementation, testbench, reflection, debug).
    Reasoning,
    /// Cheap deterministic tool runners (lint, distill).
    LightDeterministic,
    /// Expensive deterministic tool runners (simulation).
    HeavyDeterministic,
}

impl EntityType {
    /// Broker routing key on `tasks_exchange`.
    pub fn routing_key(&self) -> &'static str {
        match self {
            Self::Reasoning => "REASONING",
            Self::LightDeterministic => "LIGHT_DETERMINISTIC",
            Self::HeavyDeterministic => "HEAVY_DETERMINISTIC",
        }
    }

    /// Destination queue bound to this routing key.
    pub fn queue_name(&self) -> &'static str {
        match self {
            Self::Reasoning => "agent_tasks",
            Self::LightDeterministic => "process_tasks",
            Self::HeavyDeterministic => "simulation_tasks",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routing_key())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REASONING" => Ok(Self::Reasoning),
            "LIGHT_DETERMINISTIC" => Ok(Self::LightDeterministic),
            "HEAVY_DETERMINISTIC" => Ok(Self::HeavyDeterministic),
            _ => Err(format!("Invalid entity type: {s}")),
        }
    }
}

/// The specific role a task invokes on the worker side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    SpecHelper,
    Planner,
    Implementation,
    Testbench,
    Reflection,
    Debug,
    Linter,
    Simulator,
    Distiller,
}

impl TaskKind {
    /// The entity type this kind is allowed to travel under.
    ///
    /// This mapping is authoritative: a [`TaskMessage`](super::TaskMessage)
    /// pairing a kind with any other entity type is rejected before publish.
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::SpecHelper
            | Self::Planner
            | Self::Implementation
            | Self::Testbench
            | Self::Reflection
            | Self::Debug => EntityType::Reasoning,
            Self::Linter | Self::Distiller => EntityType::LightDeterministic,
            Self::Simulator => EntityType::HeavyDeterministic,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SpecHelper => "SPEC_HELPER",
            Self::Planner => "PLANNER",
            Self::Implementation => "IMPLEMENTATION",
            Self::Testbench => "TESTBENCH",
            Self::Reflection => "REFLECTION",
            Self::Debug => "DEBUG",
            Self::Linter => "LINTER",
            Self::Simulator => "SIMULATOR",
            Self::Distiller => "DISTILLER",
        };
        f.write_str(s)
    }
}

/// Ordering hint within a queue. Maps onto the AMQP priority header of
/// `agent_tasks` (`x-max-priority=3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_amqp_priority(&self) -> u8 {
        (*self).into()
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl From<TaskPriority> for u8 {
    fn from(priority: TaskPriority) -> u8 {
        match priority {
            TaskPriority::Low => 1,
            TaskPriority::Medium => 2,
            TaskPriority::High => 3,
        }
    }
}

impl TryFrom<u8> for TaskPriority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Low),
            2 => Ok(Self::Medium),
            3 => Ok(Self::High),
            _ => Err(format!("Invalid task priority: {value}")),
        }
    }
}

/// Outcome of a completed task, reported by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Success,
    Failure,
    /// The worker gave up and handed the task to a human. Terminal for DAG
    /// purposes, but recorded distinctly from plain failure.
    Escalated,
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Escalated => write!(f, "ESCALATED"),
        }
    }
}
