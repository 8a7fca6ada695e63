//! DAG model: the immutable plan graph plus per-node mutable execution
//! state. Execution state is mutated exclusively by the orchestrator loop;
//! everything else sees read-only snapshots.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;

use crate::state_machine::{NodeState, Stage};

use super::errors::DesignInputError;

/// One node of `dag.json` as emitted by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: String,
    #[serde(rename = "type")]
    pub module_kind: String,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub state: NodeState,
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
}

/// The plan graph as loaded from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagPlan {
    pub nodes: Vec<PlanNode>,
}

impl DagPlan {
    pub fn load(path: &Path) -> Result<Self, DesignInputError> {
        let raw = fs::read_to_string(path).map_err(|e| DesignInputError::io(path, e))?;
        let plan: DagPlan =
            serde_json::from_str(&raw).map_err(|e| DesignInputError::parse(path, e))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Reject duplicate ids, dangling deps, and cycles.
    pub fn validate(&self) -> Result<(), DesignInputError> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(DesignInputError::DuplicateNode {
                    id: node.id.clone(),
                });
            }
        }
        for node in &self.nodes {
            for dep in &node.deps {
                if !ids.contains(dep.as_str()) {
                    return Err(DesignInputError::UnknownDependency {
                        id: node.id.clone(),
                        dep: dep.clone(),
                    });
                }
            }
        }

        // Kahn's algorithm; whatever survives is on a cycle.
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.deps.len()))
            .collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in &self.nodes {
            for dep in &node.deps {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(node.id.as_str());
            }
        }
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for dependent in dependents.get(id).into_iter().flatten() {
                let degree = in_degree
                    .get_mut(dependent)
                    .ok_or_else(|| DesignInputError::UnknownDependency {
                        id: id.to_string(),
                        dep: (*dependent).to_string(),
                    })?;
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*dependent);
                }
            }
        }
        if visited != self.nodes.len() {
            let cyclic: Vec<String> = in_degree
                .into_iter()
                .filter(|(_, d)| *d > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            return Err(DesignInputError::Cycle { nodes: cyclic });
        }
        Ok(())
    }
}

/// A stage currently awaiting a worker result.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlight {
    pub stage: Stage,
    pub task_id: Uuid,
    pub deadline: Instant,
}

/// Terminal failure details for the run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub stage: Stage,
    pub reason: String,
}

/// Per-node mutable execution state, owned by the orchestrator loop.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub id: String,
    pub module_kind: String,
    pub deps: Vec<String>,
    pub state: NodeState,
    pub correlation_id: Uuid,
    pub artifacts: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, serde_json::Value>,
    pub attempts: HashMap<Stage, u32>,
    pub timeouts: HashMap<Stage, u32>,
    pub in_flight: Option<InFlight>,
    /// True while the node is inside a simulation repair cycle.
    pub repair_active: bool,
    /// Completed repair cycles that ended in another simulation failure.
    pub failed_repair_cycles: u32,
    pub failure: Option<FailureRecord>,
    pub last_log_path: Option<PathBuf>,
}

impl NodeRecord {
    fn from_plan(node: &PlanNode) -> Self {
        Self {
            id: node.id.clone(),
            module_kind: node.module_kind.clone(),
            deps: node.deps.clone(),
            state: node.state,
            correlation_id: Uuid::new_v4(),
            artifacts: node.artifacts.clone(),
            metrics: node.metrics.clone(),
            attempts: HashMap::new(),
            timeouts: HashMap::new(),
            in_flight: None,
            repair_active: false,
            failed_repair_cycles: 0,
            failure: None,
            last_log_path: None,
        }
    }

    pub fn attempt_count(&self, stage: Stage) -> u32 {
        self.attempts.get(&stage).copied().unwrap_or(0)
    }

    pub fn record_attempt(&mut self, stage: Stage) -> u32 {
        let count = self.attempts.entry(stage).or_insert(0);
        *count += 1;
        *count
    }
}

/// The whole execution graph. `BTreeMap` keeps iteration deterministic.
#[derive(Debug)]
pub struct ExecutionDag {
    nodes: BTreeMap<String, NodeRecord>,
}

impl ExecutionDag {
    pub fn from_plan(plan: &DagPlan) -> Result<Self, DesignInputError> {
        plan.validate()?;
        let nodes = plan
            .nodes
            .iter()
            .map(|n| (n.id.clone(), NodeRecord::from_plan(n)))
            .collect();
        Ok(Self { nodes })
    }

    pub fn node(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every dependency of `id` is DONE.
    pub fn deps_satisfied(&self, id: &str) -> bool {
        self.nodes.get(id).map_or(false, |node| {
            node.deps.iter().all(|dep| {
                self.nodes
                    .get(dep)
                    .map_or(false, |d| d.state.satisfies_dependencies())
            })
        })
    }

    /// Correlate an in-flight task back to its node and stage.
    pub fn find_in_flight(&self, task_id: Uuid) -> Option<(String, Stage)> {
        self.nodes.values().find_map(|node| {
            node.in_flight
                .as_ref()
                .filter(|f| f.task_id == task_id)
                .map(|f| (node.id.clone(), f.stage))
        })
    }

    pub fn all_done(&self) -> bool {
        self.nodes.values().all(|n| n.state == NodeState::Done)
    }

    pub fn any_failed(&self) -> bool {
        self.nodes.values().any(|n| n.state == NodeState::Failed)
    }

    /// No in-flight work and nothing schedulable: the run cannot progress.
    pub fn is_stalled(&self) -> bool {
        let any_in_flight = self.nodes.values().any(|n| n.in_flight.is_some());
        if any_in_flight {
            return false;
        }
        !self.nodes.values().any(|n| {
            !n.state.is_terminal() && self.deps_satisfied(&n.id)
        }) && !self.all_done()
    }
}
