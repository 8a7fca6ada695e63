//! Final run summary emitted at termination: every node's terminal state,
//! the stage that failed (if any), the canonical failure reason, and the
//! path to the last log file.

use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::design::ExecutionDag;
use crate::state_machine::{NodeState, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every node reached DONE.
    Success,
    /// At least one node failed and no further progress was possible.
    Failed,
    /// The external run deadline elapsed first.
    DeadlineExceeded,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub node_id: String,
    pub state: NodeState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub nodes: Vec<NodeSummary>,
}

impl RunSummary {
    pub fn from_dag(dag: &ExecutionDag, outcome: RunOutcome) -> Self {
        let nodes = dag
            .nodes()
            .map(|node| NodeSummary {
                node_id: node.id.clone(),
                state: node.state,
                failed_stage: node.failure.as_ref().map(|f| f.stage),
                failure_reason: node.failure.as_ref().map(|f| f.reason.clone()),
                last_log_path: node.last_log_path.clone(),
            })
            .collect();
        Self { outcome, nodes }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }

    pub fn done_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.state == NodeState::Done)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.state == NodeState::Failed)
            .count()
    }

    /// Human-readable report for the terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "run {:?}: {} done, {} failed, {} total",
            self.outcome,
            self.done_count(),
            self.failed_count(),
            self.nodes.len()
        );
        for node in &self.nodes {
            let _ = write!(out, "  {:<24} {}", node.node_id, node.state);
            if let Some(stage) = node.failed_stage {
                let _ = write!(out, "  failed at {stage}");
            }
            if let Some(reason) = &node.failure_reason {
                let _ = write!(out, "  ({reason})");
            }
            if let Some(log) = &node.last_log_path {
                let _ = write!(out, "  log: {}", log.display());
            }
            let _ = writeln!(out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{DagPlan, FailureRecord, PlanNode};
    use std::collections::BTreeMap;

    fn dag() -> ExecutionDag {
        let plan = DagPlan {
            nodes: vec![
                PlanNode {
                    id: "alu".to_string(),
                    module_kind: "module".to_string(),
                    deps: vec![],
                    state: NodeState::Pending,
                    artifacts: BTreeMap::new(),
                    metrics: BTreeMap::new(),
                },
                PlanNode {
                    id: "counter4".to_string(),
                    module_kind: "module".to_string(),
                    deps: vec![],
                    state: NodeState::Pending,
                    artifacts: BTreeMap::new(),
                    metrics: BTreeMap::new(),
                },
            ],
        };
        ExecutionDag::from_plan(&plan).unwrap()
    }

    #[test]
    fn test_summary_counts_and_render() {
        let mut dag = dag();
        dag.node_mut("counter4").unwrap().state = NodeState::Done;
        let failed = dag.node_mut("alu").unwrap();
        failed.state = NodeState::Failed;
        failed.failure = Some(FailureRecord {
            stage: Stage::Simulation,
            reason: "tool/transient".to_string(),
        });
        failed.last_log_path = Some(PathBuf::from("/tm/alu/sim/log.2.txt"));

        let summary = RunSummary::from_dag(&dag, RunOutcome::Failed);
        assert_eq!(summary.done_count(), 1);
        assert_eq!(summary.failed_count(), 1);
        assert!(!summary.is_success());

        let text = summary.render();
        assert!(text.contains("failed at sim"));
        assert!(text.contains("tool/transient"));
        assert!(text.contains("log.2.txt"));
    }
}
