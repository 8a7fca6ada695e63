//! Deterministic construction of outbound task payloads.
//!
//! The builder is pure with respect to (design context, task memory
//! snapshot, stage): the same inputs yield byte-identical payloads. Task
//! identity and timestamps are added later, when the envelope is created.

use std::path::PathBuf;
use std::sync::Arc;

use crate::contracts::{
    DistilledDataset, FailureContext, NodeContext, ReflectionInsights, StageContext,
};
use crate::design::{DesignContext, DesignInputError};
use crate::memory::TaskMemory;
use crate::state_machine::Stage;

use super::dlq_classifier::failure_signature;

/// Simulation-failure context the coordinator accumulates across a repair
/// cycle and threads into distill/reflect/debug payloads.
#[derive(Debug, Clone, Default)]
pub struct RepairContext {
    pub failure: Option<FailureContext>,
    pub distilled_dataset: Option<DistilledDataset>,
    pub reflection_insights: Option<ReflectionInsights>,
}

pub struct ContextBuilder {
    design: Arc<DesignContext>,
    artifacts_root: PathBuf,
    sim_timeout_secs: u64,
}

impl ContextBuilder {
    pub fn new(design: Arc<DesignContext>, artifacts_root: impl Into<PathBuf>) -> Self {
        Self {
            design,
            artifacts_root: artifacts_root.into(),
            sim_timeout_secs: Stage::Simulation.default_deadline().as_secs(),
        }
    }

    pub fn with_sim_timeout_secs(mut self, secs: u64) -> Self {
        self.sim_timeout_secs = secs;
        self
    }

    fn node_context(
        &self,
        node_id: &str,
        memory: &TaskMemory,
    ) -> Result<NodeContext, DesignInputError> {
        let node = self.design.node(node_id)?;
        let rtl_path = node.rtl_path(&self.artifacts_root);
        let testbench_path = node.testbench_path(&self.artifacts_root, node_id);

        let mut prior_artifacts = std::collections::BTreeMap::new();
        for stage in [
            Stage::Implementation,
            Stage::Lint,
            Stage::Testbench,
            Stage::Simulation,
            Stage::Distill,
            Stage::Reflect,
            Stage::Debug,
        ] {
            let artifact_path = memory.get_artifact_path(node_id, stage);
            let log_path = memory.last_log_path(node_id, stage);
            if artifact_path.is_some() || log_path.is_some() {
                prior_artifacts.insert(
                    stage.dir_name().to_string(),
                    crate::contracts::PriorArtifact {
                        artifact_path,
                        log_path,
                    },
                );
            }
        }

        Ok(NodeContext {
            node_id: node_id.to_string(),
            interface: node.interface.clone(),
            clocking: node.clocking.clone(),
            rtl_path,
            testbench_path,
            design_context_hash: self.design.design_context_hash.clone(),
            library_refs: self.design.standard_library.clone(),
            coverage_goals: node.coverage_goals.clone(),
            prior_artifacts,
            settings: None,
        })
    }

    /// Scenario names the testbench should exercise, derived from coverage
    /// goals when the planner supplied them.
    fn test_plan(node: &NodeContext) -> Vec<String> {
        let mut plan = vec![
            "reset_behavior".to_string(),
            "basic_operation".to_string(),
        ];
        if let Some(goals) = node.coverage_goals.as_ref().and_then(|g| g.as_object()) {
            let mut keys: Vec<String> = goals.keys().cloned().collect();
            keys.sort();
            plan.extend(keys);
        }
        plan
    }

    fn spec_summary(&self, node_id: &str, node: &NodeContext) -> String {
        let inputs = node
            .interface
            .signals
            .iter()
            .filter(|s| s.direction == crate::contracts::SignalDirection::Input)
            .count();
        let outputs = node.interface.signals.len() - inputs;
        format!(
            "Module {node_id}: {inputs} input port(s), {outputs} output port(s), \
             clocked at {} Hz, reset {} ({})",
            node.clocking.clk.freq_hz,
            node.clocking.clk.reset,
            if node.clocking.clk.reset_active_low {
                "active-low"
            } else {
                "active-high"
            },
        )
    }

    /// Build the stage payload for a node.
    ///
    /// `repair` carries accumulated simulation-failure context and is only
    /// consulted by the distill/reflect/debug stages.
    pub fn build(
        &self,
        node_id: &str,
        stage: Stage,
        memory: &TaskMemory,
        repair: &RepairContext,
    ) -> Result<StageContext, DesignInputError> {
        let node = self.node_context(node_id, memory)?;

        let context = match stage {
            Stage::Implementation => {
                let spec_summary = self.spec_summary(node_id, &node);
                StageContext::Implementation {
                    node,
                    spec_summary: Some(spec_summary),
                }
            }
            Stage::Testbench => {
                let rtl_artifact = memory
                    .get_artifact_path(node_id, Stage::Implementation)
                    .unwrap_or_else(|| node.rtl_path.clone());
                let test_plan = Self::test_plan(&node);
                StageContext::Testbench {
                    node,
                    test_plan,
                    rtl_artifact,
                }
            }
            Stage::Lint => {
                let artifact = memory
                    .get_artifact_path(node_id, Stage::Implementation)
                    .unwrap_or_else(|| node.rtl_path.clone());
                StageContext::Lint {
                    node,
                    artifact,
                    tool_flags: vec!["-Wall".to_string()],
                }
            }
            Stage::Simulation => {
                let rtl_artifact = memory
                    .get_artifact_path(node_id, Stage::Implementation)
                    .unwrap_or_else(|| node.rtl_path.clone());
                let testbench_artifact = memory
                    .get_artifact_path(node_id, Stage::Testbench)
                    .unwrap_or_else(|| node.testbench_path.clone());
                StageContext::Simulation {
                    node,
                    rtl_artifact,
                    testbench_artifact,
                    tool_timeout_secs: self.sim_timeout_secs,
                }
            }
            Stage::Distill => {
                let sim_log_path = memory
                    .last_log_path(node_id, Stage::Simulation)
                    .unwrap_or_else(|| {
                        memory.stage_dir(node_id, Stage::Simulation).join("log.txt")
                    });
                StageContext::Distill {
                    node,
                    sim_log_path,
                    failure: repair.failure.clone(),
                }
            }
            Stage::Reflect => {
                let sim_log_path = memory
                    .last_log_path(node_id, Stage::Simulation)
                    .unwrap_or_else(|| {
                        memory.stage_dir(node_id, Stage::Simulation).join("log.txt")
                    });
                StageContext::Reflect {
                    node,
                    distilled_dataset: repair.distilled_dataset.clone(),
                    sim_log_path,
                    failure: repair.failure.clone(),
                }
            }
            Stage::Debug => {
                let failing_rtl_path = memory
                    .get_artifact_path(node_id, Stage::Implementation)
                    .unwrap_or_else(|| node.rtl_path.clone());
                let signature = repair
                    .failure
                    .as_ref()
                    .map(|f| failure_signature(&f.failure_log_excerpt))
                    .unwrap_or_else(|| failure_signature(""));
                StageContext::Debug {
                    node,
                    failing_rtl_path,
                    failure_signature: signature,
                    reflection_insights: repair.reflection_insights.clone(),
                    failure: repair.failure.clone(),
                }
            }
        };

        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::DesignContext;

    const DESIGN: &str = r#"{
        "design_context_hash": "3f6c2a9b1d4e8f07",
        "standard_library": {},
        "nodes": {
            "counter4": {
                "rtl_file": "rtl/counter4.sv",
                "testbench_file": "rtl/counter4_tb.sv",
                "interface": {
                    "signals": [
                        {"name": "clk", "direction": "input", "width": 1},
                        {"name": "rst_n", "direction": "input", "width": 1},
                        {"name": "count", "direction": "output", "width": 4}
                    ]
                },
                "clocking": {
                    "clk": {"freq_hz": 100000000.0, "reset": "rst_n", "reset_active_low": true}
                },
                "coverage_goals": {"toggle": 0.9, "line": 0.95}
            }
        }
    }"#;

    fn builder_and_memory(dir: &tempfile::TempDir) -> (ContextBuilder, TaskMemory) {
        let design: DesignContext = serde_json::from_str(DESIGN).unwrap();
        let artifacts_root = dir.path().join("artifacts");
        let memory = TaskMemory::new(dir.path().join("task_memory"), &artifacts_root).unwrap();
        (
            ContextBuilder::new(Arc::new(design), artifacts_root),
            memory,
        )
    }

    #[test]
    fn test_builder_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, memory) = builder_and_memory(&dir);
        let repair = RepairContext::default();

        for stage in [Stage::Implementation, Stage::Lint, Stage::Testbench] {
            let a = builder.build("counter4", stage, &memory, &repair).unwrap();
            let b = builder.build("counter4", stage, &memory, &repair).unwrap();
            assert_eq!(
                serde_json::to_string(&a).unwrap(),
                serde_json::to_string(&b).unwrap()
            );
        }
    }

    #[test]
    fn test_implementation_payload() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, memory) = builder_and_memory(&dir);
        let ctx = builder
            .build(
                "counter4",
                Stage::Implementation,
                &memory,
                &RepairContext::default(),
            )
            .unwrap();
        match ctx {
            StageContext::Implementation { node, spec_summary } => {
                assert_eq!(node.node_id, "counter4");
                assert_eq!(node.interface.signals.len(), 3);
                assert!(node.rtl_path.ends_with("rtl/counter4.sv"));
                let summary = spec_summary.unwrap();
                assert!(summary.contains("2 input"));
                assert!(summary.contains("active-low"));
            }
            other => panic!("wrong payload: {other:?}"),
        }
    }

    #[test]
    fn test_testbench_plan_includes_coverage_goals() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, memory) = builder_and_memory(&dir);
        let ctx = builder
            .build(
                "counter4",
                Stage::Testbench,
                &memory,
                &RepairContext::default(),
            )
            .unwrap();
        match ctx {
            StageContext::Testbench { test_plan, .. } => {
                assert!(test_plan.contains(&"reset_behavior".to_string()));
                assert!(test_plan.contains(&"line".to_string()));
                assert!(test_plan.contains(&"toggle".to_string()));
            }
            other => panic!("wrong payload: {other:?}"),
        }
    }

    #[test]
    fn test_debug_payload_carries_signature_and_insights() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, memory) = builder_and_memory(&dir);
        let repair = RepairContext {
            failure: Some(FailureContext {
                failure_stage: "sim".to_string(),
                failure_log_excerpt: "ERROR: assertion failed at t=40ns".to_string(),
                failure_log_path: dir.path().join("log.txt"),
                failure_artifact_path: None,
            }),
            distilled_dataset: None,
            reflection_insights: Some(ReflectionInsights {
                hypotheses: vec!["reset polarity inverted".to_string()],
                likely_failure_points: vec![],
                recommended_probes: vec![],
                confidence_score: 0.8,
                analysis_notes: "notes".to_string(),
            }),
        };
        let ctx = builder
            .build("counter4", Stage::Debug, &memory, &repair)
            .unwrap();
        match ctx {
            StageContext::Debug {
                failure_signature,
                reflection_insights,
                failure,
                ..
            } => {
                assert!(failure_signature.starts_with("sig:"));
                assert!(reflection_insights.is_some());
                assert_eq!(failure.unwrap().failure_stage, "sim");
            }
            other => panic!("wrong payload: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_node_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, memory) = builder_and_memory(&dir);
        assert!(builder
            .build("ghost", Stage::Lint, &memory, &RepairContext::default())
            .is_err());
    }

    #[test]
    fn test_prior_artifacts_threaded_through() {
        let dir = tempfile::tempdir().unwrap();
        let (builder, memory) = builder_and_memory(&dir);

        // Record an implementation artifact, then check lint sees it.
        let rtl = dir.path().join("artifacts/rtl/counter4.sv");
        std::fs::create_dir_all(rtl.parent().unwrap()).unwrap();
        std::fs::write(&rtl, "module counter4; endmodule").unwrap();

        let task = crate::contracts::TaskMessage::new(
            uuid::Uuid::new_v4(),
            crate::contracts::TaskPriority::default(),
            builder
                .build(
                    "counter4",
                    Stage::Implementation,
                    &memory,
                    &RepairContext::default(),
                )
                .unwrap(),
        );
        let result = crate::contracts::ResultMessage::success(&task, "implemented")
            .with_artifacts_path(rtl.to_string_lossy().into_owned());
        memory
            .record_result("counter4", Stage::Implementation, 1, &result)
            .unwrap();

        let ctx = builder
            .build("counter4", Stage::Lint, &memory, &RepairContext::default())
            .unwrap();
        match ctx {
            StageContext::Lint { node: n, artifact, .. } => {
                assert_eq!(artifact, rtl);
                assert!(n.prior_artifacts.contains_key("impl"));
            }
            other => panic!("wrong payload: {other:?}"),
        }
    }
}
