//! End-to-end orchestrator scenarios against the in-memory transport with
//! scripted workers.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use rtlforge::config::ForgeConfig;
use rtlforge::contracts::{
    DistilledDataset, ReflectionInsights, ResultMessage, StageContext, TaskMessage, TaskStatus,
};
use rtlforge::design::{DagPlan, DesignContext};
use rtlforge::events::EventEmitter;
use rtlforge::messaging::{InMemoryTaskTransport, TaskTransport};
use rtlforge::orchestration::Coordinator;
use rtlforge::state_machine::{NodeState, Stage};

const DESIGN_SINGLE: &str = r#"{
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
            }
        }
    }
}"#;

const DESIGN_CHAIN: &str = r#"{
    "design_context_hash": "3f6c2a9b1d4e8f07",
    "standard_library": {},
    "nodes": {
        "counter4": {
            "rtl_file": "rtl/counter4.sv",
            "interface": {
                "signals": [
                    {"name": "clk", "direction": "input", "width": 1},
                    {"name": "rst_n", "direction": "input", "width": 1},
                    {"name": "count", "direction": "output", "width": 4}
                ]
            },
            "clocking": {
                "clk": {"freq_hz": 100000000.0, "reset": "rst_n", "reset_active_low": true}
            }
        },
        "alu": {
            "rtl_file": "rtl/alu.sv",
            "interface": {
                "signals": [
                    {"name": "clk", "direction": "input", "width": 1},
                    {"name": "a", "direction": "input", "width": 8},
                    {"name": "y", "direction": "output", "width": 8}
                ]
            },
            "clocking": {
                "clk": {"freq_hz": 100000000.0, "reset": "rst_n", "reset_active_low": true}
            }
        }
    }
}"#;

const GOOD_RTL: &str = "\
module counter4 (
    input  logic clk,
    input  logic rst_n,
    output logic [3:0] count
);
  always_ff @(posedge clk or negedge rst_n)
    if (!rst_n) count <= '0;
    else count <= count + 1'b1;
endmodule
";

const BAD_RTL: &str = "\
module counter4 (
    input  logic clk,
    input  logic rst_n
);
endmodule
";

const GOOD_TB: &str = "\
module counter4_tb;
  logic clk;
  logic rst_n;
  logic [3:0] count;

  counter4 dut (.clk(clk), .rst_n(rst_n), .count(count));

  initial begin
    clk = 0;
    rst_n = 0;
    #20 rst_n = 1;
  end
  always #5 clk = ~clk;
endmodule
";

fn dag_plan(json: &str) -> DagPlan {
    serde_json::from_str(json).unwrap()
}

fn single_node_plan() -> DagPlan {
    dag_plan(
        r#"{"nodes": [
            {"id": "counter4", "type": "module", "deps": [], "state": "PENDING", "artifacts": {}, "metrics": {}}
        ]}"#,
    )
}

fn chain_plan() -> DagPlan {
    dag_plan(
        r#"{"nodes": [
            {"id": "counter4", "type": "module", "deps": [], "state": "PENDING", "artifacts": {}, "metrics": {}},
            {"id": "alu", "type": "module", "deps": ["counter4"], "state": "PENDING", "artifacts": {}, "metrics": {}}
        ]}"#,
    )
}

fn test_config(dir: &tempfile::TempDir) -> ForgeConfig {
    let mut config = ForgeConfig::default();
    config.artifacts_root = dir.path().join("artifacts");
    config.task_memory_root = dir.path().join("task_memory");
    config.idle_sleep = Duration::from_millis(2);
    config.run_deadline = Some(Duration::from_secs(10));
    config
}

/// Scripted worker behavior knobs.
#[derive(Default)]
struct WorkerScript {
    /// Fail this many simulation attempts before succeeding.
    sim_failures: AtomicU32,
    /// Log the failing simulations report.
    sim_failure_log: String,
    /// Write RTL that drops the `count` output port.
    emit_bad_rtl: AtomicBool,
    /// Ignore lint tasks entirely (consume nothing), forcing timeouts.
    ignore_lint: AtomicBool,
    /// Ignore testbench tasks, leaving them in flight.
    ignore_testbench: AtomicBool,
}

impl WorkerScript {
    fn with_sim_failures(count: u32, log: &str) -> Self {
        Self {
            sim_failures: AtomicU32::new(count),
            sim_failure_log: log.to_string(),
            ..Default::default()
        }
    }
}

async fn handle_task(
    script: &WorkerScript,
    artifacts_root: &std::path::Path,
    task: &TaskMessage,
) -> Option<ResultMessage> {
    match &task.context {
        StageContext::Implementation { node, .. } => {
            let rtl = if script.emit_bad_rtl.load(Ordering::Relaxed) {
                BAD_RTL
            } else {
                GOOD_RTL
            };
            std::fs::create_dir_all(node.rtl_path.parent().unwrap()).unwrap();
            std::fs::write(&node.rtl_path, rtl).unwrap();
            Some(
                ResultMessage::success(task, "implementation generated")
                    .with_artifacts_path(node.rtl_path.to_string_lossy().into_owned()),
            )
        }
        StageContext::Lint { .. } => Some(ResultMessage::success(task, "verilator: exit 0")),
        StageContext::Testbench { node, .. } => {
            std::fs::create_dir_all(node.testbench_path.parent().unwrap()).unwrap();
            std::fs::write(&node.testbench_path, GOOD_TB).unwrap();
            Some(
                ResultMessage::success(task, "testbench generated")
                    .with_artifacts_path(node.testbench_path.to_string_lossy().into_owned()),
            )
        }
        StageContext::Simulation { .. } => {
            let remaining = script.sim_failures.load(Ordering::Relaxed);
            if remaining > 0 {
                script.sim_failures.store(remaining - 1, Ordering::Relaxed);
                Some(ResultMessage::failure(task, &script.sim_failure_log))
            } else {
                Some(ResultMessage::success(task, "simulation passed: exit 0"))
            }
        }
        StageContext::Distill { node, .. } => {
            let dataset_path = artifacts_root.join(format!("distilled/{}.json", node.node_id));
            std::fs::create_dir_all(dataset_path.parent().unwrap()).unwrap();
            std::fs::write(&dataset_path, b"{\"log_excerpt\": \"assertion failed\"}").unwrap();
            Some(
                ResultMessage::success(task, "distillation complete").with_distilled_dataset(
                    DistilledDataset {
                        original_data_size: 4096,
                        distilled_data_size: 128,
                        compression_ratio: 32.0,
                        failure_focus_areas: vec!["sim_log".to_string()],
                        data_path: dataset_path.to_string_lossy().into_owned(),
                    },
                ),
            )
        }
        StageContext::Reflect { .. } => Some(
            ResultMessage::success(task, "reflection complete").with_reflection_insights(
                ReflectionInsights {
                    hypotheses: vec!["reset polarity inverted".to_string()],
                    likely_failure_points: vec!["rst_n handling".to_string()],
                    recommended_probes: vec!["dump count on reset".to_string()],
                    confidence_score: 0.8,
                    analysis_notes: "counter never leaves reset".to_string(),
                },
            ),
        ),
        StageContext::Debug { .. } => Some(ResultMessage::success(task, "patch applied to RTL")),
    }
}

/// Spawn a worker that services the three task queues until aborted.
fn spawn_worker(
    transport: Arc<InMemoryTaskTransport>,
    script: Arc<WorkerScript>,
    artifacts_root: std::path::PathBuf,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let queues = ["agent_tasks", "process_tasks", "simulation_tasks"];
        loop {
            for queue in queues {
                let Ok(Some(delivery)) = transport.recv_task(queue, Duration::from_millis(2)).await
                else {
                    continue;
                };
                let task = TaskMessage::from_bytes(&delivery.payload).unwrap();

                if matches!(task.context, StageContext::Lint { .. })
                    && script.ignore_lint.load(Ordering::Relaxed)
                {
                    // Leave unacked; the orchestrator's deadline fires.
                    continue;
                }
                if matches!(task.context, StageContext::Testbench { .. })
                    && script.ignore_testbench.load(Ordering::Relaxed)
                {
                    continue;
                }

                if let Some(result) = handle_task(&script, &artifacts_root, &task).await {
                    transport.publish_result(&result).await.unwrap();
                }
                transport.ack_task(queue, delivery.delivery_tag).await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
}

async fn build_coordinator(
    transport: &Arc<InMemoryTaskTransport>,
    config: &ForgeConfig,
    design_json: &str,
    plan: &DagPlan,
) -> Coordinator<InMemoryTaskTransport> {
    let design: DesignContext = serde_json::from_str(design_json).unwrap();
    Coordinator::new(
        Arc::clone(transport),
        config.clone(),
        Arc::new(design),
        plan,
        EventEmitter::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_happy_path_single_node() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let transport = Arc::new(InMemoryTaskTransport::new());
    transport.declare_topology().await.unwrap();

    let script = Arc::new(WorkerScript::default());
    let worker = spawn_worker(
        Arc::clone(&transport),
        Arc::clone(&script),
        config.artifacts_root.clone(),
    );

    let mut coordinator =
        build_coordinator(&transport, &config, DESIGN_SINGLE, &single_node_plan()).await;
    let summary = coordinator.run().await.unwrap();
    worker.abort();

    assert!(summary.is_success(), "summary: {}", summary.render());
    let node = coordinator.dag().node("counter4").unwrap();
    assert_eq!(node.state, NodeState::Done);

    // Six stage directories, each with a SUCCESS result recorded.
    for stage in Stage::SUCCESS_ORDER {
        let result = coordinator
            .memory()
            .last_result("counter4", stage)
            .unwrap_or_else(|| panic!("missing result for {stage}"));
        assert_eq!(result.status, TaskStatus::Success, "stage {stage}");
        assert_eq!(node.attempt_count(stage), 1, "stage {stage}");
    }
    assert_eq!(transport.dead_letter_len().await, 0);
}

#[tokio::test]
async fn test_transient_simulator_failure_retries_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let transport = Arc::new(InMemoryTaskTransport::new());
    transport.declare_topology().await.unwrap();

    let script = Arc::new(WorkerScript::with_sim_failures(
        1,
        "tool/transient: simulator exited unexpectedly",
    ));
    let worker = spawn_worker(
        Arc::clone(&transport),
        Arc::clone(&script),
        config.artifacts_root.clone(),
    );

    let mut coordinator =
        build_coordinator(&transport, &config, DESIGN_SINGLE, &single_node_plan()).await;
    let summary = coordinator.run().await.unwrap();
    worker.abort();

    assert!(summary.is_success(), "summary: {}", summary.render());
    let node = coordinator.dag().node("counter4").unwrap();
    assert_eq!(node.state, NodeState::Done);
    assert_eq!(node.attempt_count(Stage::Simulation), 2);
    // The retry consumed the stage budget but never entered repair.
    assert_eq!(node.attempt_count(Stage::Debug), 0);
    assert_eq!(node.failed_repair_cycles, 0);
}

#[tokio::test]
async fn test_repair_cycle_recovers_failing_simulation() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let transport = Arc::new(InMemoryTaskTransport::new());
    transport.declare_topology().await.unwrap();

    // Two assertion failures: the retry burns one, the second enters the
    // repair cycle, and the post-debug simulation passes.
    let script = Arc::new(WorkerScript::with_sim_failures(
        2,
        "ERROR: assertion failed at t=40ns: count expected 1 got 0",
    ));
    let worker = spawn_worker(
        Arc::clone(&transport),
        Arc::clone(&script),
        config.artifacts_root.clone(),
    );

    let mut coordinator =
        build_coordinator(&transport, &config, DESIGN_SINGLE, &single_node_plan()).await;
    let summary = coordinator.run().await.unwrap();
    worker.abort();

    assert!(summary.is_success(), "summary: {}", summary.render());
    let node = coordinator.dag().node("counter4").unwrap();
    assert_eq!(node.state, NodeState::Done);
    assert_eq!(node.attempt_count(Stage::Debug), 1);
    assert_eq!(node.attempt_count(Stage::Simulation), 3);
    assert!(!node.repair_active);
}

#[tokio::test]
async fn test_interface_mismatch_is_terminal_and_blocks_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let transport = Arc::new(InMemoryTaskTransport::new());
    transport.declare_topology().await.unwrap();

    let script = Arc::new(WorkerScript::default());
    script.emit_bad_rtl.store(true, Ordering::Relaxed);
    let worker = spawn_worker(
        Arc::clone(&transport),
        Arc::clone(&script),
        config.artifacts_root.clone(),
    );

    let mut coordinator = build_coordinator(&transport, &config, DESIGN_CHAIN, &chain_plan()).await;
    let summary = coordinator.run().await.unwrap();
    worker.abort();

    assert!(!summary.is_success());
    let node = coordinator.dag().node("counter4").unwrap();
    assert_eq!(node.state, NodeState::Failed);
    // Postcondition violations never retry.
    assert_eq!(node.attempt_count(Stage::Implementation), 1);
    assert_eq!(
        node.failure.as_ref().unwrap().reason,
        "postcondition/interface_mismatch"
    );

    // The worker's result is preserved in task memory.
    let result = coordinator
        .memory()
        .last_result("counter4", Stage::Implementation)
        .unwrap();
    assert_eq!(result.status, TaskStatus::Success);
    let marker = coordinator
        .memory()
        .stage_dir("counter4", Stage::Implementation)
        .join("postcondition_failure.json");
    assert!(marker.exists());

    // Dependents are never enqueued.
    let dependent = coordinator.dag().node("alu").unwrap();
    assert_eq!(dependent.state, NodeState::Pending);
    assert_eq!(dependent.attempt_count(Stage::Implementation), 0);
}

#[tokio::test]
async fn test_lint_timeout_retries_then_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.stage_timeouts.lint = Duration::from_millis(50);
    let transport = Arc::new(InMemoryTaskTransport::new());
    transport.declare_topology().await.unwrap();

    let script = Arc::new(WorkerScript::default());
    script.ignore_lint.store(true, Ordering::Relaxed);
    let worker = spawn_worker(
        Arc::clone(&transport),
        Arc::clone(&script),
        config.artifacts_root.clone(),
    );

    let mut coordinator =
        build_coordinator(&transport, &config, DESIGN_SINGLE, &single_node_plan()).await;
    let summary = coordinator.run().await.unwrap();
    worker.abort();

    assert!(!summary.is_success());
    let node = coordinator.dag().node("counter4").unwrap();
    assert_eq!(node.state, NodeState::Failed);
    assert_eq!(node.attempt_count(Stage::Lint), 2);
    let failure = node.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Stage::Lint);
    assert_eq!(failure.reason, "timeout");

    // Each expiry synthesized exactly one failure result.
    let attempts = coordinator.memory().list_attempts("counter4", Stage::Lint);
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|a| a.result_path.is_some()));
}

#[tokio::test]
async fn test_restart_mid_stage_republishes_and_quarantines_stale_result() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let transport = Arc::new(InMemoryTaskTransport::new());
    transport.declare_topology().await.unwrap();

    let script = Arc::new(WorkerScript::default());
    script.ignore_testbench.store(true, Ordering::Relaxed);
    let worker = spawn_worker(
        Arc::clone(&transport),
        Arc::clone(&script),
        config.artifacts_root.clone(),
    );

    // First orchestrator: run ticks until the testbench stage is in
    // flight, then "crash".
    let old_task_id = {
        let mut coordinator =
            build_coordinator(&transport, &config, DESIGN_SINGLE, &single_node_plan()).await;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            coordinator.tick().await.unwrap();
            let node = coordinator.dag().node("counter4").unwrap();
            if node.state == NodeState::Testbenching {
                if let Some(in_flight) = &node.in_flight {
                    break in_flight.task_id;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "testbench never went in flight"
            );
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    worker.abort();

    // Restart: recovery sees impl and lint SUCCESS, no in-flight state,
    // and re-publishes the testbench stage under a fresh task id.
    let mut coordinator =
        build_coordinator(&transport, &config, DESIGN_SINGLE, &single_node_plan()).await;
    {
        let node = coordinator.dag().node("counter4").unwrap();
        assert_eq!(node.state, NodeState::Testbenching);
        assert!(node.in_flight.is_none());
    }

    coordinator.tick().await.unwrap();
    let new_task_id = coordinator
        .dag()
        .node("counter4")
        .unwrap()
        .in_flight
        .as_ref()
        .unwrap()
        .task_id;
    assert_ne!(new_task_id, old_task_id);

    // The old worker finally answers; its result no longer correlates and
    // is quarantined.
    let stale = ResultMessage {
        task_id: old_task_id,
        correlation_id: Uuid::new_v4(),
        completed_at: chrono::Utc::now(),
        status: TaskStatus::Success,
        artifacts_path: None,
        log_output: "stale testbench result".to_string(),
        reflections: None,
        metrics: None,
        distilled_dataset: None,
        reflection_insights: None,
    };
    transport.publish_result(&stale).await.unwrap();
    coordinator.tick().await.unwrap();

    assert_eq!(transport.dead_letter_len().await, 1);
    // The fresh attempt is still in flight and unharmed.
    let node = coordinator.dag().node("counter4").unwrap();
    assert_eq!(node.state, NodeState::Testbenching);
    assert_eq!(node.in_flight.as_ref().unwrap().task_id, new_task_id);
}

#[tokio::test]
async fn test_malformed_result_rejected_to_dlq() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let transport = Arc::new(InMemoryTaskTransport::new());
    transport.declare_topology().await.unwrap();

    let mut coordinator =
        build_coordinator(&transport, &config, DESIGN_SINGLE, &single_node_plan()).await;

    // Hand-inject garbage into the results queue.
    let garbage = ResultMessage {
        task_id: Uuid::new_v4(),
        correlation_id: Uuid::new_v4(),
        completed_at: chrono::Utc::now(),
        status: TaskStatus::Success,
        artifacts_path: None,
        log_output: "   ".to_string(), // SUCCESS with empty log is invalid
        reflections: None,
        metrics: None,
        distilled_dataset: None,
        reflection_insights: None,
    };
    transport.publish_result(&garbage).await.unwrap();
    coordinator.tick().await.unwrap();

    assert_eq!(transport.dead_letter_len().await, 1);
}
