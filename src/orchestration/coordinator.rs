//! The orchestrator loop: sole writer of DAG execution state.
//!
//! Single-threaded decision logic with asynchronous I/O for broker
//! operations. One tick: drain ready results, apply them, scan for
//! schedulable stages and publish, expire deadlines, then sleep briefly if
//! nothing changed. The loop never holds a lock across a broker round
//! trip; workers run out of process and share no memory with it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::config::ForgeConfig;
use crate::contracts::{
    validate_result, validate_task, FailureContext, ResultMessage, TaskMessage, TaskStatus,
};
use crate::design::{DagPlan, DesignContext, ExecutionDag, FailureRecord, InFlight};
use crate::error::{ForgeError, Result};
use crate::events::{EventEmitter, RunEvent};
use crate::memory::TaskMemory;
use crate::messaging::{Delivery, TaskTransport};
use crate::state_machine::{
    check_stage, NodeEvent, NodeState, NodeStateMachine, PostconditionInputs, Stage,
};

use super::context_builder::{ContextBuilder, RepairContext};
use super::dlq_classifier::{DlqClassifier, FailureDisposition, FailureFingerprint};
use super::summary::{RunOutcome, RunSummary};

/// Log excerpt cap when threading failure context into repair payloads.
const FAILURE_LOG_EXCERPT_CHARS: usize = 1600;

/// Failed repair cycles after which a node is forced to FAILED.
const MAX_REPAIR_CYCLES: u32 = 2;

pub struct Coordinator<T: TaskTransport> {
    transport: Arc<T>,
    config: ForgeConfig,
    design: Arc<DesignContext>,
    dag: ExecutionDag,
    memory: TaskMemory,
    builder: ContextBuilder,
    classifier: DlqClassifier,
    emitter: EventEmitter,
    repairs: HashMap<String, RepairContext>,
}

impl<T: TaskTransport> Coordinator<T> {
    pub fn new(
        transport: Arc<T>,
        config: ForgeConfig,
        design: Arc<DesignContext>,
        plan: &DagPlan,
        emitter: EventEmitter,
    ) -> Result<Self> {
        let memory = TaskMemory::new(&config.task_memory_root, &config.artifacts_root)?;
        let builder = ContextBuilder::new(Arc::clone(&design), config.artifacts_root.clone())
            .with_sim_timeout_secs(config.stage_timeouts.simulation.as_secs());
        let dag = ExecutionDag::from_plan(plan)?;

        let mut coordinator = Self {
            transport,
            config,
            design,
            dag,
            memory,
            builder,
            classifier: DlqClassifier::new(),
            emitter,
            repairs: HashMap::new(),
        };
        coordinator.recover_from_memory();
        Ok(coordinator)
    }

    pub fn dag(&self) -> &ExecutionDag {
        &self.dag
    }

    pub fn memory(&self) -> &TaskMemory {
        &self.memory
    }

    /// Restart recovery: nothing in-flight survives a crash, so each node
    /// resumes at the first stage of the success path without a recorded
    /// SUCCESS result. Recorded attempts keep counting against the retry
    /// budget.
    fn recover_from_memory(&mut self) {
        for node_id in self.dag.node_ids() {
            let mut state = NodeState::Pending;
            let mut recovered = false;
            for stage in Stage::SUCCESS_ORDER {
                match self.memory.last_result(&node_id, stage) {
                    Some(result) if result.status == TaskStatus::Success => {
                        recovered = true;
                        state = match stage {
                            Stage::Reflect => NodeState::Done,
                            _ => {
                                NodeState::for_stage(Self::next_success_stage(stage))
                            }
                        };
                    }
                    _ => break,
                }
            }
            if let Some(node) = self.dag.node_mut(&node_id) {
                if recovered {
                    info!(%node_id, %state, "recovered node state from task memory");
                    node.state = state;
                }
                for stage in Stage::SUCCESS_ORDER.into_iter().chain([Stage::Debug]) {
                    let completed = self
                        .memory
                        .list_attempts(&node_id, stage)
                        .into_iter()
                        .filter(|a| a.result_path.is_some())
                        .count() as u32;
                    if completed > 0 {
                        node.attempts.insert(stage, completed);
                    }
                }
            }
        }
    }

    fn next_success_stage(stage: Stage) -> Stage {
        match stage {
            Stage::Implementation => Stage::Lint,
            Stage::Lint => Stage::Testbench,
            Stage::Testbench => Stage::Simulation,
            Stage::Simulation => Stage::Distill,
            Stage::Distill => Stage::Reflect,
            Stage::Reflect | Stage::Debug => Stage::Reflect,
        }
    }

    /// Drive the run to termination.
    pub async fn run(&mut self) -> Result<RunSummary> {
        self.transport.declare_topology().await?;

        let run_deadline = self.config.run_deadline.map(|d| Instant::now() + d);
        let mut transport_failures = 0u32;
        let outcome = loop {
            // Transient broker trouble gets bounded exponential backoff
            // before the run aborts with a terminal error.
            let progressed = match self.tick().await {
                Ok(progressed) => {
                    transport_failures = 0;
                    progressed
                }
                Err(ForgeError::Messaging(e))
                    if e.is_transient()
                        && transport_failures < self.config.reconnect.max_attempts =>
                {
                    transport_failures += 1;
                    let delay = (self.config.reconnect.base_delay
                        * 2u32.pow(transport_failures.saturating_sub(1)))
                    .min(self.config.reconnect.max_delay);
                    warn!(
                        attempt = transport_failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient transport failure in tick, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    false
                }
                Err(e) => return Err(e),
            };

            if self.dag.all_done() {
                break RunOutcome::Success;
            }
            if self.dag.is_stalled() {
                break RunOutcome::Failed;
            }
            if let Some(deadline) = run_deadline {
                if Instant::now() >= deadline {
                    warn!("run deadline elapsed before all nodes completed");
                    break RunOutcome::DeadlineExceeded;
                }
            }
            if !progressed {
                tokio::time::sleep(self.config.idle_sleep).await;
            }
        };

        let summary = RunSummary::from_dag(&self.dag, outcome);
        self.emitter.emit(RunEvent::RunFinished {
            done: summary.done_count(),
            failed: summary.failed_count(),
        });
        Ok(summary)
    }

    /// One scheduling tick. Returns whether anything changed.
    pub async fn tick(&mut self) -> Result<bool> {
        let mut progressed = false;

        // 1-2. Drain ready results without blocking and apply them.
        while let Some(delivery) = self
            .transport
            .recv_result(std::time::Duration::from_millis(1))
            .await?
        {
            self.apply_delivery(delivery).await?;
            progressed = true;
        }

        // 3. Scan for schedulable stages and publish.
        for node_id in self.dag.node_ids() {
            if let Some(stage) = self.next_stage_to_publish(&node_id) {
                self.start_node_if_pending(&node_id)?;
                self.publish_stage(&node_id, stage).await?;
                progressed = true;
            }
        }

        // 4. Expire deadlines, synthesizing one failure each.
        for node_id in self.expired_nodes() {
            self.synthesize_timeout(&node_id).await?;
            progressed = true;
        }

        Ok(progressed)
    }

    /// The stage that should be published for a node this tick, if any.
    fn next_stage_to_publish(&self, node_id: &str) -> Option<Stage> {
        let node = self.dag.node(node_id)?;
        if node.state.is_terminal() || node.in_flight.is_some() {
            return None;
        }
        if !self.dag.deps_satisfied(node_id) {
            return None;
        }
        match node.state {
            NodeState::Pending => Some(Stage::Implementation),
            state => state.stage(),
        }
    }

    fn start_node_if_pending(&mut self, node_id: &str) -> Result<()> {
        let node = self
            .dag
            .node_mut(node_id)
            .ok_or_else(|| ForgeError::orchestration(format!("unknown node {node_id}")))?;
        if node.state == NodeState::Pending {
            let target =
                NodeStateMachine::determine_target_state(node.state, &NodeEvent::Start, false)?;
            self.transition(node_id, target);
        }
        Ok(())
    }

    fn expired_nodes(&self) -> Vec<String> {
        let now = Instant::now();
        self.dag
            .nodes()
            .filter(|node| {
                node.in_flight
                    .as_ref()
                    .map_or(false, |f| f.deadline <= now)
            })
            .map(|node| node.id.clone())
            .collect()
    }

    fn transition(&mut self, node_id: &str, to: NodeState) {
        if let Some(node) = self.dag.node_mut(node_id) {
            let from = node.state;
            node.state = to;
            self.emitter.emit(RunEvent::StateTransition {
                node_id: node_id.to_string(),
                from,
                to,
            });
        }
    }

    /// Build, validate, record, and publish one stage attempt.
    async fn publish_stage(&mut self, node_id: &str, stage: Stage) -> Result<()> {
        let repair = self.repairs.get(node_id).cloned().unwrap_or_default();
        let context = match self.builder.build(node_id, stage, &self.memory, &repair) {
            Ok(context) => context,
            Err(e) => {
                error!(%node_id, %stage, error = %e, "context build failed");
                self.fail_node(node_id, stage, "context/build_failed")?;
                return Ok(());
            }
        };

        let (correlation_id, attempt) = {
            let node = self
                .dag
                .node_mut(node_id)
                .ok_or_else(|| ForgeError::orchestration(format!("unknown node {node_id}")))?;
            (node.correlation_id, node.record_attempt(stage))
        };

        let task = TaskMessage::new(correlation_id, self.config.default_priority, context);

        // Poison pills are stopped here, before any broker operation.
        if let Err(validation) = validate_task(&task) {
            warn!(%node_id, %stage, reason = validation.reason(), "task rejected at validation boundary");
            self.memory.record_json(
                node_id,
                stage,
                "validation_failure.json",
                &serde_json::json!({
                    "reason": validation.reason(),
                    "detail": validation.to_string(),
                }),
            )?;
            self.fail_node(node_id, stage, validation.reason())?;
            return Ok(());
        }

        self.memory.record_publish(node_id, stage, attempt, &task)?;

        let mut publish_attempts = 0u32;
        loop {
            publish_attempts += 1;
            match self.transport.publish_task(&task).await {
                Ok(()) => break,
                Err(e) if e.is_transient() && publish_attempts < self.config.publish_retry_limit => {
                    warn!(%node_id, %stage, attempt = publish_attempts, error = %e, "transient publish failure, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(
                        50 * u64::from(publish_attempts),
                    ))
                    .await;
                }
                Err(e) => {
                    error!(%node_id, %stage, error = %e, "publish failed");
                    self.fail_node(node_id, stage, "transport/publish_failed")?;
                    return Ok(());
                }
            }
        }

        let deadline = Instant::now() + self.config.stage_timeouts.for_stage(stage);
        if let Some(node) = self.dag.node_mut(node_id) {
            node.in_flight = Some(InFlight {
                stage,
                task_id: task.task_id,
                deadline,
            });
        }
        self.emitter.emit(RunEvent::TaskPublished {
            node_id: node_id.to_string(),
            stage,
            task_id: task.task_id,
            attempt,
        });
        Ok(())
    }

    /// Validate, correlate, record, and apply one result delivery, then
    /// ack or reject it.
    async fn apply_delivery(&mut self, delivery: Delivery) -> Result<()> {
        let result = match ResultMessage::from_bytes(&delivery.payload) {
            Ok(result) => result,
            Err(e) => {
                self.emitter.emit(RunEvent::ResultRejected {
                    task_id: None,
                    reason: format!("malformed result: {e}"),
                });
                self.transport
                    .reject_result(delivery.delivery_tag, "malformed result")
                    .await?;
                return Ok(());
            }
        };

        if let Err(validation) = validate_result(&result) {
            self.emitter.emit(RunEvent::ResultRejected {
                task_id: Some(result.task_id),
                reason: validation.reason().to_string(),
            });
            self.transport
                .reject_result(delivery.delivery_tag, validation.reason())
                .await?;
            return Ok(());
        }

        // Unknown or superseded task ids (e.g. a late result after a
        // timeout replaced the attempt) are quarantined.
        let Some((node_id, stage)) = self.dag.find_in_flight(result.task_id) else {
            self.emitter.emit(RunEvent::ResultRejected {
                task_id: Some(result.task_id),
                reason: "unknown task_id".to_string(),
            });
            self.transport
                .reject_result(delivery.delivery_tag, "unknown task_id")
                .await?;
            return Ok(());
        };

        self.apply_result(&node_id, stage, &result)?;
        self.transport.ack_result(delivery.delivery_tag).await?;
        Ok(())
    }

    /// Record the result and run the state machine. Shared by broker
    /// deliveries and synthesized timeouts.
    fn apply_result(&mut self, node_id: &str, stage: Stage, result: &ResultMessage) -> Result<()> {
        let attempt = self
            .dag
            .node(node_id)
            .map(|n| n.attempt_count(stage).max(1))
            .unwrap_or(1);

        let recorded = self.memory.record_result(node_id, stage, attempt, result)?;
        if let Some(node) = self.dag.node_mut(node_id) {
            node.in_flight = None;
            node.last_log_path = Some(recorded.log_path.clone());
            if let Some(artifact) = &recorded.artifact_path {
                node.artifacts.insert(
                    stage.dir_name().to_string(),
                    artifact.to_string_lossy().into_owned(),
                );
            }
            if let Some(metrics) = &result.metrics {
                node.metrics.insert(
                    format!("{}_cost", stage.dir_name()),
                    serde_json::json!({
                        "input_tokens": metrics.input_tokens,
                        "output_tokens": metrics.output_tokens,
                        "cost_usd": metrics.cost_usd,
                    }),
                );
            }
        }

        self.emitter.emit(RunEvent::ResultApplied {
            node_id: node_id.to_string(),
            stage,
            task_id: result.task_id,
            status: result.status,
        });

        match result.status {
            TaskStatus::Success => self.handle_success(node_id, stage, result),
            TaskStatus::Failure => {
                self.handle_failure(node_id, stage, result, attempt, &recorded.log_path)
            }
            TaskStatus::Escalated => {
                // Terminal for the DAG, but recorded distinctly so a human
                // can tell escalation from failure.
                self.memory.record_json(
                    node_id,
                    stage,
                    "escalated.json",
                    &serde_json::json!({
                        "task_id": result.task_id.to_string(),
                        "log_output": result.log_output,
                    }),
                )?;
                self.fail_node(node_id, stage, "worker/escalated")
            }
        }
    }

    fn handle_success(&mut self, node_id: &str, stage: Stage, result: &ResultMessage) -> Result<()> {
        let design_node = self.design.node(node_id).map_err(ForgeError::from)?;
        let rtl_path = self
            .memory
            .get_artifact_path(node_id, Stage::Implementation)
            .unwrap_or_else(|| design_node.rtl_path(&self.config.artifacts_root));
        let testbench_path = self
            .memory
            .get_artifact_path(node_id, Stage::Testbench)
            .unwrap_or_else(|| design_node.testbench_path(&self.config.artifacts_root, node_id));
        let inputs = PostconditionInputs {
            node_id,
            interface: &design_node.interface,
            rtl_path: &rtl_path,
            testbench_path: &testbench_path,
        };

        if let Err(violation) = check_stage(stage, result, inputs) {
            warn!(%node_id, %stage, reason = violation.reason(), detail = %violation, "postcondition failed");
            self.memory.record_json(
                node_id,
                stage,
                "postcondition_failure.json",
                &serde_json::json!({
                    "reason": violation.reason(),
                    "detail": violation.to_string(),
                }),
            )?;
            return self.fail_node(node_id, stage, violation.reason());
        }

        // Stage side products feed the repair cycle and task memory.
        match stage {
            Stage::Distill => {
                if let Some(dataset) = &result.distilled_dataset {
                    self.repairs
                        .entry(node_id.to_string())
                        .or_default()
                        .distilled_dataset = Some(dataset.clone());
                }
            }
            Stage::Reflect => {
                if let Some(insights) = &result.reflection_insights {
                    self.memory.record_json(
                        node_id,
                        Stage::Reflect,
                        "insights.json",
                        &serde_json::to_value(insights)?,
                    )?;
                    self.repairs
                        .entry(node_id.to_string())
                        .or_default()
                        .reflection_insights = Some(insights.clone());
                }
            }
            Stage::Simulation => {
                // A passing simulation closes any open repair cycle.
                if let Some(node) = self.dag.node_mut(node_id) {
                    if node.repair_active {
                        debug!(%node_id, "repair cycle resolved by passing simulation");
                        node.repair_active = false;
                    }
                }
                self.repairs.remove(node_id);
            }
            _ => {}
        }

        let repair_active = self
            .dag
            .node(node_id)
            .map(|n| n.repair_active)
            .unwrap_or(false);
        let current = self
            .dag
            .node(node_id)
            .map(|n| n.state)
            .ok_or_else(|| ForgeError::orchestration(format!("unknown node {node_id}")))?;
        let target = NodeStateMachine::determine_target_state(
            current,
            &NodeEvent::StageSucceeded(stage),
            repair_active,
        )?;
        self.transition(node_id, target);
        Ok(())
    }

    fn handle_failure(
        &mut self,
        node_id: &str,
        stage: Stage,
        result: &ResultMessage,
        attempt: u32,
        log_path: &std::path::Path,
    ) -> Result<()> {
        let (fingerprint, disposition) =
            self.classifier
                .classify_log(stage, attempt, &result.log_output);
        debug!(%node_id, %stage, attempt, ?fingerprint, ?disposition, "failure classified");

        match disposition {
            FailureDisposition::RetryOnce => {
                // Same stage, fresh task id on the next scan; the attempt
                // counter already advanced at publish time.
                info!(%node_id, %stage, "transient failure, retrying once");
                Ok(())
            }
            FailureDisposition::RejectToDlq => {
                self.fail_node(node_id, stage, Self::fingerprint_reason(fingerprint))
            }
            FailureDisposition::TerminalFail => {
                // Genuine simulation failures re-route through the repair
                // cycle while budget remains. Timeouts don't: there is no
                // simulation log to distill, and a second timeout is
                // terminal by policy.
                if stage == Stage::Simulation && fingerprint != FailureFingerprint::Timeout {
                    self.enter_or_exhaust_repair(node_id, result, log_path, fingerprint)
                } else {
                    self.fail_node(node_id, stage, Self::fingerprint_reason(fingerprint))
                }
            }
        }
    }

    /// Simulation failures with repair budget left re-route through the
    /// distill -> reflect -> debug cycle instead of failing the node.
    fn enter_or_exhaust_repair(
        &mut self,
        node_id: &str,
        result: &ResultMessage,
        log_path: &std::path::Path,
        fingerprint: FailureFingerprint,
    ) -> Result<()> {
        let exhausted = {
            let node = self
                .dag
                .node_mut(node_id)
                .ok_or_else(|| ForgeError::orchestration(format!("unknown node {node_id}")))?;
            if node.repair_active {
                node.failed_repair_cycles += 1;
            }
            node.failed_repair_cycles >= MAX_REPAIR_CYCLES
        };
        if exhausted {
            return self.fail_node(node_id, Stage::Simulation, "repair/exhausted");
        }

        let excerpt: String = result
            .log_output
            .chars()
            .take(FAILURE_LOG_EXCERPT_CHARS)
            .collect();
        let repair = self.repairs.entry(node_id.to_string()).or_default();
        repair.failure = Some(FailureContext {
            failure_stage: Stage::Simulation.dir_name().to_string(),
            failure_log_excerpt: excerpt,
            failure_log_path: log_path.to_path_buf(),
            failure_artifact_path: result.artifacts_path.clone(),
        });
        repair.distilled_dataset = None;
        repair.reflection_insights = None;

        let current = self
            .dag
            .node(node_id)
            .map(|n| n.state)
            .ok_or_else(|| ForgeError::orchestration(format!("unknown node {node_id}")))?;
        let target =
            NodeStateMachine::determine_target_state(current, &NodeEvent::EnterRepair, false)?;
        if let Some(node) = self.dag.node_mut(node_id) {
            node.repair_active = true;
        }
        info!(%node_id, ?fingerprint, "simulation failed, entering repair cycle");
        self.transition(node_id, target);
        Ok(())
    }

    fn fingerprint_reason(fingerprint: FailureFingerprint) -> &'static str {
        match fingerprint {
            FailureFingerprint::SchemaMismatch => "worker/schema_mismatch",
            FailureFingerprint::InterfaceMismatch => "worker/interface_mismatch",
            FailureFingerprint::MissingFile => "worker/missing_file",
            FailureFingerprint::ToolTransient => "worker/tool_transient",
            FailureFingerprint::ToolInvocation => "worker/tool_invocation",
            FailureFingerprint::Timeout => "timeout",
            FailureFingerprint::Unknown => "worker/unknown_failure",
        }
    }

    fn fail_node(&mut self, node_id: &str, stage: Stage, reason: &str) -> Result<()> {
        let current = self
            .dag
            .node(node_id)
            .map(|n| n.state)
            .ok_or_else(|| ForgeError::orchestration(format!("unknown node {node_id}")))?;
        // Nodes can fail before their stage state is entered (publish-path
        // validation); force the state machine through the stage state.
        let effective = if current.stage() == Some(stage) {
            current
        } else {
            NodeState::for_stage(stage)
        };
        let target = NodeStateMachine::determine_target_state(
            effective,
            &NodeEvent::StageFailedTerminal(stage),
            false,
        )?;
        if let Some(node) = self.dag.node_mut(node_id) {
            node.in_flight = None;
            node.failure = Some(FailureRecord {
                stage,
                reason: reason.to_string(),
            });
        }
        self.transition(node_id, target);
        self.emitter.emit(RunEvent::NodeFailed {
            node_id: node_id.to_string(),
            stage,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Deadline expiry synthesizes exactly one local FAILURE result; any
    /// late worker result for the superseded task id will no longer
    /// correlate and gets rejected to the DLQ.
    async fn synthesize_timeout(&mut self, node_id: &str) -> Result<()> {
        let Some((stage, task_id, correlation_id)) = self.dag.node_mut(node_id).and_then(|node| {
            let in_flight = node.in_flight.take()?;
            Some((in_flight.stage, in_flight.task_id, node.correlation_id))
        }) else {
            return Ok(());
        };

        self.emitter.emit(RunEvent::DeadlineExpired {
            node_id: node_id.to_string(),
            stage,
            task_id,
        });

        let timeout = self.config.stage_timeouts.for_stage(stage);
        let synthetic = ResultMessage {
            task_id,
            correlation_id,
            completed_at: chrono::Utc::now(),
            status: TaskStatus::Failure,
            artifacts_path: None,
            log_output: format!(
                "timeout: stage {stage} exceeded {}s deadline with no result",
                timeout.as_secs()
            ),
            reflections: None,
            metrics: None,
            distilled_dataset: None,
            reflection_insights: None,
        };
        self.apply_result(node_id, stage, &synthetic)
    }
}
