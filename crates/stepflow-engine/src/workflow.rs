//! The workflow orchestration root.
//!
//! Owns the step tree, drives execution, aggregates metrics, persists
//! run state, and exposes the run control API: `run`, `continue_run`,
//! and `cancel_run`, each with async, blocking, and (for `run`)
//! streaming variants of identical semantics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use stepflow_protocols::{
    Metadata, PauseKind, Requirement, Resolution, RunContext, RunStatus, StepInput, StepOutput,
};
use stepflow_store::{
    Approval, ApprovalPayload, ApprovalStatus, ApprovalStore, ApprovalType, ApprovalUpdate,
    MemoryApprovalStore, MemorySessionStore, RunRecord, SessionStore,
};

use crate::cancellation::CancellationManager;
use crate::config::WorkflowConfig;
use crate::cursor::{ListCursor, PendingPause};
use crate::error::WorkflowError;
use crate::events::WorkflowEvent;
use crate::executor::{execute_list, resume_list, EngineShared, ListFlow};
use crate::metrics::{MetricsSnapshot, RunMetrics, StepMetricRecord, WorkflowMetrics};
use crate::node::WorkflowNode;
use crate::step::ApprovalPolicy;

/// Per-invocation options for a run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Session to attach the run to; minted when absent.
    pub session_id: Option<String>,

    /// User on whose behalf the run executes.
    pub user_id: Option<String>,

    /// Side-channel data visible to every step.
    pub additional_data: Metadata,

    /// Expected shape of the final content.
    pub output_schema: Option<serde_json::Value>,
}

impl RunOptions {
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_additional_data(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.additional_data.insert(key.into(), value.into());
        self
    }

    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// Result of a run, a continuation, or a cancellation observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub session_id: String,
    pub status: RunStatus,

    /// Terminal content: the last step's content, or the stopping
    /// output's content after an early stop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,

    /// Outputs of the top-level steps, for completed runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_outputs: Vec<StepOutput>,

    /// Requirements awaiting resolution, for paused runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_requirements: Vec<Requirement>,

    /// Failure message, for failed runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Per-run duration and per-step counters.
    pub metrics: RunMetrics,
}

impl RunResult {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn is_paused(&self) -> bool {
        self.status == RunStatus::Paused
    }
}

/// Frozen state of a paused run, held until continuation.
struct PausedRun {
    cursor: ListCursor,
    ctx: RunContext,
    pauses: Vec<PendingPause>,
    record: RunRecord,
    elapsed_ms: u64,
    step_records: Vec<StepMetricRecord>,
}

/// The root orchestrator.
pub struct Workflow {
    name: String,
    description: Option<String>,
    steps: Vec<WorkflowNode>,
    config: WorkflowConfig,
    session_store: Arc<dyn SessionStore>,
    approval_store: Arc<dyn ApprovalStore>,
    cancellation: Arc<CancellationManager>,
    metrics: Arc<WorkflowMetrics>,
    paused: DashMap<String, PausedRun>,
}

impl Workflow {
    /// Start building a workflow.
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    /// Returns the workflow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the workflow description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Introspection tree of the step list.
    pub fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "steps": self.steps.iter().map(|s| s.describe()).collect::<Vec<_>>(),
        })
    }

    /// Aggregate metrics across all runs of this workflow.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The approval store backing this workflow.
    pub fn approval_store(&self) -> &Arc<dyn ApprovalStore> {
        &self.approval_store
    }

    /// The session store backing this workflow.
    pub fn session_store(&self) -> &Arc<dyn SessionStore> {
        &self.session_store
    }

    /// The cancellation registry backing this workflow.
    pub fn cancellation(&self) -> &Arc<CancellationManager> {
        &self.cancellation
    }

    /// Whether a run is currently paused in this process.
    pub fn is_paused(&self, run_id: &str) -> bool {
        self.paused.contains_key(run_id)
    }

    /// Requirements a paused run is waiting on.
    pub fn active_requirements(&self, run_id: &str) -> Option<Vec<Requirement>> {
        self.paused
            .get(run_id)
            .map(|p| p.pauses.iter().map(|pp| pp.requirement.clone()).collect())
    }

    /// Execute the workflow against an input.
    pub async fn run(
        &self,
        input: impl Into<serde_json::Value>,
    ) -> Result<RunResult, WorkflowError> {
        self.run_inner(input.into(), RunOptions::default(), None)
            .await
    }

    /// Execute the workflow with per-invocation options.
    pub async fn run_with_options(
        &self,
        input: impl Into<serde_json::Value>,
        options: RunOptions,
    ) -> Result<RunResult, WorkflowError> {
        self.run_inner(input.into(), options, None).await
    }

    /// Streaming variant of [`Workflow::run`].
    ///
    /// Returns the run handle plus a stream of [`WorkflowEvent`]s; the
    /// execution semantics are identical to the non-streaming variant.
    pub fn run_streamed(
        self: &Arc<Self>,
        input: impl Into<serde_json::Value>,
    ) -> (
        JoinHandle<Result<RunResult, WorkflowError>>,
        UnboundedReceiverStream<WorkflowEvent>,
    ) {
        self.run_streamed_with_options(input, RunOptions::default())
    }

    /// Streaming variant of [`Workflow::run_with_options`].
    pub fn run_streamed_with_options(
        self: &Arc<Self>,
        input: impl Into<serde_json::Value>,
        options: RunOptions,
    ) -> (
        JoinHandle<Result<RunResult, WorkflowError>>,
        UnboundedReceiverStream<WorkflowEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let workflow = Arc::clone(self);
        let value = input.into();
        let handle =
            tokio::spawn(async move { workflow.run_inner(value, options, Some(tx)).await });
        (handle, UnboundedReceiverStream::new(rx))
    }

    /// Blocking twin of [`Workflow::run`].
    pub fn run_blocking(
        &self,
        input: impl Into<serde_json::Value>,
    ) -> Result<RunResult, WorkflowError> {
        blocking_runtime()?.block_on(self.run(input))
    }

    /// Blocking twin of [`Workflow::continue_run`].
    pub fn continue_run_blocking(
        &self,
        run_id: &str,
        resolved: Vec<Requirement>,
    ) -> Result<RunResult, WorkflowError> {
        blocking_runtime()?.block_on(self.continue_run(run_id, resolved))
    }

    /// Blocking twin of [`Workflow::cancel_run`].
    pub fn cancel_run_blocking(&self, run_id: &str) -> Result<bool, WorkflowError> {
        Ok(blocking_runtime()?.block_on(self.cancel_run(run_id)))
    }

    async fn run_inner(
        &self,
        input: serde_json::Value,
        options: RunOptions,
        events: Option<UnboundedSender<WorkflowEvent>>,
    ) -> Result<RunResult, WorkflowError> {
        let run_id = Uuid::new_v4().to_string();
        let session_id = options.session_id.clone().unwrap_or_else(|| {
            format!("{}-{}", self.config.session_prefix, Uuid::new_v4())
        });

        let mut ctx = RunContext::new(&run_id, &session_id);
        ctx.user_id = options.user_id.clone();
        ctx.output_schema = options.output_schema.clone();

        self.cancellation.register_run(&run_id);
        self.metrics.record_run_started();

        let mut record = RunRecord::new(&run_id, &session_id);
        record.user_id = options.user_id;
        self.session_store.upsert(&record).await?;

        let shared = EngineShared::new(
            run_id.clone(),
            Arc::clone(&self.cancellation),
            Arc::clone(&self.metrics),
            events,
        );
        shared.emit(WorkflowEvent::RunStarted {
            run_id: run_id.clone(),
        });
        info!("Run {} started on workflow '{}'", run_id, self.name);

        let mut step_input = StepInput::new(input);
        step_input.additional_data = options.additional_data;

        let segment_started = Instant::now();
        let flow = execute_list(&self.steps, step_input, &mut ctx, &shared).await;
        self.finish(flow, ctx, record, &shared, 0, Vec::new(), segment_started)
            .await
    }

    /// Resume a paused run once every requirement has been resolved.
    ///
    /// Only the interrupted node and its continuation are re-entered;
    /// the tree is never re-walked from the start.
    pub async fn continue_run(
        &self,
        run_id: &str,
        resolved: Vec<Requirement>,
    ) -> Result<RunResult, WorkflowError> {
        let Some((_, paused)) = self.paused.remove(run_id) else {
            return match self.session_store.fetch(run_id).await? {
                Some(_) => Err(WorkflowError::NotPaused(run_id.to_string())),
                None => Err(WorkflowError::UnknownRun(run_id.to_string())),
            };
        };

        // The run may have been flagged while it sat paused.
        if self.cancellation.is_cancelled(run_id) {
            return self.finalize_cancelled_pause(paused).await;
        }

        let resolved_by_id: HashMap<Uuid, Requirement> =
            resolved.into_iter().map(|r| (r.id, r)).collect();

        let mut pairs: Vec<(PendingPause, Requirement)> = Vec::new();
        let mut unresolved = Vec::new();
        for pause in &paused.pauses {
            match resolved_by_id.get(&pause.requirement.id) {
                Some(r) if r.is_resolved() => pairs.push((pause.clone(), r.clone())),
                _ => unresolved.push(pause.requirement.id),
            }
        }
        if !unresolved.is_empty() {
            // Leave the run paused; the caller must settle everything.
            self.paused.insert(run_id.to_string(), paused);
            return Err(WorkflowError::UnresolvedRequirements(unresolved));
        }

        let now = Utc::now();
        let mut settled = Vec::with_capacity(pairs.len());
        for (pause, mut req) in pairs {
            req.run_id = pause.requirement.run_id.clone();
            req.step_name = pause.requirement.step_name.clone();

            if let Some(policy) = &pause.policy {
                match policy.approval_type {
                    ApprovalType::Required => self.settle_required(&mut req, now).await?,
                    ApprovalType::Audit => {
                        // First and only write for audit approvals,
                        // already in the final status.
                        let mut approval =
                            self.build_approval(&pause.requirement, policy, &paused.record.session_id);
                        approval.status = if req.is_rejected() {
                            ApprovalStatus::Rejected
                        } else {
                            ApprovalStatus::Approved
                        };
                        approval.resolved_by = req.resolved_by.clone();
                        approval.resolved_at = Some(now);
                        if let Some(payload) = payload_from_resolution(&req) {
                            approval.payload = payload;
                        }
                        self.approval_store.create(&approval).await?;
                    }
                }
            }
            settled.push(req);
        }

        info!(
            "Run {} continuing with {} resolved requirement(s)",
            run_id,
            settled.len()
        );
        self.metrics.record_run_resumed();

        let PausedRun {
            cursor,
            mut ctx,
            record,
            elapsed_ms,
            step_records,
            ..
        } = paused;

        let shared = EngineShared::new(
            run_id.to_string(),
            Arc::clone(&self.cancellation),
            Arc::clone(&self.metrics),
            None,
        );
        shared.emit(WorkflowEvent::RunContinued {
            run_id: run_id.to_string(),
        });

        let segment_started = Instant::now();
        let flow = resume_list(&self.steps, cursor, &settled, &mut ctx, &shared).await;
        self.finish(
            flow,
            ctx,
            record,
            &shared,
            elapsed_ms,
            step_records,
            segment_started,
        )
        .await
    }

    /// Flag a run for cancellation; returns whether the run was known.
    ///
    /// A running run stops at its next suspension point. A paused run is
    /// finalized immediately: its pending required approvals move to
    /// `cancelled` and the run record becomes terminal.
    pub async fn cancel_run(&self, run_id: &str) -> bool {
        let known = self.cancellation.cancel_run(run_id);

        if let Some((_, paused)) = self.paused.remove(run_id) {
            if let Err(e) = self.finalize_cancelled_pause(paused).await {
                warn!("Failed to finalize cancelled paused run {}: {}", run_id, e);
            }
            return true;
        }
        known
    }

    async fn settle_required(
        &self,
        req: &mut Requirement,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        let Some(current) = self.approval_store.get(&req.id).await? else {
            // No record to advance; the caller's resolution stands.
            return Ok(());
        };

        if current.status == ApprovalStatus::Pending && current.is_expired(now) {
            self.approval_store
                .update(
                    &req.id,
                    ApprovalStatus::Pending,
                    ApprovalUpdate::to_status(ApprovalStatus::Expired),
                )
                .await?;
            warn!(
                "Approval {} for tool '{}' expired before resolution",
                req.id, req.tool_execution.tool_name
            );
            req.reject();
            return Ok(());
        }

        if current.status == ApprovalStatus::Pending {
            let status = if req.is_rejected() {
                ApprovalStatus::Rejected
            } else {
                ApprovalStatus::Approved
            };
            let mut update = ApprovalUpdate::to_status(status);
            update.resolved_by = req.resolved_by.clone();
            if let Some(payload) = payload_from_resolution(req) {
                update = update.with_payload(payload);
            }

            if self
                .approval_store
                .update(&req.id, ApprovalStatus::Pending, update)
                .await?
                .is_none()
            {
                // Lost the race against a concurrent resolver; the
                // surviving record's decision stands.
                if let Some(winner) = self.approval_store.get(&req.id).await? {
                    adopt_resolution(req, &winner);
                }
            }
            return Ok(());
        }

        // Already terminal: resolved elsewhere, expired, or cancelled.
        adopt_resolution(req, &current);
        Ok(())
    }

    async fn finalize_cancelled_pause(
        &self,
        paused: PausedRun,
    ) -> Result<RunResult, WorkflowError> {
        let PausedRun {
            pauses,
            ctx,
            mut record,
            elapsed_ms,
            step_records,
            ..
        } = paused;

        for pause in &pauses {
            let required = pause
                .policy
                .as_ref()
                .map(|p| p.approval_type == ApprovalType::Required)
                .unwrap_or(false);
            if required {
                self.approval_store
                    .update(
                        &pause.requirement.id,
                        ApprovalStatus::Pending,
                        ApprovalUpdate::to_status(ApprovalStatus::Cancelled),
                    )
                    .await?;
            }
        }

        record.transition(RunStatus::Cancelled);
        record.session_state = ctx.state_snapshot();
        self.session_store.upsert(&record).await?;
        self.cancellation.cleanup_run(&record.run_id);
        self.metrics.record_run_cancelled();
        info!("Run {} cancelled while paused", record.run_id);

        Ok(RunResult {
            run_id: record.run_id.clone(),
            session_id: record.session_id.clone(),
            status: RunStatus::Cancelled,
            content: None,
            step_outputs: Vec::new(),
            active_requirements: Vec::new(),
            error: None,
            metrics: RunMetrics {
                duration_ms: elapsed_ms,
                steps: step_records,
            },
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        flow: Result<ListFlow, WorkflowError>,
        ctx: RunContext,
        mut record: RunRecord,
        shared: &EngineShared,
        base_elapsed_ms: u64,
        base_records: Vec<StepMetricRecord>,
        segment_started: Instant,
    ) -> Result<RunResult, WorkflowError> {
        let run_id = record.run_id.clone();
        let session_id = record.session_id.clone();

        let duration_ms = base_elapsed_ms + segment_started.elapsed().as_millis() as u64;
        let mut steps = base_records;
        steps.extend(shared.take_step_records());
        let metrics = RunMetrics { duration_ms, steps };

        match flow {
            Ok(ListFlow::Done(outs)) => {
                let content = outs.last().map(|o| o.content.clone());
                record.transition(RunStatus::Completed);
                record.content = content.clone();
                record.pending_requirements = Vec::new();
                record.session_state = ctx.state_snapshot();
                self.session_store.upsert(&record).await?;
                self.cancellation.cleanup_run(&run_id);
                self.metrics.record_run_completed();
                shared.emit(WorkflowEvent::RunCompleted {
                    run_id: run_id.clone(),
                });
                info!("Run {} completed", run_id);

                Ok(RunResult {
                    run_id,
                    session_id,
                    status: RunStatus::Completed,
                    content,
                    step_outputs: outs,
                    active_requirements: Vec::new(),
                    error: None,
                    metrics,
                })
            }
            Ok(ListFlow::Stop(out)) => {
                // An early stop is a normal completion with the stopping
                // output as the run's terminal content.
                let content = Some(out.content.clone());
                record.transition(RunStatus::Completed);
                record.content = content.clone();
                record.pending_requirements = Vec::new();
                record.session_state = ctx.state_snapshot();
                self.session_store.upsert(&record).await?;
                self.cancellation.cleanup_run(&run_id);
                self.metrics.record_run_completed();
                shared.emit(WorkflowEvent::RunCompleted {
                    run_id: run_id.clone(),
                });
                info!("Run {} stopped early by step '{}'", run_id, out.step_name);

                Ok(RunResult {
                    run_id,
                    session_id,
                    status: RunStatus::Completed,
                    content,
                    step_outputs: vec![out],
                    active_requirements: Vec::new(),
                    error: None,
                    metrics,
                })
            }
            Ok(ListFlow::Paused { pauses, list }) => {
                let requirements: Vec<Requirement> =
                    pauses.iter().map(|p| p.requirement.clone()).collect();

                for pause in &pauses {
                    if let Some(policy) = &pause.policy {
                        if policy.approval_type == ApprovalType::Required {
                            let approval =
                                self.build_approval(&pause.requirement, policy, &session_id);
                            self.approval_store.create(&approval).await?;
                        }
                    }
                }

                record.transition(RunStatus::Paused);
                record.pending_requirements = requirements.clone();
                record.session_state = ctx.state_snapshot();
                self.session_store.upsert(&record).await?;
                self.metrics.record_run_paused();
                shared.emit(WorkflowEvent::RunPaused {
                    run_id: run_id.clone(),
                    requirement_count: requirements.len(),
                });
                info!(
                    "Run {} paused with {} requirement(s)",
                    run_id,
                    requirements.len()
                );

                self.paused.insert(
                    run_id.clone(),
                    PausedRun {
                        cursor: list,
                        ctx,
                        pauses,
                        record,
                        elapsed_ms: duration_ms,
                        step_records: metrics.steps.clone(),
                    },
                );

                Ok(RunResult {
                    run_id,
                    session_id,
                    status: RunStatus::Paused,
                    content: None,
                    step_outputs: Vec::new(),
                    active_requirements: requirements,
                    error: None,
                    metrics,
                })
            }
            Err(WorkflowError::Cancelled(_)) => {
                record.transition(RunStatus::Cancelled);
                record.session_state = ctx.state_snapshot();
                self.session_store.upsert(&record).await?;
                self.cancellation.cleanup_run(&run_id);
                self.metrics.record_run_cancelled();
                shared.emit(WorkflowEvent::RunCancelled {
                    run_id: run_id.clone(),
                });
                info!("Run {} cancelled", run_id);

                Ok(RunResult {
                    run_id,
                    session_id,
                    status: RunStatus::Cancelled,
                    content: None,
                    step_outputs: Vec::new(),
                    active_requirements: Vec::new(),
                    error: None,
                    metrics,
                })
            }
            Err(WorkflowError::StepFailed { step, source }) => {
                let message = source.to_string();
                let failure = StepOutput::failure(&step, message.clone());

                record.transition(RunStatus::Failed);
                record.content = Some(failure.content.clone());
                record.session_state = ctx.state_snapshot();
                self.session_store.upsert(&record).await?;
                self.cancellation.cleanup_run(&run_id);
                self.metrics.record_run_failed();
                shared.emit(WorkflowEvent::RunFailed {
                    run_id: run_id.clone(),
                    error: message.clone(),
                });
                warn!("Run {} failed at step '{}': {}", run_id, step, message);

                Ok(RunResult {
                    run_id,
                    session_id,
                    status: RunStatus::Failed,
                    content: Some(failure.content.clone()),
                    step_outputs: vec![failure],
                    active_requirements: Vec::new(),
                    error: Some(message),
                    metrics,
                })
            }
            Err(e) => {
                self.cancellation.cleanup_run(&run_id);
                Err(e)
            }
        }
    }

    fn build_approval(
        &self,
        requirement: &Requirement,
        policy: &ApprovalPolicy,
        session_id: &str,
    ) -> Approval {
        let payload = match &requirement.kind {
            PauseKind::Confirmation => ApprovalPayload::Confirmation,
            PauseKind::UserInput { .. } => ApprovalPayload::UserInput {
                values: Metadata::new(),
            },
            PauseKind::ExternalExecution => ApprovalPayload::ExternalExecution { result: None },
        };

        let mut approval = Approval::new(
            requirement.id,
            &requirement.run_id,
            session_id,
            policy.source_type,
            policy.approval_type,
            payload,
            &requirement.tool_execution.tool_name,
            requirement.tool_execution.tool_args.clone(),
        )
        .with_context("step_name", requirement.step_name.clone());

        // Only gating records can expire; audit records are written in a
        // terminal status.
        if policy.approval_type == ApprovalType::Required {
            let expires_in = policy.expires_in.or_else(|| {
                self.config
                    .approval_expiry_secs
                    .map(|secs| Duration::seconds(secs as i64))
            });
            if let Some(window) = expires_in {
                approval.expires_at = Some(Utc::now() + window);
            }
        }
        approval
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// Builder for [`Workflow`].
pub struct WorkflowBuilder {
    name: String,
    description: Option<String>,
    steps: Vec<WorkflowNode>,
    config: WorkflowConfig,
    session_store: Option<Arc<dyn SessionStore>>,
    approval_store: Option<Arc<dyn ApprovalStore>>,
    cancellation: Option<Arc<CancellationManager>>,
}

impl WorkflowBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps: Vec::new(),
            config: WorkflowConfig::default(),
            session_store: None,
            approval_store: None,
            cancellation: None,
        }
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append one node to the top-level step list.
    pub fn step(mut self, node: impl Into<WorkflowNode>) -> Self {
        self.steps.push(node.into());
        self
    }

    /// Replace the top-level step list.
    pub fn steps(mut self, steps: Vec<WorkflowNode>) -> Self {
        self.steps = steps;
        self
    }

    /// Set the engine configuration.
    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Inject a session store; defaults to in-memory.
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Inject an approval store; defaults to in-memory.
    pub fn approval_store(mut self, store: Arc<dyn ApprovalStore>) -> Self {
        self.approval_store = Some(store);
        self
    }

    /// Inject a cancellation manager; defaults to a fresh registry.
    pub fn cancellation_manager(mut self, manager: Arc<CancellationManager>) -> Self {
        self.cancellation = Some(manager);
        self
    }

    /// Build the workflow.
    pub fn build(self) -> Workflow {
        Workflow {
            name: self.name,
            description: self.description,
            steps: self.steps,
            config: self.config,
            session_store: self
                .session_store
                .unwrap_or_else(|| Arc::new(MemorySessionStore::new())),
            approval_store: self
                .approval_store
                .unwrap_or_else(|| Arc::new(MemoryApprovalStore::new())),
            cancellation: self
                .cancellation
                .unwrap_or_else(|| Arc::new(CancellationManager::new())),
            metrics: Arc::new(WorkflowMetrics::new()),
            paused: DashMap::new(),
        }
    }
}

fn blocking_runtime() -> Result<tokio::runtime::Runtime, WorkflowError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| WorkflowError::Runtime(e.to_string()))
}

fn payload_from_resolution(req: &Requirement) -> Option<ApprovalPayload> {
    match &req.resolution {
        Some(Resolution::UserInput { values }) => Some(ApprovalPayload::UserInput {
            values: values.clone(),
        }),
        Some(Resolution::ExternalResult { value }) => Some(ApprovalPayload::ExternalExecution {
            result: Some(value.clone()),
        }),
        _ => None,
    }
}

/// Replace a requirement's resolution with the decision recorded on the
/// approval that survived a resolution race.
fn adopt_resolution(req: &mut Requirement, winner: &Approval) {
    match winner.status {
        ApprovalStatus::Approved => match &winner.payload {
            ApprovalPayload::Confirmation => req.confirm(),
            ApprovalPayload::UserInput { values } => req.provide_user_input(values.clone()),
            ApprovalPayload::ExternalExecution { result } => req.set_external_execution_result(
                result.clone().unwrap_or(serde_json::Value::Null),
            ),
        },
        _ => req.reject(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Step;

    fn echo_workflow() -> Workflow {
        Workflow::builder("echo")
            .step(Step::function("echo", |input, _| {
                Ok(StepOutput::new("echo", input.input.clone()))
            }))
            .build()
    }

    #[tokio::test]
    async fn test_run_completes() {
        let workflow = echo_workflow();
        let result = workflow.run("hello").await.unwrap();

        assert!(result.is_completed());
        assert_eq!(result.content, Some(serde_json::json!("hello")));
        assert_eq!(result.step_outputs.len(), 1);
        assert!(result.error.is_none());
        assert_eq!(result.metrics.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_run_persists_record() {
        let workflow = echo_workflow();
        let result = workflow.run("hello").await.unwrap();

        let record = workflow
            .session_store()
            .fetch(&result.run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.content, Some(serde_json::json!("hello")));
    }

    #[tokio::test]
    async fn test_run_with_options_threads_session_and_user() {
        let workflow = echo_workflow();
        let options = RunOptions::default()
            .with_session_id("session-42")
            .with_user_id("user-7");
        let result = workflow.run_with_options("hi", options).await.unwrap();

        assert_eq!(result.session_id, "session-42");
        let record = workflow
            .session_store()
            .fetch(&result.run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.user_id.as_deref(), Some("user-7"));
    }

    #[tokio::test]
    async fn test_failing_step_yields_failed_result() {
        let workflow = Workflow::builder("failing")
            .step(Step::function("broken", |_, _| {
                Err(stepflow_protocols::RunnableError::ExecutionFailed(
                    "provider down".to_string(),
                ))
            }))
            .build();

        let result = workflow.run("x").await.unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.as_deref().unwrap_or("").contains("provider down"));
        assert_eq!(result.step_outputs.len(), 1);
        assert!(!result.step_outputs[0].success);
        assert_eq!(workflow.metrics().runs_failed, 1);
    }

    #[tokio::test]
    async fn test_stop_output_is_terminal_content() {
        let workflow = Workflow::builder("stopping")
            .step(Step::function("gate", |_, _| {
                Ok(StepOutput::new("gate", "halted").with_stop())
            }))
            .step(Step::function("never", |_, _| {
                Ok(StepOutput::new("never", "unreachable"))
            }))
            .build();

        let result = workflow.run("x").await.unwrap();
        assert!(result.is_completed());
        assert_eq!(result.content, Some(serde_json::json!("halted")));
        assert_eq!(result.step_outputs.len(), 1);
    }

    #[tokio::test]
    async fn test_continue_unknown_run_errors() {
        let workflow = echo_workflow();
        let err = workflow.continue_run("ghost", Vec::new()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownRun(_)));
    }

    #[tokio::test]
    async fn test_continue_completed_run_is_not_paused() {
        let workflow = echo_workflow();
        let result = workflow.run("x").await.unwrap();

        let err = workflow
            .continue_run(&result.run_id, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotPaused(_)));
    }

    #[tokio::test]
    async fn test_cancel_unknown_run_returns_false() {
        let workflow = echo_workflow();
        assert!(!workflow.cancel_run("ghost").await);
    }

    #[tokio::test]
    async fn test_describe() {
        let workflow = echo_workflow();
        let tree = workflow.describe();
        assert_eq!(tree["name"], "echo");
        assert_eq!(tree["steps"][0]["kind"], "step");
    }

    #[tokio::test]
    async fn test_run_streamed_delivers_events() {
        use tokio_stream::StreamExt;

        let workflow = Arc::new(echo_workflow());
        let (handle, mut events) = workflow.run_streamed("hello");

        let result = handle.await.expect("join").unwrap();
        assert!(result.is_completed());

        let mut kinds = Vec::new();
        while let Some(event) = events.next().await {
            kinds.push(match event {
                WorkflowEvent::RunStarted { .. } => "run_started",
                WorkflowEvent::StepStarted { .. } => "step_started",
                WorkflowEvent::StepCompleted { .. } => "step_completed",
                WorkflowEvent::RunCompleted { .. } => "run_completed",
                _ => "other",
            });
        }
        assert_eq!(
            kinds,
            vec![
                "run_started",
                "step_started",
                "step_completed",
                "run_completed"
            ]
        );
    }

    #[test]
    fn test_run_blocking() {
        let workflow = echo_workflow();
        let result = workflow.run_blocking("hello").unwrap();
        assert!(result.is_completed());
        assert_eq!(result.content, Some(serde_json::json!("hello")));
    }
}
