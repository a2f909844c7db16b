//! The atomic executable unit.

use std::time::Instant;

use chrono::Duration;
use tracing::{debug, info, warn};

use stepflow_protocols::{
    ExecuteOutcome, Executor, FunctionRunnable, Requirement, RunContext, RunnableError, StepInput,
    StepMetrics, StepOutput,
};
use stepflow_store::{ApprovalType, SourceType};

use crate::cursor::{NodeCursor, PendingPause};
use crate::error::WorkflowError;
use crate::events::WorkflowEvent;
use crate::executor::{EngineShared, Flow};
use crate::metrics::StepMetricRecord;

/// Approval handling for pauses declared by a step.
#[derive(Debug, Clone)]
pub struct ApprovalPolicy {
    /// Gate (`Required`) or historical trail (`Audit`).
    pub approval_type: ApprovalType,

    /// What kind of runnable declared the pause.
    pub source_type: SourceType,

    /// Per-step expiry override for required approvals.
    pub expires_in: Option<Duration>,
}

impl ApprovalPolicy {
    /// A gating approval: a pending record is written the moment the run
    /// pauses and must be resolved before continuation.
    pub fn required(source_type: SourceType) -> Self {
        Self {
            approval_type: ApprovalType::Required,
            source_type,
            expires_in: None,
        }
    }

    /// An audit approval: no record exists while the run is paused; one
    /// is written in its final state at continuation time.
    pub fn audit(source_type: SourceType) -> Self {
        Self {
            approval_type: ApprovalType::Audit,
            source_type,
            expires_in: None,
        }
    }

    /// Set the expiry window.
    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }
}

/// A single step wrapping one runnable.
#[derive(Clone)]
pub struct Step {
    name: String,
    description: Option<String>,
    executor: Executor,
    approval: Option<ApprovalPolicy>,
}

impl Step {
    /// Wrap an executor under the given step name.
    pub fn new(name: impl Into<String>, executor: Executor) -> Self {
        Self {
            name: name.into(),
            description: None,
            executor,
            approval: None,
        }
    }

    /// Wrap an agent.
    pub fn agent(
        name: impl Into<String>,
        agent: std::sync::Arc<dyn stepflow_protocols::Agent>,
    ) -> Self {
        Self::new(name, Executor::Agent(agent))
    }

    /// Wrap a team.
    pub fn team(
        name: impl Into<String>,
        team: std::sync::Arc<dyn stepflow_protocols::Team>,
    ) -> Self {
        Self::new(name, Executor::Team(team))
    }

    /// Wrap a plain function.
    pub fn function<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&StepInput, &mut RunContext) -> Result<StepOutput, RunnableError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        let runnable = FunctionRunnable::new(name.clone(), func);
        Self::new(name, Executor::Function(runnable))
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the approval policy for pauses declared by this step.
    pub fn with_approval(mut self, policy: ApprovalPolicy) -> Self {
        self.approval = Some(policy);
        self
    }

    /// Returns the step name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the step description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the runnable kind label.
    pub fn executor_kind(&self) -> &'static str {
        self.executor.kind()
    }

    pub(crate) async fn execute(
        &self,
        input: &StepInput,
        ctx: &mut RunContext,
        shared: &EngineShared,
    ) -> Result<Flow, WorkflowError> {
        debug!("Executing step '{}'", self.name);
        shared.emit(WorkflowEvent::StepStarted {
            run_id: ctx.run_id.clone(),
            step_name: self.name.clone(),
        });

        let started = Instant::now();
        let outcome = self.executor.execute(input, ctx).await;
        self.handle_outcome(outcome, started, input, ctx, shared)
    }

    pub(crate) async fn resume(
        &self,
        input: &StepInput,
        resolved: &[Requirement],
        ctx: &mut RunContext,
        shared: &EngineShared,
    ) -> Result<Flow, WorkflowError> {
        debug!("Resuming step '{}'", self.name);
        let started = Instant::now();
        let outcome = self.executor.resume(resolved, input, ctx).await;
        self.handle_outcome(outcome, started, input, ctx, shared)
    }

    fn handle_outcome(
        &self,
        outcome: Result<ExecuteOutcome, RunnableError>,
        started: Instant,
        input: &StepInput,
        ctx: &mut RunContext,
        shared: &EngineShared,
    ) -> Result<Flow, WorkflowError> {
        match outcome {
            Ok(ExecuteOutcome::Output(mut output)) => {
                let elapsed = started.elapsed();
                output.step_name = self.name.clone();

                let mut metrics = output.metrics.take().unwrap_or_else(StepMetrics::default);
                metrics.duration_ms = elapsed.as_millis() as u64;
                shared.record_step(StepMetricRecord {
                    step_name: self.name.clone(),
                    duration_ms: metrics.duration_ms,
                    input_tokens: metrics.input_tokens,
                    output_tokens: metrics.output_tokens,
                });
                shared.metrics.record_step(elapsed.as_micros() as u64);
                output.metrics = Some(metrics);

                shared.emit(WorkflowEvent::StepCompleted {
                    run_id: ctx.run_id.clone(),
                    step_name: self.name.clone(),
                    success: output.success,
                });
                Ok(Flow::Done(vec![output]))
            }
            Ok(ExecuteOutcome::Paused(requirements)) => {
                info!(
                    "Step '{}' paused run {} with {} requirement(s)",
                    self.name,
                    ctx.run_id,
                    requirements.len()
                );
                let pauses = requirements
                    .into_iter()
                    .map(|mut requirement| {
                        requirement.run_id = ctx.run_id.clone();
                        requirement.step_name = self.name.clone();
                        PendingPause {
                            requirement,
                            policy: self.approval.clone(),
                        }
                    })
                    .collect();
                Ok(Flow::Paused {
                    pauses,
                    cursor: NodeCursor::Step {
                        input: input.clone(),
                    },
                })
            }
            Err(source) => {
                warn!("Step '{}' failed: {}", self.name, source);
                Err(WorkflowError::StepFailed {
                    step: self.name.clone(),
                    source,
                })
            }
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("executor", &self.executor)
            .field("approval", &self.approval)
            .finish()
    }
}
