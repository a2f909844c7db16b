//! Runnable capability surface.
//!
//! A step's underlying unit is an agent, a team, or a plain function.
//! Dispatch goes through the closed [`Executor`] enum rather than any
//! runtime capability probing.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::RunnableError;
use crate::io::{StepInput, StepOutput};
use crate::requirement::Requirement;

/// Result of invoking a runnable.
#[derive(Debug, Clone)]
pub enum ExecuteOutcome {
    /// The runnable completed and produced an output.
    Output(StepOutput),

    /// The runnable cannot proceed until the listed requirements are
    /// resolved; the whole run pauses.
    Paused(Vec<Requirement>),
}

impl ExecuteOutcome {
    /// Convenience constructor for a completed outcome.
    pub fn output(output: StepOutput) -> Self {
        ExecuteOutcome::Output(output)
    }

    /// Whether this outcome pauses the run.
    pub fn is_paused(&self) -> bool {
        matches!(self, ExecuteOutcome::Paused(_))
    }
}

/// A single agent invocable by a step.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Returns the agent name.
    fn name(&self) -> &str;

    /// Process the input and produce an outcome.
    async fn run(
        &self,
        input: &StepInput,
        ctx: &mut RunContext,
    ) -> Result<ExecuteOutcome, RunnableError>;

    /// Continue a previously paused execution with resolved requirements.
    ///
    /// An agent that never pauses does not need to override this.
    async fn resume(
        &self,
        requirements: &[Requirement],
        input: &StepInput,
        ctx: &mut RunContext,
    ) -> Result<ExecuteOutcome, RunnableError> {
        let _ = (requirements, input, ctx);
        Err(RunnableError::ResumeUnsupported(self.name().to_string()))
    }
}

/// A team of agents invocable as one unit.
///
/// From the engine's point of view a team is indistinguishable from an
/// agent; coordination between members is the team's own concern.
#[async_trait]
pub trait Team: Send + Sync {
    /// Returns the team name.
    fn name(&self) -> &str;

    /// Process the input and produce an outcome.
    async fn run(
        &self,
        input: &StepInput,
        ctx: &mut RunContext,
    ) -> Result<ExecuteOutcome, RunnableError>;

    /// Continue a previously paused execution with resolved requirements.
    async fn resume(
        &self,
        requirements: &[Requirement],
        input: &StepInput,
        ctx: &mut RunContext,
    ) -> Result<ExecuteOutcome, RunnableError> {
        let _ = (requirements, input, ctx);
        Err(RunnableError::ResumeUnsupported(self.name().to_string()))
    }
}

type StepFn = dyn Fn(&StepInput, &mut RunContext) -> Result<StepOutput, RunnableError> + Send + Sync;

/// A plain function wrapped as a runnable.
///
/// Functions produce their output directly and can never pause.
#[derive(Clone)]
pub struct FunctionRunnable {
    name: String,
    func: Arc<StepFn>,
}

impl FunctionRunnable {
    /// Wrap a function under the given name.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&StepInput, &mut RunContext) -> Result<StepOutput, RunnableError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Returns the function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the function.
    pub fn call(
        &self,
        input: &StepInput,
        ctx: &mut RunContext,
    ) -> Result<StepOutput, RunnableError> {
        (self.func)(input, ctx)
    }
}

impl std::fmt::Debug for FunctionRunnable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRunnable")
            .field("name", &self.name)
            .finish()
    }
}

/// The closed set of runnable kinds a step can wrap.
#[derive(Clone)]
pub enum Executor {
    Agent(Arc<dyn Agent>),
    Team(Arc<dyn Team>),
    Function(FunctionRunnable),
}

impl Executor {
    /// Returns the underlying runnable's name.
    pub fn name(&self) -> &str {
        match self {
            Executor::Agent(agent) => agent.name(),
            Executor::Team(team) => team.name(),
            Executor::Function(func) => func.name(),
        }
    }

    /// Returns the runnable kind as a static label.
    pub fn kind(&self) -> &'static str {
        match self {
            Executor::Agent(_) => "agent",
            Executor::Team(_) => "team",
            Executor::Function(_) => "function",
        }
    }

    /// Invoke the runnable.
    pub async fn execute(
        &self,
        input: &StepInput,
        ctx: &mut RunContext,
    ) -> Result<ExecuteOutcome, RunnableError> {
        match self {
            Executor::Agent(agent) => agent.run(input, ctx).await,
            Executor::Team(team) => team.run(input, ctx).await,
            Executor::Function(func) => func.call(input, ctx).map(ExecuteOutcome::Output),
        }
    }

    /// Continue a previously paused execution.
    pub async fn resume(
        &self,
        requirements: &[Requirement],
        input: &StepInput,
        ctx: &mut RunContext,
    ) -> Result<ExecuteOutcome, RunnableError> {
        match self {
            Executor::Agent(agent) => agent.resume(requirements, input, ctx).await,
            Executor::Team(team) => team.resume(requirements, input, ctx).await,
            Executor::Function(func) => {
                Err(RunnableError::ResumeUnsupported(func.name().to_string()))
            }
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Executor::{}({})", self.kind(), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirement::ToolExecution;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn name(&self) -> &str {
            "echo"
        }

        async fn run(
            &self,
            input: &StepInput,
            _ctx: &mut RunContext,
        ) -> Result<ExecuteOutcome, RunnableError> {
            Ok(ExecuteOutcome::Output(StepOutput::new(
                "echo",
                input.input.clone(),
            )))
        }
    }

    struct PausingAgent;

    #[async_trait]
    impl Agent for PausingAgent {
        fn name(&self) -> &str {
            "pausing"
        }

        async fn run(
            &self,
            _input: &StepInput,
            _ctx: &mut RunContext,
        ) -> Result<ExecuteOutcome, RunnableError> {
            let tool = ToolExecution::new("deploy", serde_json::json!({}));
            Ok(ExecuteOutcome::Paused(vec![Requirement::confirmation(
                tool,
            )]))
        }
    }

    #[tokio::test]
    async fn test_function_executor() {
        let executor = Executor::Function(FunctionRunnable::new("double", |input, _ctx| {
            let n = input.input.as_i64().unwrap_or(0);
            Ok(StepOutput::new("double", n * 2))
        }));

        let mut ctx = RunContext::new("run-1", "session-1");
        let outcome = executor
            .execute(&StepInput::new(21), &mut ctx)
            .await
            .unwrap();

        match outcome {
            ExecuteOutcome::Output(out) => assert_eq!(out.content, serde_json::json!(42)),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_agent_executor() {
        let executor = Executor::Agent(Arc::new(EchoAgent));
        assert_eq!(executor.name(), "echo");
        assert_eq!(executor.kind(), "agent");

        let mut ctx = RunContext::new("run-1", "session-1");
        let outcome = executor
            .execute(&StepInput::new("hello"), &mut ctx)
            .await
            .unwrap();
        assert!(!outcome.is_paused());
    }

    #[tokio::test]
    async fn test_paused_outcome() {
        let executor = Executor::Agent(Arc::new(PausingAgent));
        let mut ctx = RunContext::new("run-1", "session-1");
        let outcome = executor
            .execute(&StepInput::new("go"), &mut ctx)
            .await
            .unwrap();
        assert!(outcome.is_paused());
    }

    #[tokio::test]
    async fn test_function_resume_unsupported() {
        let executor = Executor::Function(FunctionRunnable::new("f", |_, _| {
            Ok(StepOutput::new("f", "x"))
        }));
        let mut ctx = RunContext::new("run-1", "session-1");
        let err = executor
            .resume(&[], &StepInput::new("x"), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnableError::ResumeUnsupported(_)));
    }

    #[tokio::test]
    async fn test_agent_default_resume_errors() {
        let executor = Executor::Agent(Arc::new(EchoAgent));
        let mut ctx = RunContext::new("run-1", "session-1");
        let err = executor
            .resume(&[], &StepInput::new("x"), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnableError::ResumeUnsupported(_)));
    }

    #[test]
    fn test_executor_debug() {
        let executor = Executor::Function(FunctionRunnable::new("f", |_, _| {
            Ok(StepOutput::new("f", "x"))
        }));
        assert_eq!(format!("{:?}", executor), "Executor::function(f)");
    }
}
