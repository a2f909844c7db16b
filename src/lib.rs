//! # Stepflow
//!
//! Workflow and run orchestration engine with human-in-the-loop
//! approvals. This facade crate re-exports the workspace members:
//!
//! - [`protocols`] - data envelopes and capability traits
//! - [`store`] - durable session and approval persistence
//! - [`engine`] - control-node execution, pause/resume, cancellation

pub use stepflow_engine as engine;
pub use stepflow_protocols as protocols;
pub use stepflow_store as store;

pub use stepflow_engine::{
    ApprovalPolicy, CancellationManager, Condition, Loop, Parallel, Router, RunOptions, RunResult,
    Step, Workflow, WorkflowBuilder, WorkflowConfig, WorkflowError, WorkflowEvent, WorkflowNode,
};
pub use stepflow_protocols::{
    Agent, ExecuteOutcome, Executor, FunctionRunnable, MediaRef, PauseKind, Requirement,
    Resolution, RunContext, RunStatus, RunnableError, StepInput, StepOutput, Team, ToolExecution,
};
pub use stepflow_store::{
    Approval, ApprovalFilter, ApprovalPayload, ApprovalStatus, ApprovalStore, ApprovalType,
    ApprovalUpdate, FileSessionStore, MemoryApprovalStore, MemorySessionStore, PauseType,
    RunRecord, SessionStore, SourceType,
};
