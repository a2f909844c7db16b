//! Engine errors.

use thiserror::Error;
use uuid::Uuid;

use stepflow_protocols::RunnableError;
use stepflow_store::StoreError;

/// Errors raised by the orchestration engine.
///
/// Runnable failures and cancellations never escape the run-control API;
/// [`crate::Workflow::run`] folds them into a terminal
/// [`crate::RunResult`]. The remaining variants are infrastructure or
/// caller faults and surface as `Err`.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Run {0} was cancelled")]
    Cancelled(String),

    #[error("Step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: RunnableError,
    },

    #[error("Unknown run: {0}")]
    UnknownRun(String),

    #[error("Run {0} is not paused")]
    NotPaused(String),

    #[error("Requirements still unresolved: {0:?}")]
    UnresolvedRequirements(Vec<Uuid>),

    #[error("Resume cursor does not match node '{0}'")]
    CursorMismatch(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Runtime error: {0}")]
    Runtime(String),
}
