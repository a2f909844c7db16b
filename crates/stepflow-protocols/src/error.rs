//! Runnable execution errors.

use thiserror::Error;

/// Error raised by an agent, team, or function underlying a step.
///
/// The control layer never retries these; retry, if configured, is the
/// runnable's own responsibility.
#[derive(Debug, Error)]
pub enum RunnableError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Runnable '{0}' does not support resuming a paused execution")]
    ResumeUnsupported(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
