//! Run cancellation registry.
//!
//! An explicit, injectable service tracking the cancelled flag of every
//! in-flight run. The engine consults it at every suspension point;
//! cancellation is cooperative and never interrupts a runnable that is
//! already mid-flight.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::WorkflowError;

/// Process-wide registry of in-flight run IDs and their cancelled flags.
///
/// Every operation exists in a synchronous form and an `_async` twin.
/// Both are backed by the same underlying state, so a consumer mixing
/// synchronous and asynchronous call sites against the same run ID
/// observes a single consistent cancellation state.
#[derive(Debug, Default)]
pub struct CancellationManager {
    runs: DashMap<String, CancellationToken>,
}

impl CancellationManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize an un-cancelled flag for a run.
    pub fn register_run(&self, run_id: &str) {
        debug!("Registered run {}", run_id);
        self.runs
            .entry(run_id.to_string())
            .or_insert_with(CancellationToken::new);
    }

    /// Set the cancelled flag; returns whether the run was known.
    pub fn cancel_run(&self, run_id: &str) -> bool {
        match self.runs.get(run_id) {
            Some(token) => {
                token.cancel();
                info!("Run {} flagged for cancellation", run_id);
                true
            }
            None => false,
        }
    }

    /// Read the cancelled flag. Unknown runs read as not cancelled.
    pub fn is_cancelled(&self, run_id: &str) -> bool {
        self.runs
            .get(run_id)
            .map(|token| token.is_cancelled())
            .unwrap_or(false)
    }

    /// Abort with [`WorkflowError::Cancelled`] if the flag is set.
    ///
    /// Called by the engine between steps and around suspension points.
    pub fn raise_if_cancelled(&self, run_id: &str) -> Result<(), WorkflowError> {
        if self.is_cancelled(run_id) {
            return Err(WorkflowError::Cancelled(run_id.to_string()));
        }
        Ok(())
    }

    /// Drop bookkeeping for a run that reached a terminal state.
    pub fn cleanup_run(&self, run_id: &str) {
        if self.runs.remove(run_id).is_some() {
            debug!("Cleaned up run {}", run_id);
        }
    }

    /// Number of runs currently registered.
    pub fn active_runs(&self) -> usize {
        self.runs.len()
    }

    /// Asynchronous twin of [`CancellationManager::register_run`].
    pub async fn register_run_async(&self, run_id: &str) {
        self.register_run(run_id);
    }

    /// Asynchronous twin of [`CancellationManager::cancel_run`].
    pub async fn cancel_run_async(&self, run_id: &str) -> bool {
        self.cancel_run(run_id)
    }

    /// Asynchronous twin of [`CancellationManager::is_cancelled`].
    pub async fn is_cancelled_async(&self, run_id: &str) -> bool {
        self.is_cancelled(run_id)
    }

    /// Asynchronous twin of [`CancellationManager::raise_if_cancelled`].
    pub async fn raise_if_cancelled_async(&self, run_id: &str) -> Result<(), WorkflowError> {
        self.raise_if_cancelled(run_id)
    }

    /// Asynchronous twin of [`CancellationManager::cleanup_run`].
    pub async fn cleanup_run_async(&self, run_id: &str) {
        self.cleanup_run(run_id);
    }
}
