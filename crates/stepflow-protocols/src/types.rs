//! Common utility types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata map type.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Lifecycle status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run is executing.
    Running,
    /// The run is frozen waiting on unresolved requirements.
    Paused,
    /// The run finished, either normally or via an early stop signal.
    Completed,
    /// A runnable raised an error; the run is terminal.
    Failed,
    /// The run was cancelled at a suspension point.
    Cancelled,
}

impl RunStatus {
    /// Whether the run can make no further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Per-step counters surfaced on the run result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMetrics {
    /// Wall-clock duration of the step in milliseconds.
    pub duration_ms: u64,

    /// Tokens consumed by the underlying runnable, if it reports them.
    #[serde(default)]
    pub input_tokens: u64,

    /// Tokens produced by the underlying runnable, if it reports them.
    #[serde(default)]
    pub output_tokens: u64,
}

impl StepMetrics {
    /// Create metrics with only a duration.
    pub fn with_duration(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_terminal() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
    }

    #[test]
    fn test_run_status_serialization() {
        let json = serde_json::to_string(&RunStatus::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
        let status: RunStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(status, RunStatus::Cancelled);
    }

    #[test]
    fn test_step_metrics_with_duration() {
        let metrics = StepMetrics::with_duration(42);
        assert_eq!(metrics.duration_ms, 42);
        assert_eq!(metrics.input_tokens, 0);
        assert_eq!(metrics.output_tokens, 0);
    }
}
