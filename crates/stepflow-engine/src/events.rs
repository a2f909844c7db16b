//! Workflow lifecycle events for the streaming run variant.

use serde::{Deserialize, Serialize};

/// Intermediate events delivered to the caller of a streamed run.
///
/// The streaming and non-streaming run variants have identical
/// semantics; these events only change how progress is delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    RunStarted {
        run_id: String,
    },
    StepStarted {
        run_id: String,
        step_name: String,
    },
    StepCompleted {
        run_id: String,
        step_name: String,
        success: bool,
    },
    RunPaused {
        run_id: String,
        requirement_count: usize,
    },
    RunContinued {
        run_id: String,
    },
    RunCompleted {
        run_id: String,
    },
    RunFailed {
        run_id: String,
        error: String,
    },
    RunCancelled {
        run_id: String,
    },
}
