//! Workflow metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Aggregate counters across all runs of a workflow.
#[derive(Debug, Default)]
pub struct WorkflowMetrics {
    /// Runs started.
    pub runs_started: AtomicU64,

    /// Runs that completed, including early stops.
    pub runs_completed: AtomicU64,

    /// Runs that ended in failure.
    pub runs_failed: AtomicU64,

    /// Runs cancelled at a suspension point or while paused.
    pub runs_cancelled: AtomicU64,

    /// Pause events.
    pub runs_paused: AtomicU64,

    /// Successful continuations of paused runs.
    pub runs_resumed: AtomicU64,

    /// Steps executed across all runs.
    pub steps_executed: AtomicU64,

    /// Cumulative step execution time (microseconds).
    pub step_time_us: AtomicU64,
}

impl WorkflowMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a run start.
    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a run completion.
    pub fn record_run_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a run failure.
    pub fn record_run_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a run cancellation.
    pub fn record_run_cancelled(&self) {
        self.runs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a pause event.
    pub fn record_run_paused(&self) {
        self.runs_paused.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a continuation.
    pub fn record_run_resumed(&self) {
        self.runs_resumed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a step execution.
    pub fn record_step(&self, duration_us: u64) {
        self.steps_executed.fetch_add(1, Ordering::Relaxed);
        self.step_time_us.fetch_add(duration_us, Ordering::Relaxed);
    }

    /// Get a snapshot of the metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            runs_cancelled: self.runs_cancelled.load(Ordering::Relaxed),
            runs_paused: self.runs_paused.load(Ordering::Relaxed),
            runs_resumed: self.runs_resumed.load(Ordering::Relaxed),
            steps_executed: self.steps_executed.load(Ordering::Relaxed),
            step_time_us: self.step_time_us.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of workflow metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub runs_cancelled: u64,
    pub runs_paused: u64,
    pub runs_resumed: u64,
    pub steps_executed: u64,
    pub step_time_us: u64,
}

impl MetricsSnapshot {
    /// Average step execution time in milliseconds.
    pub fn avg_step_time_ms(&self) -> f64 {
        if self.steps_executed == 0 {
            return 0.0;
        }
        (self.step_time_us as f64 / self.steps_executed as f64) / 1000.0
    }
}

/// Per-step record surfaced on the run result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMetricRecord {
    pub step_name: String,
    pub duration_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Per-run metrics surfaced on the run result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Wall-clock duration of the run in milliseconds, excluding time
    /// spent paused.
    pub duration_ms: u64,

    /// Per-step records in completion order.
    pub steps: Vec<StepMetricRecord>,
}
