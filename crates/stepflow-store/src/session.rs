//! Persisted run state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stepflow_protocols::{Metadata, Requirement, RunStatus};

/// Serializable run state, upserted at every run transition.
///
/// This is the observability surface of a run: status, terminal content,
/// the requirements it is waiting on while paused, and a snapshot of the
/// shared session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique run identifier.
    pub run_id: String,

    /// Session the run belongs to.
    pub session_id: String,

    /// User on whose behalf the run executes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Current run status.
    pub status: RunStatus,

    /// Terminal content, once the run completed or failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,

    /// Requirements the run is waiting on while paused.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_requirements: Vec<Requirement>,

    /// Snapshot of the shared session state.
    #[serde(default)]
    pub session_state: Metadata,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// Create a record for a freshly started run.
    pub fn new(run_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            session_id: session_id.into(),
            user_id: None,
            status: RunStatus::Running,
            content: None,
            pending_requirements: Vec::new(),
            session_state: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the user ID.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Advance the record to a new status, bumping the update timestamp.
    pub fn transition(&mut self, status: RunStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
