//! Per-run execution context.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::Metadata;

/// Shared session state map.
///
/// Shared by reference across concurrent branches of a run. The engine
/// provides no atomicity over read-modify-write sequences; concurrent
/// writers see last-write-wins semantics.
pub type SessionState = Arc<RwLock<Metadata>>;

/// Per-run mutable state threaded through every step.
///
/// Owned by the workflow for the run's lifetime. Concurrent branches
/// receive their own copy of the scalar fields via [`RunContext::branch_copy`]
/// while `session_state` stays shared by reference.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Unique run identifier.
    pub run_id: String,

    /// Session this run belongs to.
    pub session_id: String,

    /// User on whose behalf the run executes.
    pub user_id: Option<String>,

    /// Free-form per-run metadata.
    pub metadata: Metadata,

    /// Dependency map handed to runnables.
    pub dependencies: Metadata,

    /// Expected shape of the final content, for runnables that support
    /// structured output.
    pub output_schema: Option<serde_json::Value>,

    /// Mutable state shared across the whole run, including across
    /// concurrent branches.
    pub session_state: SessionState,
}

impl RunContext {
    /// Create a context for a new run.
    pub fn new(run_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            session_id: session_id.into(),
            user_id: None,
            metadata: Metadata::new(),
            dependencies: Metadata::new(),
            output_schema: None,
            session_state: Arc::new(RwLock::new(Metadata::new())),
        }
    }

    /// Set the user ID.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Add a dependency entry.
    pub fn with_dependency(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.dependencies.insert(key.into(), value.into());
        self
    }

    /// Set the output schema.
    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Copy for one branch of a parallel fan-out.
    ///
    /// Scalar and derived fields are duplicated so a write in one branch
    /// is never visible to a sibling; `session_state` is the same Arc so
    /// branches can cooperatively accumulate state.
    pub fn branch_copy(&self) -> RunContext {
        RunContext {
            run_id: self.run_id.clone(),
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            metadata: self.metadata.clone(),
            dependencies: self.dependencies.clone(),
            output_schema: self.output_schema.clone(),
            session_state: Arc::clone(&self.session_state),
        }
    }

    /// Read a value from the shared session state.
    pub fn get_state<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.session_state
            .read()
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Write a value into the shared session state.
    pub fn set_state<T: Serialize>(&self, key: impl Into<String>, value: T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.session_state.write().insert(key.into(), v);
        }
    }

    /// Snapshot the shared session state for persistence.
    pub fn state_snapshot(&self) -> Metadata {
        self.session_state.read().clone()
    }
}
