//! Human-in-the-loop pause requirements.
//!
//! A [`Requirement`] represents one unresolved pause condition tied to a
//! tool execution. A run pauses with a list of active requirements and
//! resumes only once every one of them has been resolved by the caller.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Metadata;

/// The tool invocation a requirement gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    /// Tool name.
    pub tool_name: String,

    /// Arguments the tool would be invoked with.
    pub tool_args: serde_json::Value,

    /// Result of the execution, once available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl ToolExecution {
    pub fn new(tool_name: impl Into<String>, tool_args: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_args,
            result: None,
        }
    }
}

/// What kind of pause a requirement represents.
///
/// Pause-type-specific fields live only on the matching variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PauseKind {
    /// The tool needs an explicit go/no-go from the caller.
    Confirmation,
    /// The tool needs values supplied by the caller.
    UserInput {
        /// Names of the fields the caller is asked to fill in.
        requested_fields: Vec<String>,
    },
    /// The tool runs outside the engine; the caller supplies its result.
    ExternalExecution,
}

/// How a requirement was resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resolution {
    Confirmed,
    Rejected,
    UserInput { values: Metadata },
    ExternalResult { value: serde_json::Value },
}

/// One unresolved pause condition tied to a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    /// Unique requirement ID. Doubles as the ID of the approval record
    /// created for it, when one is.
    pub id: Uuid,

    /// Run this requirement belongs to. Filled in by the engine.
    #[serde(default)]
    pub run_id: String,

    /// Step that declared the requirement. Filled in by the engine.
    #[serde(default)]
    pub step_name: String,

    /// The gated tool execution.
    pub tool_execution: ToolExecution,

    /// Kind of pause.
    pub kind: PauseKind,

    /// Resolution, once the caller has provided one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,

    /// Who resolved the requirement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

impl Requirement {
    fn new(tool_execution: ToolExecution, kind: PauseKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: String::new(),
            step_name: String::new(),
            tool_execution,
            kind,
            resolution: None,
            resolved_by: None,
        }
    }

    /// A requirement asking for confirmation before the tool runs.
    pub fn confirmation(tool_execution: ToolExecution) -> Self {
        Self::new(tool_execution, PauseKind::Confirmation)
    }

    /// A requirement asking the caller to supply input values.
    pub fn user_input(tool_execution: ToolExecution, requested_fields: Vec<String>) -> Self {
        Self::new(tool_execution, PauseKind::UserInput { requested_fields })
    }

    /// A requirement asking the caller to execute the tool externally.
    pub fn external_execution(tool_execution: ToolExecution) -> Self {
        Self::new(tool_execution, PauseKind::ExternalExecution)
    }

    /// Approve the gated execution.
    pub fn confirm(&mut self) {
        self.resolution = Some(Resolution::Confirmed);
    }

    /// Reject the gated execution.
    pub fn reject(&mut self) {
        self.resolution = Some(Resolution::Rejected);
    }

    /// Supply the requested input values.
    pub fn provide_user_input(&mut self, values: Metadata) {
        self.resolution = Some(Resolution::UserInput { values });
    }

    /// Supply the result of an external execution.
    pub fn set_external_execution_result(&mut self, value: serde_json::Value) {
        self.tool_execution.result = Some(value.clone());
        self.resolution = Some(Resolution::ExternalResult { value });
    }

    /// Record who resolved this requirement.
    pub fn set_resolved_by(&mut self, who: impl Into<String>) {
        self.resolved_by = Some(who.into());
    }

    /// Whether the caller has provided a resolution.
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Whether the resolution is a rejection.
    pub fn is_rejected(&self) -> bool {
        matches!(self.resolution, Some(Resolution::Rejected))
    }
}
