//! Durable approval records.
//!
//! A `required` approval is written the moment a run pauses and gates
//! continuation; an `audit` approval is written only after resolution and
//! is a historical trail rather than a gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stepflow_protocols::Metadata;

/// Approval lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

impl ApprovalStatus {
    /// Terminal statuses block any further resolution attempt.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

/// Whether the approval gates continuation or merely records it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    /// Written at pause time with status `pending`; must be resolved.
    Required,
    /// Written only after resolution, already in its final status.
    Audit,
}

/// What kind of runnable declared the approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Agent,
    Team,
    Workflow,
}

/// The pause condition an approval corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseType {
    Confirmation,
    UserInput,
    ExternalExecution,
}

/// Pause-type-specific payload.
///
/// Fields for one pause type are only representable on its matching
/// variant, so an approval can never carry, say, external-execution
/// results for a confirmation pause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pause_type", rename_all = "snake_case")]
pub enum ApprovalPayload {
    Confirmation,
    UserInput {
        /// Values supplied by the resolver, empty while pending.
        #[serde(default)]
        values: Metadata,
    },
    ExternalExecution {
        /// Result supplied by the resolver, absent while pending.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
}

impl ApprovalPayload {
    /// The pause type this payload belongs to.
    pub fn pause_type(&self) -> PauseType {
        match self {
            ApprovalPayload::Confirmation => PauseType::Confirmation,
            ApprovalPayload::UserInput { .. } => PauseType::UserInput,
            ApprovalPayload::ExternalExecution { .. } => PauseType::ExternalExecution,
        }
    }
}

/// A durable approval record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    /// Unique ID; equal to the ID of the requirement it gates.
    pub id: Uuid,

    /// Run that paused.
    pub run_id: String,

    /// Session the run belongs to.
    pub session_id: String,

    /// Lifecycle status.
    pub status: ApprovalStatus,

    /// Kind of runnable that declared the pause.
    pub source_type: SourceType,

    /// Gate or audit trail.
    pub approval_type: ApprovalType,

    /// Pause-type-specific payload.
    #[serde(flatten)]
    pub payload: ApprovalPayload,

    /// Name of the gated tool.
    pub tool_name: String,

    /// Arguments of the gated tool.
    pub tool_args: serde_json::Value,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Expiry deadline, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Who resolved the approval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,

    /// When the approval was resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,

    /// Free-form context.
    #[serde(default)]
    pub context: Metadata,
}

impl Approval {
    /// Create a pending approval.
    pub fn new(
        id: Uuid,
        run_id: impl Into<String>,
        session_id: impl Into<String>,
        source_type: SourceType,
        approval_type: ApprovalType,
        payload: ApprovalPayload,
        tool_name: impl Into<String>,
        tool_args: serde_json::Value,
    ) -> Self {
        Self {
            id,
            run_id: run_id.into(),
            session_id: session_id.into(),
            status: ApprovalStatus::Pending,
            source_type,
            approval_type,
            payload,
            tool_name: tool_name.into(),
            tool_args,
            created_at: Utc::now(),
            expires_at: None,
            resolved_by: None,
            resolved_at: None,
            context: Metadata::new(),
        }
    }

    /// Set the expiry deadline.
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Add a context entry.
    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Derived pause type.
    pub fn pause_type(&self) -> PauseType {
        self.payload.pause_type()
    }

    /// Whether the record is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the expiry deadline has elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approval(payload: ApprovalPayload) -> Approval {
        Approval::new(
            Uuid::new_v4(),
            "run-1",
            "session-1",
            SourceType::Agent,
            ApprovalType::Required,
            payload,
            "send_email",
            serde_json::json!({"to": "ops@example.com"}),
        )
    }

    #[test]
    fn test_new_approval_is_pending() {
        let record = approval(ApprovalPayload::Confirmation);
        assert_eq!(record.status, ApprovalStatus::Pending);
        assert!(!record.is_terminal());
        assert!(record.resolved_by.is_none());
    }

    #[test]
    fn test_pause_type_derived_from_payload() {
        assert_eq!(
            approval(ApprovalPayload::Confirmation).pause_type(),
            PauseType::Confirmation
        );
        assert_eq!(
            approval(ApprovalPayload::UserInput {
                values: Metadata::new()
            })
            .pause_type(),
            PauseType::UserInput
        );
        assert_eq!(
            approval(ApprovalPayload::ExternalExecution { result: None }).pause_type(),
            PauseType::ExternalExecution
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ApprovalStatus::Approved.is_terminal());
        assert!(ApprovalStatus::Rejected.is_terminal());
        assert!(ApprovalStatus::Expired.is_terminal());
        assert!(ApprovalStatus::Cancelled.is_terminal());
        assert!(!ApprovalStatus::Pending.is_terminal());
    }

    #[test]
    fn test_expiry() {
        let record = approval(ApprovalPayload::Confirmation)
            .with_expires_at(Utc::now() - chrono::Duration::seconds(1));
        assert!(record.is_expired(Utc::now()));

        let fresh = approval(ApprovalPayload::Confirmation)
            .with_expires_at(Utc::now() + chrono::Duration::hours(1));
        assert!(!fresh.is_expired(Utc::now()));

        let unbounded = approval(ApprovalPayload::Confirmation);
        assert!(!unbounded.is_expired(Utc::now()));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let record = approval(ApprovalPayload::ExternalExecution {
            result: Some(serde_json::json!({"ok": true})),
        })
        .with_context("reason", "deploy window");

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("external_execution"));

        let back: Approval = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, record.id);
        assert_eq!(back.pause_type(), PauseType::ExternalExecution);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ApprovalStatus::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
    }
}
