//! Workflow configuration.

use serde::{Deserialize, Serialize};

/// Engine-level configuration for a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Prefix for minted session IDs when the caller does not supply one.
    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,

    /// Default lifetime in seconds of a required approval before it
    /// expires. `None` means approvals never expire unless the step's
    /// policy says otherwise.
    #[serde(default)]
    pub approval_expiry_secs: Option<u64>,
}

fn default_session_prefix() -> String {
    "wf".to_string()
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            session_prefix: default_session_prefix(),
            approval_expiry_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkflowConfig::default();
        assert_eq!(config.session_prefix, "wf");
        assert!(config.approval_expiry_secs.is_none());
    }

    #[test]
    fn test_deserialization_defaults() {
        let config: WorkflowConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.session_prefix, "wf");
    }

    #[test]
    fn test_deserialization_override() {
        let config: WorkflowConfig =
            serde_json::from_str(r#"{"session_prefix":"ops","approval_expiry_secs":3600}"#)
                .unwrap();
        assert_eq!(config.session_prefix, "ops");
        assert_eq!(config.approval_expiry_secs, Some(3600));
    }
}
