//! Store errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = StoreError::NotFound("run-1".to_string());
        assert!(err.to_string().contains("run-1"));
    }

    #[test]
    fn test_from_serde() {
        let bad = serde_json::from_str::<serde_json::Value>("{");
        let err: StoreError = bad.unwrap_err().into();
        assert!(err.to_string().contains("Serialization"));
    }
}
