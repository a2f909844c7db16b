//! Run state persistence.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::session::RunRecord;

/// Run state store, keyed by run ID.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or update a run record.
    async fn upsert(&self, record: &RunRecord) -> Result<(), StoreError>;

    /// Fetch a run record by run ID.
    async fn fetch(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError>;

    /// Delete a run record.
    async fn delete(&self, run_id: &str) -> Result<(), StoreError>;

    /// List all run IDs.
    async fn list(&self) -> Result<Vec<String>, StoreError>;
}

/// In-memory run state store.
pub struct MemorySessionStore {
    records: RwLock<HashMap<String, RunRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn upsert(&self, record: &RunRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.run_id.clone(), record.clone());
        Ok(())
    }

    async fn fetch(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError> {
        Ok(self.records.read().await.get(run_id).cloned())
    }

    async fn delete(&self, run_id: &str) -> Result<(), StoreError> {
        self.records.write().await.remove(run_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.read().await.keys().cloned().collect())
    }
}

/// File-based run state store, one JSON file per run.
pub struct FileSessionStore {
    directory: PathBuf,
}

impl FileSessionStore {
    /// Create a new file store rooted at `directory`.
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    fn record_path(&self, run_id: &str) -> PathBuf {
        self.directory.join(format!("{}.json", run_id))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn upsert(&self, record: &RunRecord) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let json = serde_json::to_string_pretty(record)?;
        let path = self.record_path(&record.run_id);

        tokio::fs::write(&path, json).await?;
        debug!("Saved run {} to {:?}", record.run_id, path);
        Ok(())
    }

    async fn fetch(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError> {
        let path = self.record_path(run_id);

        if !path.exists() {
            return Ok(None);
        }

        let json = tokio::fs::read_to_string(&path).await?;
        let record: RunRecord = serde_json::from_str(&json)?;
        Ok(Some(record))
    }

    async fn delete(&self, run_id: &str) -> Result<(), StoreError> {
        let path = self.record_path(run_id);

        if path.exists() {
            tokio::fs::remove_file(&path).await?;
            debug!("Deleted run file: {:?}", path);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.directory).await?;

        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(id) = name.strip_suffix(".json") {
                    ids.push(id.to_string());
                }
            }
        }

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_protocols::RunStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_store_upsert_fetch() {
        let store = MemorySessionStore::new();
        let record = RunRecord::new("run-1", "session-1");

        store.upsert(&record).await.unwrap();
        let fetched = store.fetch("run-1").await.unwrap();

        assert!(fetched.is_some());
        assert_eq!(fetched.unwrap().session_id, "session-1");
    }

    #[tokio::test]
    async fn test_memory_store_fetch_missing() {
        let store = MemorySessionStore::new();
        assert!(store.fetch("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_upsert_overwrites() {
        let store = MemorySessionStore::new();
        let mut record = RunRecord::new("run-1", "session-1");
        store.upsert(&record).await.unwrap();

        record.transition(RunStatus::Completed);
        store.upsert(&record).await.unwrap();

        let fetched = store.fetch("run-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_memory_store_delete() {
        let store = MemorySessionStore::new();
        store
            .upsert(&RunRecord::new("run-1", "session-1"))
            .await
            .unwrap();
        store.delete("run-1").await.unwrap();
        assert!(store.fetch("run-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(temp_dir.path().to_path_buf());

        let record = RunRecord::new("run-1", "session-1");
        store.upsert(&record).await.unwrap();

        let fetched = store.fetch("run-1").await.unwrap();
        assert!(fetched.is_some());
        assert_eq!(fetched.unwrap().run_id, "run-1");
    }

    #[tokio::test]
    async fn test_file_store_list() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(temp_dir.path().to_path_buf());

        store
            .upsert(&RunRecord::new("run-a", "s"))
            .await
            .unwrap();
        store
            .upsert(&RunRecord::new("run-b", "s"))
            .await
            .unwrap();

        let mut ids = store.list().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["run-a".to_string(), "run-b".to_string()]);
    }

    #[tokio::test]
    async fn test_file_store_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(temp_dir.path().to_path_buf());

        store
            .upsert(&RunRecord::new("run-1", "s"))
            .await
            .unwrap();
        store.delete("run-1").await.unwrap();
        assert!(store.fetch("run-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_list_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSessionStore::new(temp_dir.path().join("nested"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
