//! Approval persistence.
//!
//! The update path is an optimistic compare-and-swap keyed on an expected
//! status: a lost race returns `None` rather than an error, because
//! concurrent resolution attempts are an expected condition. This is the
//! only concurrency contract the store needs; multiple process instances
//! may race on the same approval safely.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::approval::{Approval, ApprovalPayload, ApprovalStatus, ApprovalType, SourceType};
use crate::error::StoreError;
use stepflow_protocols::Metadata;

/// Query filter for approvals.
#[derive(Debug, Clone, Default)]
pub struct ApprovalFilter {
    pub status: Option<ApprovalStatus>,
    pub approval_type: Option<ApprovalType>,
    pub source_type: Option<SourceType>,

    /// Maximum number of records to return; unlimited when `None`.
    pub limit: Option<usize>,

    /// Records to skip before collecting.
    pub offset: usize,
}

impl ApprovalFilter {
    pub fn with_status(mut self, status: ApprovalStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_approval_type(mut self, approval_type: ApprovalType) -> Self {
        self.approval_type = Some(approval_type);
        self
    }

    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = Some(source_type);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, approval: &Approval) -> bool {
        self.status.map(|s| approval.status == s).unwrap_or(true)
            && self
                .approval_type
                .map(|t| approval.approval_type == t)
                .unwrap_or(true)
            && self
                .source_type
                .map(|t| approval.source_type == t)
                .unwrap_or(true)
    }
}

/// Fields applied by a successful compare-and-swap update.
#[derive(Debug, Clone)]
pub struct ApprovalUpdate {
    /// New status.
    pub status: ApprovalStatus,

    /// Who resolved the approval.
    pub resolved_by: Option<String>,

    /// Resolution timestamp; defaults to now when `None`.
    pub resolved_at: Option<DateTime<Utc>>,

    /// Replacement payload, for resolutions that carry values.
    pub payload: Option<ApprovalPayload>,

    /// Context entries merged into the record.
    pub context: Metadata,
}

impl ApprovalUpdate {
    pub fn to_status(status: ApprovalStatus) -> Self {
        Self {
            status,
            resolved_by: None,
            resolved_at: None,
            payload: None,
            context: Metadata::new(),
        }
    }

    pub fn with_resolved_by(mut self, who: impl Into<String>) -> Self {
        self.resolved_by = Some(who.into());
        self
    }

    pub fn with_payload(mut self, payload: ApprovalPayload) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Approval persistence boundary.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Persist a new approval record.
    async fn create(&self, approval: &Approval) -> Result<(), StoreError>;

    /// Fetch an approval by ID.
    async fn get(&self, id: &Uuid) -> Result<Option<Approval>, StoreError>;

    /// Query approvals; returns the matching page and the total count of
    /// matches before paging.
    async fn query(&self, filter: &ApprovalFilter) -> Result<(Vec<Approval>, usize), StoreError>;

    /// Compare-and-swap update.
    ///
    /// Applies `update` only when the record exists and its status equals
    /// `expected_status`; otherwise returns `Ok(None)` without touching
    /// the record.
    async fn update(
        &self,
        id: &Uuid,
        expected_status: ApprovalStatus,
        update: ApprovalUpdate,
    ) -> Result<Option<Approval>, StoreError>;

    /// Number of approvals currently pending.
    async fn pending_count(&self) -> Result<usize, StoreError>;
}

/// In-memory approval store.
///
/// The compare-and-swap runs under a single write lock, so exactly one of
/// any set of racing resolvers wins.
pub struct MemoryApprovalStore {
    approvals: RwLock<HashMap<Uuid, Approval>>,
}

impl MemoryApprovalStore {
    pub fn new() -> Self {
        Self {
            approvals: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryApprovalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApprovalStore for MemoryApprovalStore {
    async fn create(&self, approval: &Approval) -> Result<(), StoreError> {
        debug!(
            "Creating approval {} for run {} ({:?})",
            approval.id, approval.run_id, approval.status
        );
        self.approvals
            .write()
            .await
            .insert(approval.id, approval.clone());
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Approval>, StoreError> {
        Ok(self.approvals.read().await.get(id).cloned())
    }

    async fn query(&self, filter: &ApprovalFilter) -> Result<(Vec<Approval>, usize), StoreError> {
        let approvals = self.approvals.read().await;
        let mut matches: Vec<Approval> = approvals
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        matches.sort_by_key(|a| a.created_at);

        let total = matches.len();
        let page: Vec<Approval> = matches
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();

        Ok((page, total))
    }

    async fn update(
        &self,
        id: &Uuid,
        expected_status: ApprovalStatus,
        update: ApprovalUpdate,
    ) -> Result<Option<Approval>, StoreError> {
        let mut approvals = self.approvals.write().await;

        let Some(record) = approvals.get_mut(id) else {
            return Ok(None);
        };
        if record.status != expected_status {
            debug!(
                "Approval {} CAS rejected: expected {:?}, found {:?}",
                id, expected_status, record.status
            );
            return Ok(None);
        }

        record.status = update.status;
        record.resolved_by = update.resolved_by;
        record.resolved_at = Some(update.resolved_at.unwrap_or_else(Utc::now));
        if let Some(payload) = update.payload {
            record.payload = payload;
        }
        record.context.extend(update.context);

        Ok(Some(record.clone()))
    }

    async fn pending_count(&self) -> Result<usize, StoreError> {
        Ok(self
            .approvals
            .read()
            .await
            .values()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .count())
    }
}
