use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ppghub_auth::{AuditEntry, AuditFilter, AuditRecord};
use ppghub_core::{AuditId, AuthError, AuthResult};

use super::poisoned;

/// Append-only audit log.
///
/// Records are never updated or deleted.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append an entry; ids increase monotonically in append order.
    async fn append(&self, entry: AuditEntry, at: DateTime<Utc>) -> AuthResult<AuditRecord>;

    /// Up to `limit` records matching `filter` with id greater than `after`,
    /// in id order.
    async fn scan(
        &self,
        filter: &AuditFilter,
        after: Option<AuditId>,
        limit: usize,
    ) -> AuthResult<Vec<AuditRecord>>;
}

/// In-memory audit log for tests/dev.
///
/// With a capacity set, appends beyond it fail with `Unavailable`, which is
/// how storage exhaustion shows up to callers.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    records: RwLock<Vec<AuditRecord>>,
    capacity: Option<usize>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            capacity: Some(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, entry: AuditEntry, at: DateTime<Utc>) -> AuthResult<AuditRecord> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        if self.capacity.is_some_and(|cap| records.len() >= cap) {
            return Err(AuthError::unavailable("audit log storage exhausted"));
        }

        // ids are 1-based positions in the log
        let id = AuditId::new(records.len() as u64 + 1);
        let record = AuditRecord::from_entry(id, entry, at);
        records.push(record.clone());
        Ok(record)
    }

    async fn scan(
        &self,
        filter: &AuditFilter,
        after: Option<AuditId>,
        limit: usize,
    ) -> AuthResult<Vec<AuditRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let start = after.map(|id| id.get() as usize).unwrap_or(0).min(records.len());

        Ok(records[start..]
            .iter()
            .filter(|r| filter.matches(r))
            .take(limit)
            .cloned()
            .collect())
    }
}
