//! Audit Recorder: append-only trail of privileged mutations.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use ppghub_auth::{AuditEntry, AuditFilter, AuditRecord};
use ppghub_core::{AuditId, AuthError, AuthResult, UserId};
use ppghub_infra::store::AuditLog;

use crate::context::Runtime;

/// Default number of records a cursor fetches per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Clone)]
pub struct AuditRecorder {
    log: Arc<dyn AuditLog>,
    rt: Runtime,
}

impl AuditRecorder {
    pub fn new(log: Arc<dyn AuditLog>, rt: Runtime) -> Self {
        Self { log, rt }
    }

    /// Append one entry.
    ///
    /// `Unavailable` here is fatal to the caller's surrounding mutation: the
    /// caller must fail (and undo its change) rather than acknowledge it.
    pub async fn record(&self, entry: AuditEntry) -> AuthResult<AuditRecord> {
        let action = entry.action.clone();
        let record = self
            .rt
            .io("audit.append", self.log.append(entry, self.rt.now()))
            .await?;
        tracing::debug!(audit_id = %record.id, action = %action, "audit record appended");
        Ok(record)
    }

    /// Records touching one entity, oldest first.
    pub fn query_by_entity(
        &self,
        entity_type: impl Into<String>,
        entity_id: impl ToString,
    ) -> AuditCursor {
        self.cursor(AuditFilter::entity(entity_type, entity_id))
    }

    /// Records written by one actor, oldest first.
    pub fn query_by_actor(&self, actor: UserId) -> AuditCursor {
        self.cursor(AuditFilter::Actor(actor))
    }

    /// Records in `[from, to)`, oldest first.
    pub fn query_by_time_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> AuditCursor {
        self.cursor(AuditFilter::TimeRange { from, to })
    }

    fn cursor(&self, filter: AuditFilter) -> AuditCursor {
        AuditCursor {
            log: Arc::clone(&self.log),
            rt: self.rt.clone(),
            filter,
            after: None,
            page_size: DEFAULT_PAGE_SIZE,
            exhausted: false,
        }
    }

    /// Audit an administrative mutation that has already been applied.
    ///
    /// If the entry cannot be built or appended, `undo` runs and the call
    /// fails with `Unavailable`.
    pub(crate) async fn record_or_undo<U, Fut>(
        &self,
        entry: AuthResult<AuditEntry>,
        undo: U,
    ) -> AuthResult<AuditRecord>
    where
        U: FnOnce() -> Fut,
        Fut: Future<Output = AuthResult<()>>,
    {
        let outcome = match entry {
            Ok(entry) => self.record(entry).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(record) => Ok(record),
            Err(err) => {
                tracing::warn!(error = %err, "audit write failed; rolling back mutation");
                if let Err(undo_err) = undo().await {
                    tracing::error!(
                        error = %undo_err,
                        audit_error = %err,
                        "rollback after audit failure did not complete"
                    );
                }
                Err(AuthError::unavailable(format!("audit write failed: {err}")))
            }
        }
    }

    /// Audit an authentication-flow event whose state change must stand.
    pub(crate) async fn record_best_effort(&self, entry: AuthResult<AuditEntry>) {
        let outcome = match entry {
            Ok(entry) => {
                let action = entry.action.clone();
                self.record(entry).await.map_err(|err| (action, err))
            }
            Err(err) => Err((String::from("unknown"), err)),
        };
        if let Err((action, err)) = outcome {
            tracing::error!(action = %action, error = %err, "audit write failed for authentication event");
        }
    }
}

impl core::fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuditRecorder").finish_non_exhaustive()
    }
}

/// Lazy, restartable walk over matching audit records.
///
/// Pages are fetched on demand with keyset pagination on the record id, so
/// records appended while iterating show up in later pages.
pub struct AuditCursor {
    log: Arc<dyn AuditLog>,
    rt: Runtime,
    filter: AuditFilter,
    after: Option<AuditId>,
    page_size: usize,
    exhausted: bool,
}

impl AuditCursor {
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn filter(&self) -> &AuditFilter {
        &self.filter
    }

    /// The next page; empty once the sequence is exhausted.
    pub async fn next_page(&mut self) -> AuthResult<Vec<AuditRecord>> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        let page = self
            .rt
            .io(
                "audit.scan",
                self.log.scan(&self.filter, self.after, self.page_size),
            )
            .await?;

        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.after = Some(last.id);
        }
        Ok(page)
    }

    /// Start over from the first matching record.
    pub fn rewind(&mut self) {
        self.after = None;
        self.exhausted = false;
    }

    /// Drain every remaining page.
    pub async fn collect_all(mut self) -> AuthResult<Vec<AuditRecord>> {
        let mut records = Vec::new();
        loop {
            let page = self.next_page().await?;
            if page.is_empty() {
                return Ok(records);
            }
            records.extend(page);
        }
    }
}

impl core::fmt::Debug for AuditCursor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuditCursor")
            .field("filter", &self.filter)
            .field("after", &self.after)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use ppghub_auth::audit::actions;
    use ppghub_core::{Clock, ManualClock, SystemClock};
    use ppghub_infra::store::InMemoryAuditLog;

    use super::*;

    fn recorder(log: Arc<dyn AuditLog>) -> AuditRecorder {
        AuditRecorder::new(log, Runtime::new(Arc::new(SystemClock), Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn cursor_pages_and_rewinds() {
        let audit = recorder(Arc::new(InMemoryAuditLog::new()));
        for i in 0..5 {
            audit
                .record(AuditEntry::new(actions::USER_VERIFIED, "user", 7).actor(Some(UserId::new(i))))
                .await
                .unwrap();
        }
        audit
            .record(AuditEntry::new(actions::USER_VERIFIED, "user", 8))
            .await
            .unwrap();

        let mut cursor = audit.query_by_entity("user", 7).page_size(2);
        assert_eq!(cursor.next_page().await.unwrap().len(), 2);
        assert_eq!(cursor.next_page().await.unwrap().len(), 2);
        assert_eq!(cursor.next_page().await.unwrap().len(), 1);
        assert!(cursor.next_page().await.unwrap().is_empty());

        cursor.rewind();
        let again = cursor.next_page().await.unwrap();
        assert_eq!(again[0].entity_id, "7");
        assert_eq!(again[0].actor, Some(UserId::new(0)));
    }

    #[tokio::test]
    async fn time_range_is_half_open() {
        let clock = Arc::new(ManualClock::default());
        let start = clock.now();
        let audit = AuditRecorder::new(
            Arc::new(InMemoryAuditLog::new()),
            Runtime::new(clock.clone(), Duration::from_secs(1)),
        );

        audit.record(AuditEntry::new("a", "x", 1)).await.unwrap();
        clock.advance(chrono::Duration::minutes(1));
        audit.record(AuditEntry::new("b", "x", 2)).await.unwrap();

        let records = audit
            .query_by_time_range(start, start + chrono::Duration::minutes(1))
            .collect_all()
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "a");
    }

    #[tokio::test]
    async fn failed_append_runs_undo_and_reports_unavailable() {
        let audit = recorder(Arc::new(InMemoryAuditLog::with_capacity_limit(0)));
        let undone = AtomicBool::new(false);

        let err = audit
            .record_or_undo(Ok(AuditEntry::new("a", "x", 1)), || async {
                undone.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Unavailable(_)));
        assert!(undone.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn best_effort_swallows_failures() {
        let log = Arc::new(InMemoryAuditLog::with_capacity_limit(0));
        let audit = recorder(log.clone());
        audit
            .record_best_effort(Ok(AuditEntry::new(actions::SESSION_LOGIN, "session", 1)))
            .await;
        assert!(log.is_empty());
    }
}
