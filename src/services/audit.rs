use crate::{
    error::Result,
    models::audit::{actions, AuditEntry, AuditFilter, NewAuditEntry},
    repositories::audit as audit_repo,
};
use chrono::{DateTime, Duration, Utc};
use deadpool_postgres::Pool;

/// Append-only recorder for the audit trail.
///
/// Recording never fails the surrounding operation: a login must not
/// bounce because the trail could not be written, so insert errors are
/// logged and swallowed. Queries and the retention sweep report errors
/// normally.
#[derive(Clone)]
pub struct AuditRecorder {
    pool: Pool,
    enabled: bool,
    retention_days: i64,
}

impl AuditRecorder {
    pub fn new(pool: Pool, enabled: bool, retention_days: i64) -> Self {
        AuditRecorder {
            pool,
            enabled,
            retention_days,
        }
    }

    /// Writes one entry, best-effort.
    pub async fn record(&self, entry: NewAuditEntry) {
        if !self.enabled {
            return;
        }
        let action = entry.action;
        if let Err(err) = audit_repo::insert(&self.pool, &entry, Utc::now()).await {
            tracing::error!(action, error = %err, "Failed to write audit entry");
        }
    }

    /// Filtered page of entries, newest first, plus the total count for
    /// the same filter.
    pub async fn logs(&self, filter: &AuditFilter) -> Result<(Vec<AuditEntry>, i64)> {
        let entries = audit_repo::list(&self.pool, filter).await?;
        let total = audit_repo::count(&self.pool, filter).await?;
        Ok((entries, total))
    }

    /// Security-relevant entries inside an optional time range.
    pub async fn security_events(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        skip: i64,
        take: i64,
    ) -> Result<Vec<AuditEntry>> {
        audit_repo::list_security_events(&self.pool, start, end, skip.max(0), take.clamp(1, 200)).await
    }

    /// Per-action counts inside an optional time range.
    pub async fn statistics(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<(String, i64)>> {
        audit_repo::statistics_by_action(&self.pool, start, end).await
    }

    /// Deletes entries older than the retention horizon and records the
    /// sweep itself. Returns how many rows were removed.
    pub async fn sweep_retention(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - Duration::days(self.retention_days);
        let removed = audit_repo::delete_older_than(&self.pool, cutoff).await?;

        if removed > 0 {
            tracing::info!(removed, retention_days = self.retention_days, "Audit retention sweep");
            self.record(NewAuditEntry::system(
                actions::AUDIT_CLEANUP,
                format!("Removed {removed} audit entries past the {}-day retention", self.retention_days),
            ))
            .await;
        }
        Ok(removed)
    }
}
