//! Retention worker: archive and delete records past the retention window.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokra_core::constants::{
    LOG_TARGET, RETENTION_DEFAULT_LIMIT, RETENTION_DEFAULT_MAX_SECS,
    RETENTION_DEFAULT_OLDER_THAN_DAYS,
};
use tokra_core::error::LedgerError;
use tokra_core::timeutil;
use tokra_store::store::{EntryStore, ScanOptions};
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct PurgeOptions {
    pub older_than_days: i64,
    /// Rows examined per run; bounds the scan, not just the deletes.
    pub limit: usize,
    /// Report without mutating. The safe default.
    pub dry_run: bool,
    /// Copy each row into the archive table before deleting it.
    pub archive: bool,
    /// Soft wall-clock budget for the run (seconds).
    pub max_seconds: u64,
}

impl Default for PurgeOptions {
    fn default() -> Self {
        Self {
            older_than_days: RETENTION_DEFAULT_OLDER_THAN_DAYS,
            limit: RETENTION_DEFAULT_LIMIT,
            dry_run: true,
            archive: false,
            max_seconds: RETENTION_DEFAULT_MAX_SECS,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct PurgeSummary {
    pub scanned: usize,
    pub candidates: usize,
    pub archived: usize,
    pub deleted: usize,
    pub dry_run: bool,
    pub cutoff_iso: String,
    pub duration_seconds: f64,
}

pub struct RetentionWorker {
    store: Arc<dyn EntryStore>,
}

impl RetentionWorker {
    pub fn new(store: Arc<dyn EntryStore>) -> Self {
        Self { store }
    }

    /// One retention pass: scan up to `limit` rows, pick those created
    /// before the cutoff, archive (optionally) and delete them. The loop
    /// aborts once `max_seconds` of wall clock is spent; the next cron tick
    /// picks up the remainder.
    pub fn purge_old(&self, opts: &PurgeOptions) -> Result<PurgeSummary, LedgerError> {
        let started = Instant::now();
        let now = timeutil::parse_to_timestamp(&timeutil::now_iso()).unwrap_or_default();
        let cutoff_iso = timeutil::from_unix_timestamp(now - opts.older_than_days * 86_400);

        let mut summary = PurgeSummary {
            dry_run: opts.dry_run,
            cutoff_iso: cutoff_iso.clone(),
            ..Default::default()
        };

        let rows = self
            .store
            .scan(&ScanOptions { limit: Some(opts.limit) })
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        for entry in rows {
            if started.elapsed().as_secs() >= opts.max_seconds {
                warn!(
                    target: LOG_TARGET,
                    action = "purge_old",
                    budget_secs = opts.max_seconds,
                    "wall-clock budget exhausted; aborting run"
                );
                break;
            }
            summary.scanned += 1;

            if entry.created_at.as_str() >= cutoff_iso.as_str() {
                continue;
            }
            summary.candidates += 1;
            if opts.dry_run {
                continue;
            }
            if opts.archive {
                self.store
                    .archive(&entry)
                    .map_err(|e| LedgerError::Storage(e.to_string()))?;
                summary.archived += 1;
            }
            self.store
                .delete(&entry.id)
                .map_err(|e| LedgerError::Storage(e.to_string()))?;
            summary.deleted += 1;
        }

        summary.duration_seconds = started.elapsed().as_secs_f64();
        info!(
            target: LOG_TARGET,
            action = "purge_old",
            scanned = summary.scanned,
            candidates = summary.candidates,
            archived = summary.archived,
            deleted = summary.deleted,
            dry_run = summary.dry_run,
            cutoff = %summary.cutoff_iso,
            "retention pass complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokra_core::constants::NEVER_EXPIRES;
    use tokra_core::entry::{LedgerEntry, Metadata, TransactionType};
    use tokra_store::SledStore;

    fn entry(id: &str, created_at: &str) -> LedgerEntry {
        LedgerEntry {
            id: id.into(),
            user_id: "alice".into(),
            beneficiary_id: "system".into(),
            transaction_type: TransactionType::CreditPaid,
            amount: 5,
            purpose: "p".into(),
            ref_id: format!("noref-{id}"),
            expires_at: NEVER_EXPIRES.into(),
            created_at: created_at.into(),
            metadata: Metadata::Raw("{}".into()),
            state: None,
            version: 1,
            free_beneficiary_consumed: 0,
            free_system_consumed: 0,
            free_beneficiary_source_id: None,
        }
    }

    fn seeded_store() -> Arc<SledStore> {
        let store = Arc::new(SledStore::temporary().unwrap());
        store.put(&entry("old1", "2020-01-01T00:00:00.000Z")).unwrap();
        store.put(&entry("old2", "2021-06-15T00:00:00.000Z")).unwrap();
        store.put(&entry("new1", &tokra_core::timeutil::now_iso())).unwrap();
        store
    }

    #[test]
    fn dry_run_reports_without_deleting() {
        let store = seeded_store();
        let worker = RetentionWorker::new(store.clone());
        let summary = worker.purge_old(&PurgeOptions::default()).unwrap();
        assert_eq!(summary.scanned, 3);
        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.deleted, 0);
        assert!(summary.dry_run);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn purge_archives_then_deletes() {
        let store = seeded_store();
        let worker = RetentionWorker::new(store.clone());
        let summary = worker
            .purge_old(&PurgeOptions {
                dry_run: false,
                archive: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.archived, 2);
        assert_eq!(summary.deleted, 2);
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.get_archived("old1").unwrap().is_some());
        assert!(store.get_archived("old2").unwrap().is_some());
        assert!(store.get_archived("new1").unwrap().is_none());
    }

    #[test]
    fn purge_without_archive_only_deletes() {
        let store = seeded_store();
        let worker = RetentionWorker::new(store.clone());
        let summary = worker
            .purge_old(&PurgeOptions {
                dry_run: false,
                archive: false,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(summary.archived, 0);
        assert_eq!(summary.deleted, 2);
        assert!(store.get_archived("old1").unwrap().is_none());
    }

    #[test]
    fn scan_limit_bounds_the_run() {
        let store = seeded_store();
        let worker = RetentionWorker::new(store);
        let summary = worker
            .purge_old(&PurgeOptions { limit: 1, ..Default::default() })
            .unwrap();
        assert_eq!(summary.scanned, 1);
    }

    #[test]
    fn zero_budget_aborts_immediately() {
        let store = seeded_store();
        let worker = RetentionWorker::new(store.clone());
        let summary = worker
            .purge_old(&PurgeOptions {
                dry_run: false,
                max_seconds: 0,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(summary.scanned, 0);
        assert_eq!(summary.deleted, 0);
        assert_eq!(store.count().unwrap(), 3);
    }
}
