//! Expiry worker: find and reverse stale OPEN holds.

use std::sync::Arc;

use serde::Serialize;
use tokra_core::constants::LOG_TARGET;
use tokra_core::entry::{HoldState, LedgerEntry, TransactionType};
use tokra_core::error::LedgerError;
use tokra_core::timeutil;
use tokra_ledger::{HoldTarget, TokenManager};
use tokra_store::index::{IndexName, IndexQuery};
use tokra_store::store::{EntryStore, ScanOptions, StoreError};
use tracing::{info, warn};

/// Outcome of one `process_expired` run. Per-row failures are collected,
/// never allowed to abort the batch.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ExpirySummary {
    pub examined: usize,
    pub reversed: usize,
    pub failed: usize,
    /// `(hold id, error message)` per failed row.
    pub errors: Vec<(String, String)>,
}

pub struct ExpiryWorker {
    manager: Arc<TokenManager>,
}

impl ExpiryWorker {
    pub fn new(manager: Arc<TokenManager>) -> Self {
        Self { manager }
    }

    /// Open holds whose deadline passed at least `expired_for_secs` ago,
    /// at most `limit`, in deadline order. Reads the `type_expires` index
    /// and falls back to a scan when it is unavailable. Rows with a missing
    /// state are reported as corruption and excluded.
    pub fn find_expired(
        &self,
        expired_for_secs: i64,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let now = timeutil::parse_to_timestamp(&timeutil::now_iso()).unwrap_or_default();
        let bound = timeutil::from_unix_timestamp(now - expired_for_secs);
        let query = IndexQuery::up_to(
            IndexName::TypeExpires,
            TransactionType::Hold.as_str(),
            &bound,
        );

        let candidates = match self.manager.store().query_by_index(&query) {
            Ok(rows) => rows,
            Err(StoreError::IndexUnavailable(index)) => {
                warn!(
                    target: LOG_TARGET,
                    index,
                    "type_expires index unavailable; falling back to table scan"
                );
                let mut rows: Vec<LedgerEntry> = self
                    .manager
                    .store()
                    .scan(&ScanOptions::default())
                    .map_err(|e| LedgerError::Storage(e.to_string()))?
                    .into_iter()
                    .filter(|e| e.is_hold() && e.expires_at.as_str() <= bound.as_str())
                    .collect();
                rows.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
                rows
            }
            Err(e) => return Err(LedgerError::Storage(e.to_string())),
        };

        let mut out = Vec::new();
        for entry in candidates {
            if out.len() >= limit {
                break;
            }
            match entry.state {
                Some(HoldState::Open) => out.push(entry),
                Some(_) => {}
                None => {
                    self.manager.sink().record(
                        &format!("hold {} has no state attribute", entry.id),
                        "HOLD_MISSING_STATE",
                        "expiry_worker",
                    );
                }
            }
        }
        Ok(out)
    }

    /// Reverse every expired open hold, one batch of `batch_size`. A row
    /// that fails lands in the summary; the batch keeps going.
    pub fn process_expired(
        &self,
        expired_for_secs: i64,
        batch_size: usize,
    ) -> Result<ExpirySummary, LedgerError> {
        let expired = self.find_expired(expired_for_secs, batch_size)?;
        let mut summary = ExpirySummary {
            examined: expired.len(),
            ..Default::default()
        };

        for entry in expired {
            match self.manager.reverse_held(&HoldTarget::by_id(&entry.id)) {
                Ok(outcome) => summary.reversed += outcome.processed,
                Err(e) => {
                    summary.failed += 1;
                    summary.errors.push((entry.id.clone(), e.to_string()));
                }
            }
        }

        info!(
            target: LOG_TARGET,
            action = "process_expired",
            examined = summary.examined,
            reversed = summary.reversed,
            failed = summary.failed,
            "expiry sweep complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokra_core::entry::Metadata;
    use tokra_core::sink::MemorySink;
    use tokra_ledger::HoldOptions;
    use tokra_store::{FaultyIndexStore, SledStore};

    fn testing_hold(ref_id: &str, secs: i64) -> HoldOptions {
        HoldOptions {
            ref_id: Some(ref_id.to_string()),
            expires_after_secs: secs,
            purpose: None,
            meta: Some(Metadata::default().with_field("testing", serde_json::json!(true))),
        }
    }

    #[test]
    fn sweep_reverses_stale_open_holds() {
        let store = Arc::new(SledStore::temporary().unwrap());
        let manager = Arc::new(TokenManager::new(store));
        manager.credit_paid("bob", 50, "purchase", None).unwrap();
        let hold = manager
            .hold("bob", 10, "carol", testing_hold("booking-exp", 1))
            .unwrap();
        assert_eq!(manager.get_balance("bob").unwrap().paid_tokens, 40);

        std::thread::sleep(Duration::from_millis(2200));

        let worker = ExpiryWorker::new(manager.clone());
        let summary = worker.process_expired(1, 10).unwrap();
        assert!(summary.reversed >= 1);
        assert_eq!(summary.failed, 0);

        let row = manager.store().get(&hold.id).unwrap().unwrap();
        assert_eq!(row.state, Some(HoldState::Reversed));
        assert_eq!(manager.get_balance("bob").unwrap().paid_tokens, 50);
    }

    #[test]
    fn find_expired_skips_live_and_terminal_holds() {
        let store = Arc::new(SledStore::temporary().unwrap());
        let manager = Arc::new(TokenManager::new(store.clone()));
        manager.credit_paid("bob", 50, "purchase", None).unwrap();

        // A hold with plenty of time left.
        manager
            .hold("bob", 5, "carol", testing_hold("booking-live", 3600))
            .unwrap();
        // A reversed hold with a long-gone deadline, written directly.
        let stale = LedgerEntry {
            id: "stale-reversed".into(),
            user_id: "bob".into(),
            beneficiary_id: "carol".into(),
            transaction_type: TransactionType::Hold,
            amount: 5,
            purpose: "hold".into(),
            ref_id: "noref-stale".into(),
            expires_at: "2020-01-01T00:00:00.000Z".into(),
            created_at: "2020-01-01T00:00:00.000Z".into(),
            metadata: Metadata::Raw("{}".into()),
            state: Some(HoldState::Reversed),
            version: 2,
            free_beneficiary_consumed: 0,
            free_system_consumed: 0,
            free_beneficiary_source_id: None,
        };
        store.put(&stale).unwrap();

        let worker = ExpiryWorker::new(manager);
        let expired = worker.find_expired(0, 10).unwrap();
        assert!(expired.is_empty());
    }

    #[test]
    fn find_expired_reports_holds_without_state_as_corruption() {
        let store = Arc::new(SledStore::temporary().unwrap());
        let sink = Arc::new(MemorySink::new());
        let manager = Arc::new(TokenManager::new(store.clone()).with_sink(sink.clone()));

        let corrupt = LedgerEntry {
            id: "stateless".into(),
            user_id: "bob".into(),
            beneficiary_id: "carol".into(),
            transaction_type: TransactionType::Hold,
            amount: 5,
            purpose: "hold".into(),
            ref_id: "noref-stateless".into(),
            expires_at: "2020-01-01T00:00:00.000Z".into(),
            created_at: "2020-01-01T00:00:00.000Z".into(),
            metadata: Metadata::Raw("{}".into()),
            state: None,
            version: 1,
            free_beneficiary_consumed: 0,
            free_system_consumed: 0,
            free_beneficiary_source_id: None,
        };
        store.put(&corrupt).unwrap();

        let worker = ExpiryWorker::new(manager);
        let expired = worker.find_expired(0, 10).unwrap();
        assert!(expired.is_empty());
        assert!(sink.codes().contains(&"HOLD_MISSING_STATE".to_string()));
    }

    #[test]
    fn find_expired_falls_back_to_scan_when_index_is_down() {
        let store = Arc::new(FaultyIndexStore::new(SledStore::temporary().unwrap()));
        let manager = Arc::new(TokenManager::new(store.clone()));
        manager.credit_paid("bob", 50, "purchase", None).unwrap();
        manager
            .hold("bob", 10, "carol", testing_hold("booking-down", 1))
            .unwrap();

        std::thread::sleep(Duration::from_millis(1200));
        store.fail_index(IndexName::TypeExpires);

        let worker = ExpiryWorker::new(manager);
        let expired = worker.find_expired(0, 10).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].ref_id, "booking-down");
    }
}
