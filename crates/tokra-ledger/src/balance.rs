//! Balance aggregation.
//!
//! Nothing is stored as a running total: a user's balance is the fold of
//! every event they appear in, read through the `user_created` and
//! `beneficiary_created` indexes (scan fallback when one is unavailable).
//! The fold is associative and commutative over its operations, so slight
//! clock skew between writers is tolerated.

use std::collections::BTreeMap;

use serde::Serialize;
use tokra_core::constants::{LOG_TARGET, SYSTEM_BENEFICIARY};
use tokra_core::entry::{HoldState, LedgerEntry, TransactionType};
use tokra_core::error::LedgerError;
use tokra_core::sink::ErrorSink;
use tokra_core::split::BalanceSnapshot;
use tokra_core::timeutil;
use tokra_core::types::Amount;
use tokra_store::index::{IndexName, IndexQuery};
use tokra_store::store::{EntryStore, ScanOptions, StoreError};
use tracing::warn;

use crate::manager::{require_id, store_err, TokenManager};

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Balance {
    pub paid_tokens: Amount,
    /// Net free tokens per grant bucket; empty and negative buckets are
    /// omitted.
    pub free_tokens_per_beneficiary: BTreeMap<String, Amount>,
    pub total_free_tokens: Amount,
}

/// One non-expired grant feeding a bucket.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExpirySlice {
    pub expires_at: String,
    pub amount: Amount,
    pub transaction_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BucketBreakdown {
    /// Net bucket balance (grants minus consumption).
    pub total: Amount,
    /// Gross non-expired grants, soonest expiry first.
    pub by_expiry: Vec<ExpirySlice>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BalanceDrilldown {
    pub paid_tokens: Amount,
    pub free_tokens_per_beneficiary: BTreeMap<String, Amount>,
    pub total_free_tokens: Amount,
    pub free_tokens_breakdown: BTreeMap<String, BucketBreakdown>,
}

// ── Aggregation ───────────────────────────────────────────────────────────────

impl TokenManager {
    pub fn get_balance(&self, user_id: &str) -> Result<Balance, LedgerError> {
        require_id(user_id, "userId")?;
        let events = self.user_events(user_id)?;
        Ok(fold_balance(user_id, &events, self.sink()))
    }

    /// The balance as split-calculator input.
    pub fn balance_snapshot(&self, user_id: &str) -> Result<BalanceSnapshot, LedgerError> {
        let balance = self.get_balance(user_id)?;
        Ok(BalanceSnapshot {
            paid: balance.paid_tokens,
            free_per_beneficiary: balance.free_tokens_per_beneficiary,
        })
    }

    pub fn get_balance_with_drilldown(
        &self,
        user_id: &str,
    ) -> Result<BalanceDrilldown, LedgerError> {
        require_id(user_id, "userId")?;
        let events = self.user_events(user_id)?;
        let balance = fold_balance(user_id, &events, self.sink());

        let mut breakdown: BTreeMap<String, BucketBreakdown> = BTreeMap::new();
        for e in &events {
            if e.transaction_type == TransactionType::CreditFree
                && e.user_id == user_id
                && !timeutil::is_past(&e.expires_at)
            {
                breakdown
                    .entry(e.beneficiary_id.clone())
                    .or_default()
                    .by_expiry
                    .push(ExpirySlice {
                        expires_at: e.expires_at.clone(),
                        amount: e.amount,
                        transaction_id: e.id.clone(),
                    });
            }
        }
        for (bucket_id, bucket) in &mut breakdown {
            bucket.by_expiry.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
            bucket.total = balance
                .free_tokens_per_beneficiary
                .get(bucket_id)
                .copied()
                .unwrap_or(0);
        }

        Ok(BalanceDrilldown {
            paid_tokens: balance.paid_tokens,
            free_tokens_per_beneficiary: balance.free_tokens_per_beneficiary,
            total_free_tokens: balance.total_free_tokens,
            free_tokens_breakdown: breakdown,
        })
    }

    /// Every event the user appears in (as payer/holder/sender or as
    /// beneficiary), deduplicated and in `(created_at, id)` order.
    pub(crate) fn user_events(&self, user_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        let own = self.query_with_scan_fallback(
            IndexQuery::all(IndexName::UserCreated, user_id),
            |e| e.user_id == user_id,
        )?;
        let received = self.query_with_scan_fallback(
            IndexQuery::all(IndexName::BeneficiaryCreated, user_id),
            |e| e.beneficiary_id == user_id,
        )?;

        let mut by_id: BTreeMap<String, LedgerEntry> = BTreeMap::new();
        for e in own.into_iter().chain(received) {
            by_id.insert(e.id.clone(), e);
        }
        let mut events: Vec<LedgerEntry> = by_id.into_values().collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    /// Index query with the documented degraded path: on
    /// `IndexUnavailable`, scan the primary table and filter.
    pub(crate) fn query_with_scan_fallback(
        &self,
        query: IndexQuery,
        matches: impl Fn(&LedgerEntry) -> bool,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        match self.store().query_by_index(&query) {
            Ok(rows) => Ok(rows),
            Err(StoreError::IndexUnavailable(index)) => {
                warn!(
                    target: LOG_TARGET,
                    index,
                    "index unavailable; falling back to table scan"
                );
                let mut rows: Vec<LedgerEntry> = self
                    .store()
                    .scan(&ScanOptions::default())
                    .map_err(store_err)?
                    .into_iter()
                    .filter(|e| matches(e))
                    .collect();
                rows.sort_by(|a, b| {
                    a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
                });
                Ok(rows)
            }
            Err(e) => Err(store_err(e)),
        }
    }
}

/// Fold `events` into the balance of `user_id`.
///
/// Accumulators are i128: negative intermediate values are legal (a grant
/// can expire after partial consumption), but a negative *paid* result has
/// no legal history and is reported as corruption before clamping.
pub fn fold_balance(user_id: &str, events: &[LedgerEntry], sink: &dyn ErrorSink) -> Balance {
    let mut paid: i128 = 0;
    let mut buckets: BTreeMap<String, i128> = BTreeMap::new();

    for e in events {
        let amount = e.amount as i128;
        let free_beneficiary = e.free_beneficiary_consumed as i128;
        let free_system = e.free_system_consumed as i128;

        match e.transaction_type {
            TransactionType::CreditPaid => {
                if e.user_id == user_id {
                    paid += amount;
                }
            }
            TransactionType::CreditFree => {
                if e.user_id == user_id && !timeutil::is_past(&e.expires_at) {
                    *buckets.entry(e.beneficiary_id.clone()).or_default() += amount;
                }
            }
            TransactionType::Debit => {
                if e.user_id == user_id {
                    paid -= amount;
                    *buckets.entry(e.beneficiary_id.clone()).or_default() -= free_beneficiary;
                    *buckets.entry(SYSTEM_BENEFICIARY.to_string()).or_default() -= free_system;
                }
            }
            TransactionType::Hold => {
                if e.state.is_none() {
                    sink.record(
                        &format!("hold {} has no state attribute", e.id),
                        "HOLD_MISSING_STATE",
                        "balance_fold",
                    );
                }
                // A reversed hold never happened, balance-wise. A missing
                // state is treated as still-open: the safe default keeps the
                // reservation charged.
                if e.state == Some(HoldState::Reversed) {
                    continue;
                }
                if e.user_id == user_id {
                    paid -= amount;
                    *buckets.entry(e.beneficiary_id.clone()).or_default() -= free_beneficiary;
                    *buckets.entry(SYSTEM_BENEFICIARY.to_string()).or_default() -= free_system;
                }
                if e.state == Some(HoldState::Captured)
                    && e.beneficiary_id == user_id
                    && e.user_id != e.beneficiary_id
                {
                    paid += amount;
                }
            }
            TransactionType::Tip => {
                if e.user_id == user_id {
                    paid -= amount;
                    let source = e
                        .free_beneficiary_source_id
                        .as_deref()
                        .unwrap_or(&e.beneficiary_id);
                    *buckets.entry(source.to_string()).or_default() -= free_beneficiary;
                    *buckets.entry(SYSTEM_BENEFICIARY.to_string()).or_default() -= free_system;
                } else if e.beneficiary_id == user_id {
                    // The receiver sees the nominal tip total as paid
                    // tokens; the free portions were destroyed sender-side.
                    paid += amount + free_beneficiary + free_system;
                }
            }
        }
    }

    if paid < 0 {
        sink.record(
            &format!("folded paid balance for {user_id} is negative ({paid})"),
            "NEGATIVE_PAID_BALANCE",
            "balance_fold",
        );
    }

    let free_tokens_per_beneficiary: BTreeMap<String, Amount> = buckets
        .into_iter()
        .filter(|(_, v)| *v > 0)
        .map(|(k, v)| (k, v as Amount))
        .collect();
    let total_free_tokens = free_tokens_per_beneficiary.values().sum();

    Balance {
        paid_tokens: paid.max(0) as Amount,
        free_tokens_per_beneficiary,
        total_free_tokens,
    }
}
