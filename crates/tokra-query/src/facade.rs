//! Unified query facade.
//!
//! A single entry point parameterized by operation so that every admin read
//! path shares the same pagination and filter semantics. Pagination is
//! deterministic: `(created_at ASC, id ASC)` order with a
//! `"<created_at>|<id>"` token pointing at the last item returned. A
//! missing token starts from the beginning; so does a token that no longer
//! resolves.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokra_core::constants::{LOG_TARGET, SYSTEM_BENEFICIARY};
use tokra_core::entry::{HoldState, LedgerEntry, TransactionType};
use tokra_core::error::LedgerError;
use tokra_core::types::Amount;
use tokra_ledger::{BalanceDrilldown, TokenManager};
use tokra_store::index::{IndexName, IndexQuery};
use tokra_store::store::{EntryStore, ScanOptions, StoreError};
use tracing::warn;

// ── Operations ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub enum QueryOperation {
    CountAll,
    CountHolds {
        state: Option<HoldState>,
    },
    ListAll {
        limit: usize,
        page_token: Option<String>,
    },
    ListHolds {
        limit: usize,
        page_token: Option<String>,
        state: Option<HoldState>,
    },
    ListUserRecords {
        user_id: String,
        include_beneficiary_records: bool,
        limit: usize,
        page_token: Option<String>,
    },
    GetUserBalanceDrilldown {
        user_id: String,
    },
    ListAllUserBalances,
    ManualAdjustBalance {
        user_id: String,
        amount: i64,
        token_type: String,
        reason: String,
        beneficiary_id: Option<String>,
        expires_at: Option<String>,
    },
}

/// Aggregated per-user balance line for listings.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UserBalanceRow {
    pub user_id: String,
    pub paid_tokens: Amount,
    pub total_free_tokens: Amount,
}

#[derive(Clone, Debug, Serialize)]
pub enum QueryOutcome {
    Count { count: u64 },
    Records { records: Vec<LedgerEntry>, page_token: Option<String> },
    Drilldown(BalanceDrilldown),
    UserBalances { users: Vec<UserBalanceRow> },
    Adjusted { success: bool },
}

// ── Facade ────────────────────────────────────────────────────────────────────

pub struct QueryFacade {
    manager: Arc<TokenManager>,
}

impl QueryFacade {
    pub fn new(manager: Arc<TokenManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<TokenManager> {
        &self.manager
    }

    pub fn execute(&self, operation: QueryOperation) -> Result<QueryOutcome, LedgerError> {
        match operation {
            QueryOperation::CountAll => {
                let count = self.manager.store().count().map_err(storage)?;
                Ok(QueryOutcome::Count { count })
            }
            QueryOperation::CountHolds { state } => {
                let count = self
                    .all_holds()?
                    .into_iter()
                    .filter(|e| state.is_none() || e.state == state)
                    .count() as u64;
                Ok(QueryOutcome::Count { count })
            }
            QueryOperation::ListAll { limit, page_token } => {
                let records = self
                    .manager
                    .store()
                    .scan(&ScanOptions::default())
                    .map_err(storage)?;
                Ok(paged(records, limit, page_token.as_deref()))
            }
            QueryOperation::ListHolds { limit, page_token, state } => {
                let records: Vec<LedgerEntry> = self
                    .all_holds()?
                    .into_iter()
                    .filter(|e| state.is_none() || e.state == state)
                    .collect();
                Ok(paged(records, limit, page_token.as_deref()))
            }
            QueryOperation::ListUserRecords {
                user_id,
                include_beneficiary_records,
                limit,
                page_token,
            } => {
                let mut records = self.indexed_or_scan(
                    IndexQuery::all(IndexName::UserCreated, &user_id),
                    |e| e.user_id == user_id,
                )?;
                if include_beneficiary_records {
                    let received = self.indexed_or_scan(
                        IndexQuery::all(IndexName::BeneficiaryCreated, &user_id),
                        |e| e.beneficiary_id == user_id,
                    )?;
                    let seen: BTreeSet<String> =
                        records.iter().map(|e| e.id.clone()).collect();
                    records.extend(received.into_iter().filter(|e| !seen.contains(&e.id)));
                }
                Ok(paged(records, limit, page_token.as_deref()))
            }
            QueryOperation::GetUserBalanceDrilldown { user_id } => Ok(QueryOutcome::Drilldown(
                self.manager.get_balance_with_drilldown(&user_id)?,
            )),
            QueryOperation::ListAllUserBalances => {
                Ok(QueryOutcome::UserBalances { users: self.all_user_balances(None)? })
            }
            QueryOperation::ManualAdjustBalance {
                user_id,
                amount,
                token_type,
                reason,
                beneficiary_id,
                expires_at,
            } => {
                self.manual_adjust(
                    &user_id,
                    amount,
                    &token_type,
                    &reason,
                    beneficiary_id.as_deref(),
                    expires_at.as_deref(),
                )?;
                Ok(QueryOutcome::Adjusted { success: true })
            }
        }
    }

    // ── Helpers shared with the admin surface ────────────────────────────────

    /// Every HOLD row, via the `type_expires` index partition with a scan
    /// fallback.
    pub(crate) fn all_holds(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.indexed_or_scan(
            IndexQuery::all(IndexName::TypeExpires, TransactionType::Hold.as_str()),
            |e| e.is_hold(),
        )
    }

    pub(crate) fn indexed_or_scan(
        &self,
        query: IndexQuery,
        matches: impl Fn(&LedgerEntry) -> bool,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        match self.manager.store().query_by_index(&query) {
            Ok(rows) => Ok(rows),
            Err(StoreError::IndexUnavailable(index)) => {
                warn!(
                    target: LOG_TARGET,
                    index,
                    "index unavailable; falling back to table scan"
                );
                Ok(self
                    .manager
                    .store()
                    .scan(&ScanOptions::default())
                    .map_err(storage)?
                    .into_iter()
                    .filter(|e| matches(e))
                    .collect())
            }
            Err(e) => Err(storage(e)),
        }
    }

    /// Every party holding a balance: anyone appearing as payer/holder or
    /// as beneficiary (a captured hold credits a user who may never have
    /// written an event themselves). The system sentinel is not a user.
    pub(crate) fn all_user_balances(
        &self,
        search: Option<&str>,
    ) -> Result<Vec<UserBalanceRow>, LedgerError> {
        let rows = self
            .manager
            .store()
            .scan(&ScanOptions::default())
            .map_err(storage)?;
        let mut users: BTreeSet<String> = BTreeSet::new();
        for e in &rows {
            users.insert(e.user_id.clone());
            users.insert(e.beneficiary_id.clone());
        }
        users.remove(SYSTEM_BENEFICIARY);

        let mut out = Vec::new();
        for user_id in users {
            if let Some(needle) = search {
                if !user_id.contains(needle) {
                    continue;
                }
            }
            let balance = self.manager.get_balance(&user_id)?;
            out.push(UserBalanceRow {
                user_id,
                paid_tokens: balance.paid_tokens,
                total_free_tokens: balance.total_free_tokens,
            });
        }
        Ok(out)
    }

    fn manual_adjust(
        &self,
        user_id: &str,
        amount: i64,
        token_type: &str,
        reason: &str,
        beneficiary_id: Option<&str>,
        expires_at: Option<&str>,
    ) -> Result<(), LedgerError> {
        match token_type {
            "paid" => {
                if amount > 0 {
                    self.manager
                        .credit_paid(user_id, amount as Amount, reason, None)?;
                } else if amount < 0 {
                    self.manager
                        .debit_paid_only(user_id, amount.unsigned_abs(), reason)?;
                } else {
                    return Err(LedgerError::InvalidAmount);
                }
            }
            "free" => {
                if amount <= 0 {
                    return Err(LedgerError::InvalidAmount);
                }
                let beneficiary_id =
                    beneficiary_id.ok_or(LedgerError::MissingBeneficiaryId)?;
                self.manager.credit_free(
                    user_id,
                    beneficiary_id,
                    amount as Amount,
                    expires_at,
                    Some(reason),
                    None,
                )?;
            }
            other => return Err(LedgerError::InvalidTokenType(other.to_string())),
        }
        Ok(())
    }
}

// ── Pagination ────────────────────────────────────────────────────────────────

fn storage(e: StoreError) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

fn parse_page_token(token: &str) -> Option<(String, String)> {
    token
        .split_once('|')
        .map(|(created_at, id)| (created_at.to_string(), id.to_string()))
}

/// Order deterministically, resume after the token, and emit the token of
/// the last returned item when more remain.
fn paged(mut records: Vec<LedgerEntry>, limit: usize, token: Option<&str>) -> QueryOutcome {
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let start = match token.and_then(parse_page_token) {
        Some((created_at, id)) => records
            .partition_point(|e| (e.created_at.as_str(), e.id.as_str()) <= (created_at.as_str(), id.as_str())),
        // Missing or unresolvable token: start from the beginning.
        None => 0,
    };

    let remaining = records.len().saturating_sub(start);
    let page: Vec<LedgerEntry> = records.into_iter().skip(start).take(limit).collect();
    let page_token = if remaining > limit {
        page.last().map(|e| format!("{}|{}", e.created_at, e.id))
    } else {
        None
    };
    QueryOutcome::Records { records: page, page_token }
}
