//! Admin read surface.
//!
//! Filtered listing and counting over the whole ledger, per-user balance
//! listings with substring search, and per-day earnings for a beneficiary.
//! All filters combine by conjunction. Pagination takes either a numeric
//! `offset` or an opaque `next_token` (a stringified offset); `limit` must
//! be in `[1, 1000]` and defaults to 20. Malformed dates and paging
//! parameters are validation errors, not empty results.

use std::sync::Arc;

use serde::Serialize;
use tokra_core::constants::{PAGE_LIMIT_DEFAULT, PAGE_LIMIT_MAX};
use tokra_core::entry::{HoldState, LedgerEntry, TransactionType};
use tokra_core::error::LedgerError;
use tokra_core::timeutil;
use tokra_core::types::Amount;
use tokra_ledger::{BalanceDrilldown, TokenManager};
use tokra_store::index::{IndexName, IndexQuery};
use tokra_store::store::{EntryStore, ScanOptions};

use crate::facade::{QueryFacade, UserBalanceRow};

// ── Filters and paging ────────────────────────────────────────────────────────

/// Conjunctive filter over ledger events.
#[derive(Clone, Debug, Default)]
pub struct RecordFilter {
    /// Payee (the event's `user_id`).
    pub user_id: Option<String>,
    pub beneficiary_id: Option<String>,
    pub transaction_type: Option<TransactionType>,
    pub state: Option<HoldState>,
    pub ref_id: Option<String>,
    pub purpose: Option<String>,
    /// Inclusive lower bound on `created_at` (ISO-8601).
    pub created_from: Option<String>,
    /// Inclusive upper bound on `created_at` (ISO-8601).
    pub created_to: Option<String>,
}

struct CompiledFilter {
    filter: RecordFilter,
    from_ts: Option<i64>,
    to_ts: Option<i64>,
}

impl RecordFilter {
    fn compile(&self) -> Result<CompiledFilter, LedgerError> {
        let from_ts = self
            .created_from
            .as_deref()
            .map(|s| {
                timeutil::parse_to_timestamp(s).ok_or_else(|| {
                    LedgerError::InvalidPayload("createdFrom is not a valid date".into())
                })
            })
            .transpose()?;
        let to_ts = self
            .created_to
            .as_deref()
            .map(|s| {
                timeutil::parse_to_timestamp(s).ok_or_else(|| {
                    LedgerError::InvalidPayload("createdTo is not a valid date".into())
                })
            })
            .transpose()?;
        Ok(CompiledFilter { filter: self.clone(), from_ts, to_ts })
    }
}

impl CompiledFilter {
    fn matches(&self, e: &LedgerEntry) -> bool {
        let f = &self.filter;
        if let Some(user_id) = &f.user_id {
            if &e.user_id != user_id {
                return false;
            }
        }
        if let Some(beneficiary_id) = &f.beneficiary_id {
            if &e.beneficiary_id != beneficiary_id {
                return false;
            }
        }
        if let Some(tt) = f.transaction_type {
            if e.transaction_type != tt {
                return false;
            }
        }
        if let Some(state) = f.state {
            if e.state != Some(state) {
                return false;
            }
        }
        if let Some(ref_id) = &f.ref_id {
            if &e.ref_id != ref_id {
                return false;
            }
        }
        if let Some(purpose) = &f.purpose {
            if &e.purpose != purpose {
                return false;
            }
        }
        if self.from_ts.is_some() || self.to_ts.is_some() {
            let Some(created_ts) = timeutil::parse_to_timestamp(&e.created_at) else {
                return false;
            };
            if let Some(from) = self.from_ts {
                if created_ts < from {
                    return false;
                }
            }
            if let Some(to) = self.to_ts {
                if created_ts > to {
                    return false;
                }
            }
        }
        true
    }
}

/// Offset-or-token pagination as exposed by the admin endpoints.
#[derive(Clone, Debug, Default)]
pub struct Paging {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Opaque continuation token from a previous page (a stringified
    /// offset). Takes precedence over `offset` when both are present.
    pub next_token: Option<String>,
}

impl Paging {
    fn resolve(&self) -> Result<(usize, usize), LedgerError> {
        let limit = match self.limit {
            None => PAGE_LIMIT_DEFAULT,
            Some(l) if (1..=PAGE_LIMIT_MAX).contains(&l) => l,
            Some(_) => {
                return Err(LedgerError::InvalidPayload(format!(
                    "limit must be between 1 and {PAGE_LIMIT_MAX}"
                )))
            }
        };
        let offset = match &self.next_token {
            Some(token) => token.parse::<usize>().map_err(|_| {
                LedgerError::InvalidPayload("nextToken is not a valid continuation".into())
            })?,
            None => self.offset.unwrap_or(0),
        };
        Ok((limit, offset))
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PagedRecords {
    pub records: Vec<LedgerEntry>,
    pub next_token: Option<String>,
    /// Matches before paging was applied.
    pub total_matched: usize,
}

/// Per-day earnings of a beneficiary: tips received (nominal totals) plus
/// captured holds from distinct payers.
#[derive(Clone, Debug, Serialize)]
pub struct EarningsReport {
    pub beneficiary_id: String,
    pub day_start: String,
    pub day_end: String,
    pub tips_received: Amount,
    pub holds_captured: Amount,
    pub total: Amount,
    pub events_counted: usize,
}

// ── Surface ───────────────────────────────────────────────────────────────────

pub struct AdminQuery {
    facade: QueryFacade,
}

impl AdminQuery {
    pub fn new(manager: Arc<TokenManager>) -> Self {
        Self { facade: QueryFacade::new(manager) }
    }

    fn manager(&self) -> &Arc<TokenManager> {
        self.facade.manager()
    }

    /// Filtered event listing in `(created_at, id)` order.
    pub fn list_records(
        &self,
        filter: &RecordFilter,
        paging: &Paging,
    ) -> Result<PagedRecords, LedgerError> {
        let (limit, offset) = paging.resolve()?;
        let compiled = filter.compile()?;

        let mut matched: Vec<LedgerEntry> = self
            .manager()
            .store()
            .scan(&ScanOptions::default())
            .map_err(|e| LedgerError::Storage(e.to_string()))?
            .into_iter()
            .filter(|e| compiled.matches(e))
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let total_matched = matched.len();
        let records: Vec<LedgerEntry> = matched.into_iter().skip(offset).take(limit).collect();
        let next_token = if offset + records.len() < total_matched {
            Some((offset + records.len()).to_string())
        } else {
            None
        };
        Ok(PagedRecords { records, next_token, total_matched })
    }

    pub fn count_records(&self, filter: &RecordFilter) -> Result<u64, LedgerError> {
        let compiled = filter.compile()?;
        let count = self
            .manager()
            .store()
            .scan(&ScanOptions::default())
            .map_err(|e| LedgerError::Storage(e.to_string()))?
            .into_iter()
            .filter(|e| compiled.matches(e))
            .count();
        Ok(count as u64)
    }

    pub fn get_record(&self, id: &str) -> Result<LedgerEntry, LedgerError> {
        self.manager()
            .store()
            .get(id)
            .map_err(|e| LedgerError::Storage(e.to_string()))?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))
    }

    /// Aggregated balances of every user, optionally narrowed by substring
    /// search on the user id.
    pub fn list_user_balances(
        &self,
        search: Option<&str>,
        paging: &Paging,
    ) -> Result<Vec<UserBalanceRow>, LedgerError> {
        let (limit, offset) = paging.resolve()?;
        let users = self.facade.all_user_balances(search)?;
        Ok(users.into_iter().skip(offset).take(limit).collect())
    }

    pub fn user_drilldown(&self, user_id: &str) -> Result<BalanceDrilldown, LedgerError> {
        self.manager().get_balance_with_drilldown(user_id)
    }

    /// Earnings of `beneficiary_id` for the calendar day containing
    /// `date_iso` (UTC).
    pub fn earnings_for_day(
        &self,
        beneficiary_id: &str,
        date_iso: &str,
    ) -> Result<EarningsReport, LedgerError> {
        let day_start = timeutil::start_of_day(date_iso)
            .ok_or_else(|| LedgerError::InvalidPayload("date is not a valid date".into()))?;
        let day_end = timeutil::end_of_day(date_iso)
            .ok_or_else(|| LedgerError::InvalidPayload("date is not a valid date".into()))?;

        let received = self.facade.indexed_or_scan(
            IndexQuery::all(IndexName::BeneficiaryCreated, beneficiary_id),
            |e| e.beneficiary_id == beneficiary_id,
        )?;

        let mut report = EarningsReport {
            beneficiary_id: beneficiary_id.to_string(),
            day_start: day_start.clone(),
            day_end: day_end.clone(),
            tips_received: 0,
            holds_captured: 0,
            total: 0,
            events_counted: 0,
        };
        for e in received {
            if e.created_at.as_str() < day_start.as_str()
                || e.created_at.as_str() > day_end.as_str()
            {
                continue;
            }
            match e.transaction_type {
                TransactionType::Tip => {
                    report.tips_received +=
                        e.amount + e.free_beneficiary_consumed + e.free_system_consumed;
                    report.events_counted += 1;
                }
                TransactionType::Hold
                    if e.state == Some(HoldState::Captured) && e.user_id != e.beneficiary_id =>
                {
                    report.holds_captured += e.amount;
                    report.events_counted += 1;
                }
                _ => {}
            }
        }
        report.total = report.tips_received + report.holds_captured;
        Ok(report)
    }
}
