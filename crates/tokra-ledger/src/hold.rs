//! HOLD lifecycle: capture, reverse, extend.
//!
//! ```text
//!        capture → CAPTURED (terminal)
//! OPEN ──┤
//!        reverse → REVERSED (terminal)
//!        extend  → OPEN (new expires_at, version++)
//! ```
//!
//! Every mutation re-reads the row, appends an audit entry, and submits a
//! conditional update guarded by `type = HOLD AND state = OPEN AND
//! version = previous`. A concurrency loser observes the condition failure
//! and does not retry: the winning write carries the authoritative state
//! and the loser's audit entry is correctly discarded.

use serde::Serialize;
use tokra_core::constants::{LOG_TARGET, MAX_HOLD_TOTAL_SECS};
use tokra_core::entry::{AuditEntry, HoldState, LedgerEntry, TransactionType};
use tokra_core::error::LedgerError;
use tokra_core::timeutil;
use tokra_store::index::{IndexName, IndexQuery};
use tokra_store::store::{EntryMutation, EntryStore, StoreError, UpdateCondition};
use tracing::{debug, info, warn};

use crate::manager::{store_err, TokenManager};

/// How a lifecycle call names its hold(s): the exact row by id, or every
/// open hold carrying an external reference.
#[derive(Clone, Debug, PartialEq)]
pub enum HoldTarget {
    Id(String),
    RefId(String),
}

impl HoldTarget {
    pub fn by_id(id: &str) -> Self {
        Self::Id(id.to_string())
    }

    pub fn by_ref(ref_id: &str) -> Self {
        Self::RefId(ref_id.to_string())
    }

    fn key(&self) -> &str {
        match self {
            Self::Id(v) | Self::RefId(v) => v,
        }
    }
}

/// Aggregated outcome of one lifecycle call.
#[derive(Clone, Debug, Default, Serialize)]
pub struct LifecycleSummary {
    /// Rows the target resolved to (open rows plus already-terminal ones).
    pub matched: usize,
    /// Rows this call transitioned.
    pub processed: usize,
    /// Rows already in the requested terminal state (idempotent no-op).
    pub already: usize,
    /// Rows lost to a concurrent writer (condition failed; not retried).
    pub skipped: usize,
    /// Post-images of the rows this call transitioned.
    pub entries: Vec<LedgerEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum LifecycleOp {
    Capture,
    Reverse,
    Extend,
}

impl LifecycleOp {
    fn action(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Reverse => "reverse",
            Self::Extend => "extend",
        }
    }
}

impl TokenManager {
    // ── Entry points ─────────────────────────────────────────────────────────

    /// OPEN → CAPTURED. By refId, captures every open hold on the
    /// reference; re-invocation after success is a no-op counted in
    /// `already`.
    pub fn capture_held(&self, target: &HoldTarget) -> Result<LifecycleSummary, LedgerError> {
        self.run_terminal_op(target, LifecycleOp::Capture)
    }

    /// OPEN → REVERSED. The reserved tokens reappear in the holder's
    /// balance because reversed holds are excluded from the fold.
    pub fn reverse_held(&self, target: &HoldTarget) -> Result<LifecycleSummary, LedgerError> {
        self.run_terminal_op(target, LifecycleOp::Reverse)
    }

    /// Push an open hold's deadline out by `extend_by_secs`, bounded so the
    /// total lifetime `expires_at - created_at` never exceeds
    /// `max_total_secs` (7200 by default). Unlike capture/reverse there is
    /// no batch-skip: losing the version race is `ALREADY_PROCESSED`.
    pub fn extend_expiry(
        &self,
        target: &HoldTarget,
        extend_by_secs: i64,
        max_total_secs: Option<i64>,
    ) -> Result<LifecycleSummary, LedgerError> {
        if extend_by_secs <= 0 {
            return Err(LedgerError::InvalidTimeout {
                min: 1,
                max: MAX_HOLD_TOTAL_SECS,
            });
        }
        let max_total = max_total_secs.unwrap_or(MAX_HOLD_TOTAL_SECS);
        let (targets, _) = self.resolve_targets(target, LifecycleOp::Extend)?;

        let mut summary = LifecycleSummary {
            matched: targets.len(),
            ..Default::default()
        };
        for stale in targets {
            let current = self.reread(&stale.id)?;
            if !current.is_open_hold() {
                return Err(LedgerError::AlreadyProcessed(current.id));
            }

            let created_ts = timeutil::parse_to_timestamp(&current.created_at)
                .ok_or_else(|| corrupt_instant(self, &current, "createdAt"))?;
            let new_expires_at = timeutil::add_seconds(&current.expires_at, extend_by_secs)
                .ok_or_else(|| corrupt_instant(self, &current, "expiresAt"))?;
            let new_expires_ts = timeutil::parse_to_timestamp(&new_expires_at)
                .ok_or_else(|| corrupt_instant(self, &current, "expiresAt"))?;
            if new_expires_ts - created_ts > max_total {
                return Err(LedgerError::TimeoutExceeded { max: max_total });
            }

            let now = timeutil::now_iso();
            let mut audit = AuditEntry::new(HoldState::Open.as_str(), &now, "extend");
            audit.expires_at = Some(new_expires_at.clone());
            let mutation = EntryMutation {
                state: Some(HoldState::Open),
                expires_at: Some(new_expires_at),
                version: Some(current.version + 1),
                metadata: Some(current.metadata.with_audit_entry(audit)),
            };
            match self.store().update_conditional(
                &current.id,
                mutation,
                open_at_version(current.version),
            ) {
                Ok(post) => {
                    info!(
                        target: LOG_TARGET,
                        action = "extend",
                        id = %post.id,
                        ref_id = %post.ref_id,
                        expires_at = %post.expires_at,
                        version = post.version,
                        "extended hold expiry"
                    );
                    summary.processed += 1;
                    summary.entries.push(post);
                }
                Err(StoreError::ConditionFailed(id)) => {
                    return Err(LedgerError::AlreadyProcessed(id));
                }
                Err(e) => return Err(store_err(e)),
            }
        }
        Ok(summary)
    }

    // ── Shared protocol ──────────────────────────────────────────────────────

    fn run_terminal_op(
        &self,
        target: &HoldTarget,
        op: LifecycleOp,
    ) -> Result<LifecycleSummary, LedgerError> {
        let (targets, already) = self.resolve_targets(target, op)?;
        let mut summary = LifecycleSummary {
            matched: targets.len() + already,
            already,
            ..Default::default()
        };

        let new_state = match op {
            LifecycleOp::Capture => HoldState::Captured,
            LifecycleOp::Reverse => HoldState::Reversed,
            LifecycleOp::Extend => unreachable!("extend has its own driver"),
        };

        for stale in targets {
            // Fresh metadata and version: the resolution read may be old.
            let current = self.reread(&stale.id)?;
            match current.state {
                None => {
                    self.sink().record(
                        &format!("hold {} has no state attribute", current.id),
                        "HOLD_MISSING_STATE",
                        op.action(),
                    );
                    return Err(LedgerError::HoldMissingState(current.id));
                }
                Some(state) if state == new_state => {
                    summary.already += 1;
                    continue;
                }
                Some(state) if state.is_terminal() => {
                    // Terminal in the opposite direction; a racer got here
                    // first. Batch semantics: skip, keep going.
                    summary.skipped += 1;
                    continue;
                }
                Some(HoldState::Open) => {}
                Some(_) => unreachable!(),
            }

            let now = timeutil::now_iso();
            let audit = AuditEntry::new(new_state.as_str(), &now, op.action());
            let mutation = EntryMutation {
                state: Some(new_state),
                expires_at: None,
                version: Some(current.version + 1),
                metadata: Some(current.metadata.with_audit_entry(audit)),
            };
            match self.store().update_conditional(
                &current.id,
                mutation,
                open_at_version(current.version),
            ) {
                Ok(post) => {
                    info!(
                        target: LOG_TARGET,
                        action = op.action(),
                        id = %post.id,
                        ref_id = %post.ref_id,
                        state = %new_state,
                        version = post.version,
                        "hold transitioned"
                    );
                    self.notify_entitlements(op, &post);
                    summary.processed += 1;
                    summary.entries.push(post);
                }
                Err(StoreError::ConditionFailed(_)) => {
                    // The winning racer's write carries the authoritative
                    // state; this call's audit entry is discarded with it.
                    debug!(
                        target: LOG_TARGET,
                        id = %current.id,
                        action = op.action(),
                        "condition failed; skipping row"
                    );
                    summary.skipped += 1;
                }
                Err(e) => return Err(store_err(e)),
            }
        }
        Ok(summary)
    }

    /// Resolve a lifecycle target to its open rows. Returns the open rows
    /// plus, for capture/reverse, how many rows were already in the
    /// requested terminal state.
    fn resolve_targets(
        &self,
        target: &HoldTarget,
        op: LifecycleOp,
    ) -> Result<(Vec<LedgerEntry>, usize), LedgerError> {
        if target.key().trim().is_empty() {
            return Err(LedgerError::MissingIdentifier);
        }
        match target {
            HoldTarget::Id(id) => {
                let entry = self
                    .store()
                    .get(id)
                    .map_err(store_err)?
                    .ok_or_else(|| LedgerError::TransactionNotFound(id.clone()))?;
                if !entry.is_hold() {
                    return Err(LedgerError::NoHeldTokens(id.clone()));
                }
                match entry.state {
                    None => {
                        self.sink().record(
                            &format!("hold {id} has no state attribute"),
                            "HOLD_MISSING_STATE",
                            op.action(),
                        );
                        Err(LedgerError::HoldMissingState(id.clone()))
                    }
                    Some(HoldState::Open) => Ok((vec![entry], 0)),
                    Some(state) => self.terminal_outcome(id, state, op),
                }
            }
            HoldTarget::RefId(ref_id) => {
                let open = self.open_holds_by_ref(ref_id)?;
                if !open.is_empty() {
                    return Ok((open, 0));
                }
                let all: Vec<LedgerEntry> = self
                    .holds_by_ref(ref_id)?
                    .into_iter()
                    .filter(|e| e.is_hold())
                    .collect();
                if all.is_empty() {
                    return Err(LedgerError::NoOpenHolds(ref_id.clone()));
                }
                if let Some(corrupt) = all.iter().find(|e| e.state.is_none()) {
                    self.sink().record(
                        &format!("hold {} has no state attribute", corrupt.id),
                        "HOLD_MISSING_STATE",
                        op.action(),
                    );
                    return Err(LedgerError::HoldMissingState(corrupt.id.clone()));
                }
                // Every hold on the reference is terminal.
                let captured = all
                    .iter()
                    .filter(|e| e.state == Some(HoldState::Captured))
                    .count();
                let reversed = all.len() - captured;
                match op {
                    LifecycleOp::Capture if captured > 0 => Ok((Vec::new(), captured)),
                    LifecycleOp::Capture => Err(LedgerError::AlreadyReversed(ref_id.clone())),
                    LifecycleOp::Reverse if reversed > 0 => Ok((Vec::new(), reversed)),
                    LifecycleOp::Reverse => Err(LedgerError::AlreadyCaptured(ref_id.clone())),
                    LifecycleOp::Extend if captured > 0 => {
                        Err(LedgerError::AlreadyCaptured(ref_id.clone()))
                    }
                    LifecycleOp::Extend => Err(LedgerError::AlreadyReversed(ref_id.clone())),
                }
            }
        }
    }

    fn terminal_outcome(
        &self,
        id: &str,
        state: HoldState,
        op: LifecycleOp,
    ) -> Result<(Vec<LedgerEntry>, usize), LedgerError> {
        match (op, state) {
            (LifecycleOp::Capture, HoldState::Captured) => Ok((Vec::new(), 1)),
            (LifecycleOp::Reverse, HoldState::Reversed) => Ok((Vec::new(), 1)),
            (_, HoldState::Captured) => Err(LedgerError::AlreadyCaptured(id.to_string())),
            (_, HoldState::Reversed) => Err(LedgerError::AlreadyReversed(id.to_string())),
            (_, HoldState::Open) => unreachable!("open holds are resolved, not terminal"),
        }
    }

    fn reread(&self, id: &str) -> Result<LedgerEntry, LedgerError> {
        self.store()
            .get(id)
            .map_err(store_err)?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))
    }

    fn notify_entitlements(&self, op: LifecycleOp, entry: &LedgerEntry) {
        let Some(hooks) = self.hooks() else {
            debug!(target: LOG_TARGET, "entitlement hooks not configured");
            return;
        };
        let result = match op {
            LifecycleOp::Capture => {
                hooks.grant_access(&entry.user_id, &entry.beneficiary_id, &entry.ref_id)
            }
            LifecycleOp::Reverse => {
                hooks.deny_access(&entry.user_id, &entry.beneficiary_id, &entry.ref_id)
            }
            LifecycleOp::Extend => return,
        };
        if let Err(message) = result {
            self.sink().record(
                &format!("entitlement side effect failed: {message}"),
                "ENTITLEMENT_SIDE_EFFECT_FAILED",
                op.action(),
            );
        }
    }

    // ── Ref lookups ──────────────────────────────────────────────────────────

    /// Open holds carrying `ref_id`, via the `ref_state` index with the
    /// documented fallback to `ref_type`. Results are re-checked against
    /// the primary row, so a stale index row cannot leak a closed hold.
    pub(crate) fn open_holds_by_ref(
        &self,
        ref_id: &str,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let query = IndexQuery::eq(IndexName::RefState, ref_id, HoldState::Open.as_str());
        match self.store().query_by_index(&query) {
            Ok(rows) => Ok(rows.into_iter().filter(|e| e.is_open_hold()).collect()),
            Err(StoreError::IndexUnavailable(index)) => {
                warn!(
                    target: LOG_TARGET,
                    index,
                    ref_id,
                    "ref_state index unavailable; falling back to ref_type"
                );
                Ok(self
                    .holds_by_ref(ref_id)?
                    .into_iter()
                    .filter(|e| e.is_open_hold())
                    .collect())
            }
            Err(e) => Err(store_err(e)),
        }
    }

    /// Every hold carrying `ref_id`, any state, via the `ref_type` index
    /// with a scan fallback.
    pub(crate) fn holds_by_ref(&self, ref_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        let query = IndexQuery::eq(
            IndexName::RefType,
            ref_id,
            TransactionType::Hold.as_str(),
        );
        self.query_with_scan_fallback(query, |e| e.ref_id == ref_id && e.is_hold())
    }
}

fn open_at_version(version: u32) -> UpdateCondition {
    UpdateCondition {
        transaction_type: Some(TransactionType::Hold),
        state: Some(HoldState::Open),
        version: Some(version),
    }
}

fn corrupt_instant(manager: &TokenManager, entry: &LedgerEntry, field: &str) -> LedgerError {
    manager.sink().record(
        &format!("hold {} carries a malformed {field}", entry.id),
        "HOLD_CORRUPT_TIMESTAMP",
        "extend",
    );
    LedgerError::InvalidPayload(format!("hold {field} is malformed"))
}
