//! `TokenManager` — the validated write path of the ledger.
//!
//! Each writer validates its inputs, plans a consumption split where one is
//! needed, and appends exactly one event. Writers never compensate after a
//! successful write; derived state is recomputed by folding.

use std::sync::Arc;

use serde_json::json;
use tokra_core::constants::{
    DEFAULT_GRANT_PURPOSE, LOG_TARGET, MAX_HOLD_SECS, MIN_HOLD_SECS, MIN_HOLD_SECS_TESTING,
    NEVER_EXPIRES, SYSTEM_BENEFICIARY,
};
use tokra_core::entry::{AuditEntry, HoldState, LedgerEntry, Metadata, TransactionType};
use tokra_core::error::LedgerError;
use tokra_core::sink::{ErrorSink, TracingSink};
use tokra_core::split::{plan_split, Split, SplitMode};
use tokra_core::timeutil;
use tokra_core::types::{is_synthetic_ref_id, new_entry_id, new_synthetic_ref_id, Amount};
use tokra_store::codec;
use tokra_store::store::{EntryStore, StoreError};
use tracing::info;

use crate::hooks::EntitlementHooks;

pub(crate) fn store_err(e: StoreError) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

pub(crate) fn require_id(value: &str, field: &str) -> Result<(), LedgerError> {
    if value.trim().is_empty() {
        return Err(LedgerError::InvalidPayload(format!("{field} is required")));
    }
    Ok(())
}

fn require_amount(amount: Amount) -> Result<(), LedgerError> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(())
}

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
pub struct DebitOptions {
    /// Which free bucket the debit may draw on first; the system bucket
    /// when unset.
    pub beneficiary_id: Option<String>,
    pub purpose: Option<String>,
    pub ref_id: Option<String>,
    pub meta: Option<Metadata>,
}

#[derive(Clone, Debug, Default)]
pub struct TransferOptions {
    /// Display hint only; the tip is not anonymous at the ledger layer.
    pub is_anonymous: bool,
    pub note: Option<String>,
    pub ref_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct HoldOptions {
    pub ref_id: Option<String>,
    pub expires_after_secs: i64,
    pub purpose: Option<String>,
    pub meta: Option<Metadata>,
}

impl Default for HoldOptions {
    fn default() -> Self {
        Self {
            ref_id: None,
            expires_after_secs: MIN_HOLD_SECS,
            purpose: None,
            meta: None,
        }
    }
}

// ── TokenManager ──────────────────────────────────────────────────────────────

pub struct TokenManager {
    store: Arc<dyn EntryStore>,
    sink: Arc<dyn ErrorSink>,
    hooks: Option<Arc<dyn EntitlementHooks>>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn EntryStore>) -> Self {
        Self {
            store,
            sink: Arc::new(TracingSink),
            hooks: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn EntitlementHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.store
    }

    /// The recoverable-error sink, shared with workers and read paths.
    pub fn sink(&self) -> &dyn ErrorSink {
        self.sink.as_ref()
    }

    pub(crate) fn hooks(&self) -> Option<&Arc<dyn EntitlementHooks>> {
        self.hooks.as_ref()
    }

    // ── Writers ──────────────────────────────────────────────────────────────

    /// Add paid tokens to `user_id`'s balance.
    pub fn credit_paid(
        &self,
        user_id: &str,
        amount: Amount,
        purpose: &str,
        meta: Option<Metadata>,
    ) -> Result<LedgerEntry, LedgerError> {
        require_id(user_id, "userId")?;
        require_amount(amount)?;

        let entry = self.persist(self.base_entry(
            user_id,
            SYSTEM_BENEFICIARY,
            TransactionType::CreditPaid,
            amount,
            purpose,
            None,
            meta.unwrap_or_default(),
        ))?;
        info!(
            target: LOG_TARGET,
            action = "credit_paid",
            user_id,
            amount,
            id = %entry.id,
            "credited paid tokens"
        );
        Ok(entry)
    }

    /// Grant free tokens into the `beneficiary_id` bucket of `user_id`.
    /// The grant never expires unless `expires_at` is given.
    pub fn credit_free(
        &self,
        user_id: &str,
        beneficiary_id: &str,
        amount: Amount,
        expires_at: Option<&str>,
        purpose: Option<&str>,
        meta: Option<Metadata>,
    ) -> Result<LedgerEntry, LedgerError> {
        require_id(user_id, "userId")?;
        if beneficiary_id.trim().is_empty() {
            return Err(LedgerError::MissingBeneficiaryId);
        }
        require_amount(amount)?;

        let mut entry = self.base_entry(
            user_id,
            beneficiary_id,
            TransactionType::CreditFree,
            amount,
            purpose.unwrap_or(DEFAULT_GRANT_PURPOSE),
            None,
            meta.unwrap_or_default(),
        );
        entry.expires_at = expires_at.unwrap_or(NEVER_EXPIRES).to_string();
        let entry = self.persist(entry)?;
        info!(
            target: LOG_TARGET,
            action = "credit_free",
            user_id,
            beneficiary_id,
            amount,
            expires_at = %entry.expires_at,
            id = %entry.id,
            "granted free tokens"
        );
        Ok(entry)
    }

    /// Deduct `amount` from `user_id`, consuming the beneficiary bucket,
    /// then the system bucket, then paid tokens.
    pub fn debit(
        &self,
        user_id: &str,
        amount: Amount,
        opts: DebitOptions,
    ) -> Result<LedgerEntry, LedgerError> {
        require_id(user_id, "userId")?;
        require_amount(amount)?;
        let beneficiary_id = opts
            .beneficiary_id
            .unwrap_or_else(|| SYSTEM_BENEFICIARY.to_string());

        let snapshot = self.balance_snapshot(user_id)?;
        let split = plan_split(&snapshot, &beneficiary_id, amount, SplitMode::Default);
        if split.available < amount {
            return Err(LedgerError::InsufficientTokens {
                need: amount,
                have: split.available,
            });
        }

        let meta = opts
            .meta
            .unwrap_or_default()
            .with_field("breakdown", breakdown_json(amount, &split));
        let mut entry = self.base_entry(
            user_id,
            &beneficiary_id,
            TransactionType::Debit,
            split.paid_amount,
            opts.purpose.as_deref().unwrap_or("debit"),
            opts.ref_id.as_deref(),
            meta,
        );
        entry.free_beneficiary_consumed = split.beneficiary_free_consumed;
        entry.free_system_consumed = split.system_free_consumed;
        let entry = self.persist(entry)?;
        info!(
            target: LOG_TARGET,
            action = "debit",
            user_id,
            beneficiary_id,
            requested = amount,
            paid = split.paid_amount,
            free_beneficiary = split.beneficiary_free_consumed,
            free_system = split.system_free_consumed,
            id = %entry.id,
            "debited tokens"
        );
        Ok(entry)
    }

    /// Tip `amount` from `sender_id` to `beneficiary_id`. Free tokens
    /// consumed by the tip are destroyed on the sender side; the receiver
    /// is credited the nominal tip total as paid tokens.
    pub fn transfer(
        &self,
        sender_id: &str,
        beneficiary_id: &str,
        amount: Amount,
        purpose: &str,
        opts: TransferOptions,
    ) -> Result<LedgerEntry, LedgerError> {
        require_id(sender_id, "userId")?;
        if beneficiary_id.trim().is_empty() {
            return Err(LedgerError::MissingBeneficiaryId);
        }
        if sender_id == beneficiary_id {
            return Err(LedgerError::InvalidPayload(
                "sender and beneficiary must differ".into(),
            ));
        }
        require_amount(amount)?;

        let snapshot = self.balance_snapshot(sender_id)?;
        let split = plan_split(&snapshot, beneficiary_id, amount, SplitMode::Transfer);
        if split.available < amount {
            return Err(LedgerError::InsufficientTokens {
                need: amount,
                have: split.available,
            });
        }

        let meta = Metadata::default()
            .with_field("breakdown", breakdown_json(amount, &split))
            .with_field("is_anonymous", json!(opts.is_anonymous))
            .with_field("note", json!(opts.note));
        let mut entry = self.base_entry(
            sender_id,
            beneficiary_id,
            TransactionType::Tip,
            split.paid_amount,
            purpose,
            opts.ref_id.as_deref(),
            meta,
        );
        entry.free_beneficiary_consumed = split.beneficiary_free_consumed;
        entry.free_system_consumed = split.system_free_consumed;
        entry.free_beneficiary_source_id = split.free_beneficiary_source_id.clone();
        let entry = self.persist(entry)?;
        info!(
            target: LOG_TARGET,
            action = "transfer",
            sender_id,
            beneficiary_id,
            requested = amount,
            paid = split.paid_amount,
            source_bucket = split.free_beneficiary_source_id.as_deref().unwrap_or(""),
            id = %entry.id,
            "tipped tokens"
        );
        Ok(entry)
    }

    /// Reserve `amount` from `user_id` toward `beneficiary_id`: one OPEN
    /// HOLD row with version 1 and an initial audit entry.
    ///
    /// A caller-supplied refId must not collide with an existing open hold;
    /// the check reads the `ref_state` index and falls back to `ref_type`
    /// when it is unavailable.
    pub fn hold(
        &self,
        user_id: &str,
        amount: Amount,
        beneficiary_id: &str,
        opts: HoldOptions,
    ) -> Result<LedgerEntry, LedgerError> {
        require_id(user_id, "userId")?;
        if beneficiary_id.trim().is_empty() {
            return Err(LedgerError::MissingBeneficiaryId);
        }
        require_amount(amount)?;

        let meta = opts.meta.unwrap_or_default();
        let min_secs = if meta.testing_flag() {
            MIN_HOLD_SECS_TESTING
        } else {
            MIN_HOLD_SECS
        };
        if opts.expires_after_secs < min_secs || opts.expires_after_secs > MAX_HOLD_SECS {
            return Err(LedgerError::InvalidTimeout {
                min: min_secs,
                max: MAX_HOLD_SECS,
            });
        }

        if let Some(ref_id) = opts.ref_id.as_deref() {
            if !is_synthetic_ref_id(ref_id) && !self.open_holds_by_ref(ref_id)?.is_empty() {
                return Err(LedgerError::DuplicateHoldRefId(ref_id.to_string()));
            }
        }

        let snapshot = self.balance_snapshot(user_id)?;
        let split = plan_split(&snapshot, beneficiary_id, amount, SplitMode::Hold);
        if split.available < amount {
            return Err(LedgerError::InsufficientTokens {
                need: amount,
                have: split.available,
            });
        }

        let created_at = timeutil::now_iso();
        let expires_at = timeutil::add_seconds(&created_at, opts.expires_after_secs)
            .unwrap_or_else(|| timeutil::now_plus(opts.expires_after_secs));
        let meta = meta
            .with_field("breakdown", breakdown_json(amount, &split))
            .with_audit_entry(AuditEntry::new(HoldState::Open.as_str(), &created_at, "open"));

        let mut entry = self.base_entry(
            user_id,
            beneficiary_id,
            TransactionType::Hold,
            split.paid_amount,
            opts.purpose.as_deref().unwrap_or("hold"),
            opts.ref_id.as_deref(),
            meta,
        );
        entry.created_at = created_at;
        entry.expires_at = expires_at;
        entry.state = Some(HoldState::Open);
        entry.free_beneficiary_consumed = split.beneficiary_free_consumed;
        entry.free_system_consumed = split.system_free_consumed;
        let entry = self.persist(entry)?;
        info!(
            target: LOG_TARGET,
            action = "hold",
            user_id,
            beneficiary_id,
            requested = amount,
            paid = split.paid_amount,
            ref_id = %entry.ref_id,
            expires_at = %entry.expires_at,
            id = %entry.id,
            "opened hold"
        );
        Ok(entry)
    }

    /// Admin correction path: deduct paid tokens without touching any free
    /// bucket. Used by manual balance adjustments only.
    pub fn debit_paid_only(
        &self,
        user_id: &str,
        amount: Amount,
        purpose: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        require_id(user_id, "userId")?;
        require_amount(amount)?;

        let balance = self.get_balance(user_id)?;
        if balance.paid_tokens < amount {
            return Err(LedgerError::InsufficientPaidTokens {
                need: amount,
                have: balance.paid_tokens,
            });
        }
        let entry = self.persist(self.base_entry(
            user_id,
            SYSTEM_BENEFICIARY,
            TransactionType::Debit,
            amount,
            purpose,
            None,
            Metadata::default().with_field("manual_adjustment", json!(true)),
        ))?;
        info!(
            target: LOG_TARGET,
            action = "debit_paid_only",
            user_id,
            amount,
            id = %entry.id,
            "manually deducted paid tokens"
        );
        Ok(entry)
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn base_entry(
        &self,
        user_id: &str,
        beneficiary_id: &str,
        transaction_type: TransactionType,
        amount: Amount,
        purpose: &str,
        ref_id: Option<&str>,
        meta: Metadata,
    ) -> LedgerEntry {
        LedgerEntry {
            id: new_entry_id(),
            user_id: user_id.to_string(),
            beneficiary_id: beneficiary_id.to_string(),
            transaction_type,
            amount,
            purpose: purpose.to_string(),
            ref_id: ref_id
                .map(str::to_string)
                .unwrap_or_else(new_synthetic_ref_id),
            expires_at: NEVER_EXPIRES.to_string(),
            created_at: timeutil::now_iso(),
            metadata: codec::storage_metadata(transaction_type, meta),
            state: None,
            version: 1,
            free_beneficiary_consumed: 0,
            free_system_consumed: 0,
            free_beneficiary_source_id: None,
        }
    }

    fn persist(&self, mut entry: LedgerEntry) -> Result<LedgerEntry, LedgerError> {
        // base_entry shapes the metadata, but callers that post-edit fields
        // go through here too, so strip/shape once more idempotently.
        entry.metadata = codec::storage_metadata(entry.transaction_type, entry.metadata);
        self.store.put(&entry).map_err(store_err)?;
        Ok(entry)
    }
}

fn breakdown_json(requested: Amount, split: &Split) -> serde_json::Value {
    json!({
        "requested": requested,
        "paid": split.paid_amount,
        "free_beneficiary": split.beneficiary_free_consumed,
        "free_system": split.system_free_consumed,
        "free_beneficiary_source_id": split.free_beneficiary_source_id,
    })
}
