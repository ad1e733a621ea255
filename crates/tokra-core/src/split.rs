//! Pure consumption-split calculator.
//!
//! Decomposes an amount into consumption against the three balance sources
//! (beneficiary-specific free, system free, paid) under a priority mode.
//! The calculator never looks at storage; callers pass a point-in-time
//! snapshot and detect insufficiency against [`Split::available`].

use std::collections::BTreeMap;

use crate::constants::SYSTEM_BENEFICIARY;
use crate::types::Amount;

// ── Inputs ────────────────────────────────────────────────────────────────────

/// Point-in-time balance inputs for a split decision.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BalanceSnapshot {
    pub paid: Amount,
    /// Net free tokens per grant bucket, keyed by bucket owner id. The
    /// system bucket lives under [`SYSTEM_BENEFICIARY`].
    pub free_per_beneficiary: BTreeMap<String, Amount>,
}

impl BalanceSnapshot {
    pub fn bucket(&self, beneficiary_id: &str) -> Amount {
        self.free_per_beneficiary
            .get(beneficiary_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_free(&self) -> Amount {
        self.free_per_beneficiary.values().sum()
    }
}

/// Consumption priority mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitMode {
    /// DEBIT: beneficiary bucket, then system bucket, then paid.
    Default,
    /// HOLD creation: paid first so real funds back the reservation, then
    /// beneficiary bucket, then system bucket; any remainder lands back on
    /// paid, which the caller's sufficiency check catches.
    Hold,
    /// TIP: when the sender holds no grants in the receiver's own bucket,
    /// drain the single largest creator bucket, then system, then paid.
    /// Otherwise identical to [`SplitMode::Default`].
    Transfer,
}

// ── Output ────────────────────────────────────────────────────────────────────

/// The planned decomposition of one amount.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Split {
    pub beneficiary_free_consumed: Amount,
    pub system_free_consumed: Amount,
    pub paid_amount: Amount,
    /// For the transfer donor path: which creator bucket was debited.
    pub free_beneficiary_source_id: Option<String>,
    /// What the three consumption fields add up to.
    pub total_consumed: Amount,
    /// Tokens the chosen mode could draw on; the caller rejects the
    /// operation when `available < amount`.
    pub available: Amount,
}

// ── Calculator ────────────────────────────────────────────────────────────────

/// Plan the (beneficiary-free, system-free, paid) decomposition of `amount`.
///
/// When `beneficiary_id` is the system sentinel, the "beneficiary-specific"
/// bucket *is* the system bucket; consumption is recorded once, under
/// `system_free_consumed`.
pub fn plan_split(
    snapshot: &BalanceSnapshot,
    beneficiary_id: &str,
    amount: Amount,
    mode: SplitMode,
) -> Split {
    match mode {
        SplitMode::Default => split_default(snapshot, beneficiary_id, amount),
        SplitMode::Hold => split_hold(snapshot, beneficiary_id, amount),
        SplitMode::Transfer => {
            if snapshot.bucket(beneficiary_id) > 0 || beneficiary_id == SYSTEM_BENEFICIARY {
                split_default(snapshot, beneficiary_id, amount)
            } else {
                split_transfer(snapshot, beneficiary_id, amount)
            }
        }
    }
}

fn mode_sources(snapshot: &BalanceSnapshot, beneficiary_id: &str) -> (Amount, Amount) {
    let beneficiary_bucket = if beneficiary_id == SYSTEM_BENEFICIARY {
        0
    } else {
        snapshot.bucket(beneficiary_id)
    };
    (beneficiary_bucket, snapshot.bucket(SYSTEM_BENEFICIARY))
}

fn split_default(snapshot: &BalanceSnapshot, beneficiary_id: &str, amount: Amount) -> Split {
    let (beneficiary_bucket, system_bucket) = mode_sources(snapshot, beneficiary_id);

    let mut remaining = amount;
    let beneficiary_free_consumed = remaining.min(beneficiary_bucket);
    remaining -= beneficiary_free_consumed;
    let system_free_consumed = remaining.min(system_bucket);
    remaining -= system_free_consumed;
    let paid_amount = remaining.min(snapshot.paid);
    remaining -= paid_amount;

    Split {
        beneficiary_free_consumed,
        system_free_consumed,
        paid_amount,
        free_beneficiary_source_id: None,
        total_consumed: amount - remaining,
        available: beneficiary_bucket + system_bucket + snapshot.paid,
    }
}

fn split_hold(snapshot: &BalanceSnapshot, beneficiary_id: &str, amount: Amount) -> Split {
    let (beneficiary_bucket, system_bucket) = mode_sources(snapshot, beneficiary_id);

    let mut remaining = amount;
    let paid_first = remaining.min(snapshot.paid);
    remaining -= paid_first;
    let beneficiary_free_consumed = remaining.min(beneficiary_bucket);
    remaining -= beneficiary_free_consumed;
    let system_free_consumed = remaining.min(system_bucket);
    remaining -= system_free_consumed;

    // Remainder lands back on paid; the caller's sufficiency check catches
    // it, because available < amount exactly when remaining > 0 here.
    let paid_amount = paid_first + remaining;

    Split {
        beneficiary_free_consumed,
        system_free_consumed,
        paid_amount,
        free_beneficiary_source_id: None,
        total_consumed: amount,
        available: beneficiary_bucket + system_bucket + snapshot.paid,
    }
}

fn split_transfer(snapshot: &BalanceSnapshot, beneficiary_id: &str, amount: Amount) -> Split {
    // Single largest non-system creator bucket; ties broken by the smaller
    // bucket id so the choice is deterministic. Never split across donors.
    let donor = snapshot
        .free_per_beneficiary
        .iter()
        .filter(|(id, amt)| {
            id.as_str() != SYSTEM_BENEFICIARY && id.as_str() != beneficiary_id && **amt > 0
        })
        .max_by(|(id_a, amt_a), (id_b, amt_b)| amt_a.cmp(amt_b).then_with(|| id_b.cmp(id_a)));

    let (donor_id, donor_bucket) = match donor {
        Some((id, amt)) => (Some(id.clone()), *amt),
        None => (None, 0),
    };
    let system_bucket = snapshot.bucket(SYSTEM_BENEFICIARY);

    let mut remaining = amount;
    let beneficiary_free_consumed = remaining.min(donor_bucket);
    remaining -= beneficiary_free_consumed;
    let system_free_consumed = remaining.min(system_bucket);
    remaining -= system_free_consumed;
    let paid_amount = remaining.min(snapshot.paid);
    remaining -= paid_amount;

    Split {
        free_beneficiary_source_id: if beneficiary_free_consumed > 0 { donor_id } else { None },
        beneficiary_free_consumed,
        system_free_consumed,
        paid_amount,
        total_consumed: amount - remaining,
        available: donor_bucket + system_bucket + snapshot.paid,
    }
}
