//! The store contract the ledger core is written against.

use thiserror::Error;
use tokra_core::entry::{HoldState, LedgerEntry, Metadata, TransactionType};
use tokra_core::types::Version;

use crate::index::IndexQuery;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The conditional update's precondition did not hold over the
    /// pre-image (or the row is gone). Concurrency losers see this.
    #[error("conditional update failed for {0}")]
    ConditionFailed(String),

    /// The named index cannot serve queries right now; callers fall back to
    /// an alternate index or a scan.
    #[error("index {0} unavailable")]
    IndexUnavailable(&'static str),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("codec error: {0}")]
    Codec(String),
}

/// Attribute mutations applied by a conditional update. Unset fields keep
/// their pre-image value.
#[derive(Clone, Debug, Default)]
pub struct EntryMutation {
    pub state: Option<HoldState>,
    pub expires_at: Option<String>,
    pub version: Option<Version>,
    pub metadata: Option<Metadata>,
}

impl EntryMutation {
    pub fn apply_to(&self, entry: &LedgerEntry) -> LedgerEntry {
        let mut next = entry.clone();
        if let Some(state) = self.state {
            next.state = Some(state);
        }
        if let Some(expires_at) = &self.expires_at {
            next.expires_at = expires_at.clone();
        }
        if let Some(version) = self.version {
            next.version = version;
        }
        if let Some(metadata) = &self.metadata {
            next.metadata = metadata.clone();
        }
        next
    }
}

/// Precondition evaluated over the pre-image of a conditional update.
#[derive(Clone, Debug, Default)]
pub struct UpdateCondition {
    pub transaction_type: Option<TransactionType>,
    pub state: Option<HoldState>,
    pub version: Option<Version>,
}

impl UpdateCondition {
    pub fn holds_for(&self, entry: &LedgerEntry) -> bool {
        if let Some(tt) = self.transaction_type {
            if entry.transaction_type != tt {
                return false;
            }
        }
        if let Some(state) = self.state {
            if entry.state != Some(state) {
                return false;
            }
        }
        if let Some(version) = self.version {
            if entry.version != version {
                return false;
            }
        }
        true
    }
}

/// Options for full-table scans. Scans are cost-heavy and reserved for
/// workers and admin read paths that explicitly accept them.
#[derive(Clone, Debug, Default)]
pub struct ScanOptions {
    pub limit: Option<usize>,
}

/// Abstract ledger storage: a primary table keyed by entry id, an archive
/// table, and the named secondary indexes of [`crate::index::IndexName`].
pub trait EntryStore: Send + Sync {
    /// Unconditional insert/overwrite by primary key.
    fn put(&self, entry: &LedgerEntry) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Option<LedgerEntry>, StoreError>;

    fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Apply `mutation` iff `condition` holds over the pre-image; returns
    /// the post-image on success and [`StoreError::ConditionFailed`] on a
    /// precondition mismatch. The precondition and the write are atomic
    /// with respect to other conditional updates on the same row.
    fn update_conditional(
        &self,
        id: &str,
        mutation: EntryMutation,
        condition: UpdateCondition,
    ) -> Result<LedgerEntry, StoreError>;

    /// Rows matching `query` on the named index, ascending by sort key.
    fn query_by_index(&self, query: &IndexQuery) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Full-table iteration over the primary table.
    fn scan(&self, opts: &ScanOptions) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Row count of the primary table.
    fn count(&self) -> Result<u64, StoreError>;

    /// Copy a row into the archive table.
    fn archive(&self, entry: &LedgerEntry) -> Result<(), StoreError>;

    fn get_archived(&self, id: &str) -> Result<Option<LedgerEntry>, StoreError>;
}
