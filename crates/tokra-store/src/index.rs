//! Named secondary indexes over the ledger table.
//!
//! Each index is a tree whose keys are `partition \0 sort \0 id` with the
//! entry id as value. Partition and sort segments never contain NUL (user
//! ids, refIds, ISO-8601 instants, type/state names), so byte order over a
//! key equals tuple order over its segments.

use tokra_core::entry::LedgerEntry;

const SEP: u8 = 0;

/// The secondary indexes the ledger core depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexName {
    /// `user_id, created_at` — user history, per-user aggregation.
    UserCreated,
    /// `beneficiary_id, created_at` — tips received, earnings.
    BeneficiaryCreated,
    /// `user_id, expires_at` — expiring tokens for a user.
    UserExpires,
    /// `user_id, ref_id` — per-user spend for a reference.
    UserRef,
    /// `ref_id, transaction_type` — locate HOLDs by reference.
    RefType,
    /// `ref_id, state` — locate open HOLDs by reference (primary path for
    /// the uniqueness check and capture/reverse by refId).
    RefState,
    /// `transaction_type, expires_at` — worker scan for expired HOLDs.
    TypeExpires,
}

impl IndexName {
    pub const ALL: [IndexName; 7] = [
        IndexName::UserCreated,
        IndexName::BeneficiaryCreated,
        IndexName::UserExpires,
        IndexName::UserRef,
        IndexName::RefType,
        IndexName::RefState,
        IndexName::TypeExpires,
    ];

    /// Tree name in the backing store.
    pub fn tree_name(&self) -> &'static str {
        match self {
            Self::UserCreated => "idx_user_created",
            Self::BeneficiaryCreated => "idx_beneficiary_created",
            Self::UserExpires => "idx_user_expires",
            Self::UserRef => "idx_user_ref",
            Self::RefType => "idx_ref_type",
            Self::RefState => "idx_ref_state",
            Self::TypeExpires => "idx_type_expires",
        }
    }

    /// The index key for `entry`, or `None` when the entry has no row in
    /// this index (only HOLD rows appear in `ref_state`).
    pub fn key_for(&self, entry: &LedgerEntry) -> Option<Vec<u8>> {
        let (partition, sort): (&str, &str) = match self {
            Self::UserCreated => (&entry.user_id, &entry.created_at),
            Self::BeneficiaryCreated => (&entry.beneficiary_id, &entry.created_at),
            Self::UserExpires => (&entry.user_id, &entry.expires_at),
            Self::UserRef => (&entry.user_id, &entry.ref_id),
            Self::RefType => (&entry.ref_id, entry.transaction_type.as_str()),
            Self::RefState => match entry.state {
                Some(state) => (&entry.ref_id, state.as_str()),
                None => return None,
            },
            Self::TypeExpires => (entry.transaction_type.as_str(), &entry.expires_at),
        };
        Some(compose(partition, sort, &entry.id))
    }
}

/// Build a full index key.
pub fn compose(partition: &str, sort: &str, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(partition.len() + sort.len() + id.len() + 2);
    key.extend_from_slice(partition.as_bytes());
    key.push(SEP);
    key.extend_from_slice(sort.as_bytes());
    key.push(SEP);
    key.extend_from_slice(id.as_bytes());
    key
}

/// Scan prefix matching every row of one partition.
pub fn partition_prefix(partition: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(partition.len() + 1);
    key.extend_from_slice(partition.as_bytes());
    key.push(SEP);
    key
}

/// Split a composite key back into `(partition, sort, id)`.
pub fn split_key(key: &[u8]) -> Option<(String, String, String)> {
    let mut parts = key.splitn(3, |b| *b == SEP);
    let partition = String::from_utf8(parts.next()?.to_vec()).ok()?;
    let sort = String::from_utf8(parts.next()?.to_vec()).ok()?;
    let id = String::from_utf8(parts.next()?.to_vec()).ok()?;
    Some((partition, sort, id))
}

// ── Queries ───────────────────────────────────────────────────────────────────

/// Sort-key condition for an index query.
#[derive(Clone, Debug, PartialEq)]
pub enum SortCond {
    /// Every row of the partition.
    Any,
    /// Rows whose sort key equals the value.
    Eq(String),
    /// Rows whose sort key is less than or equal to the bound.
    Le(String),
}

/// A query against one named index. Results come back sorted ascending by
/// `(sort, id)` and resolved against the primary table; dangling index rows
/// are dropped, not errors.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexQuery {
    pub index: IndexName,
    pub partition: String,
    pub sort: SortCond,
}

impl IndexQuery {
    pub fn all(index: IndexName, partition: &str) -> Self {
        Self { index, partition: partition.to_string(), sort: SortCond::Any }
    }

    pub fn eq(index: IndexName, partition: &str, sort: &str) -> Self {
        Self { index, partition: partition.to_string(), sort: SortCond::Eq(sort.to_string()) }
    }

    pub fn up_to(index: IndexName, partition: &str, sort_bound: &str) -> Self {
        Self { index, partition: partition.to_string(), sort: SortCond::Le(sort_bound.to_string()) }
    }

    /// Does `sort` satisfy this query's sort condition?
    pub fn sort_matches(&self, sort: &str) -> bool {
        match &self.sort {
            SortCond::Any => true,
            SortCond::Eq(v) => sort == v,
            SortCond::Le(bound) => sort <= bound.as_str(),
        }
    }
}
