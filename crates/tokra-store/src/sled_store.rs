//! sled-backed store.
//!
//! Trees:
//!   token_registry          — entry id (utf8) → JSON(LedgerEntry)
//!   token_registry_archive  — entry id (utf8) → JSON(LedgerEntry)
//!   idx_*                   — one tree per [`IndexName`], composite key → id
//!
//! The primary tree is the source of truth. Conditional updates run a CAS
//! loop so the precondition is always evaluated against the pre-image that
//! actually gets replaced. Index rows are maintained after the primary
//! write and re-verified on read, so a stale row can only ever widen a
//! query result before the re-check, never corrupt it.

use std::collections::HashMap;
use std::path::Path;

use tokra_core::constants::LOG_TARGET;
use tokra_core::entry::LedgerEntry;
use tracing::warn;

use crate::codec;
use crate::index::{self, IndexName, IndexQuery, SortCond};
use crate::store::{EntryMutation, EntryStore, ScanOptions, StoreError, UpdateCondition};

/// Primary ledger table name.
pub const LEDGER_TABLE: &str = "token_registry";

/// Archive table name used by the retention worker.
pub const ARCHIVE_TABLE: &str = "token_registry_archive";

pub struct SledStore {
    _db: sled::Db,
    entries: sled::Tree,
    archive: sled::Tree,
    indexes: HashMap<IndexName, sled::Tree>,
}

fn backend(e: sled::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SledStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(backend)?;
        Self::with_db(db)
    }

    /// Throwaway in-memory-backed store for tests.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open().map_err(backend)?;
        Self::with_db(db)
    }

    fn with_db(db: sled::Db) -> Result<Self, StoreError> {
        let entries = db.open_tree(LEDGER_TABLE).map_err(backend)?;
        let archive = db.open_tree(ARCHIVE_TABLE).map_err(backend)?;
        let mut indexes = HashMap::new();
        for name in IndexName::ALL {
            indexes.insert(name, db.open_tree(name.tree_name()).map_err(backend)?);
        }
        Ok(Self { _db: db, entries, archive, indexes })
    }

    fn index_tree(&self, name: IndexName) -> &sled::Tree {
        self.indexes.get(&name).expect("every index tree is opened at startup")
    }

    fn insert_index_rows(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        for name in IndexName::ALL {
            if let Some(key) = name.key_for(entry) {
                self.index_tree(name)
                    .insert(key, entry.id.as_bytes())
                    .map_err(backend)?;
            }
        }
        Ok(())
    }

    fn remove_index_rows(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        for name in IndexName::ALL {
            if let Some(key) = name.key_for(entry) {
                self.index_tree(name).remove(key).map_err(backend)?;
            }
        }
        Ok(())
    }

    fn refresh_index_rows(
        &self,
        old: &LedgerEntry,
        new: &LedgerEntry,
    ) -> Result<(), StoreError> {
        for name in IndexName::ALL {
            let old_key = name.key_for(old);
            let new_key = name.key_for(new);
            if old_key == new_key {
                continue;
            }
            if let Some(key) = old_key {
                self.index_tree(name).remove(key).map_err(backend)?;
            }
            if let Some(key) = new_key {
                self.index_tree(name)
                    .insert(key, new.id.as_bytes())
                    .map_err(backend)?;
            }
        }
        Ok(())
    }
}

impl EntryStore for SledStore {
    fn put(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        // Overwrites must not leave stale index rows behind.
        if let Some(old_bytes) = self.entries.get(entry.id.as_bytes()).map_err(backend)? {
            if let Ok(old) = codec::decode_entry(&old_bytes) {
                self.remove_index_rows(&old)?;
            }
        }
        let bytes = codec::encode_entry(entry)?;
        self.entries
            .insert(entry.id.as_bytes(), bytes)
            .map_err(backend)?;
        self.insert_index_rows(entry)
    }

    fn get(&self, id: &str) -> Result<Option<LedgerEntry>, StoreError> {
        match self.entries.get(id.as_bytes()).map_err(backend)? {
            Some(bytes) => Ok(Some(codec::decode_entry(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        if let Some(bytes) = self.entries.remove(id.as_bytes()).map_err(backend)? {
            if let Ok(old) = codec::decode_entry(&bytes) {
                self.remove_index_rows(&old)?;
            }
        }
        Ok(())
    }

    fn update_conditional(
        &self,
        id: &str,
        mutation: EntryMutation,
        condition: UpdateCondition,
    ) -> Result<LedgerEntry, StoreError> {
        loop {
            let current_bytes = match self.entries.get(id.as_bytes()).map_err(backend)? {
                Some(bytes) => bytes,
                None => return Err(StoreError::ConditionFailed(id.to_string())),
            };
            let current = codec::decode_entry(&current_bytes)?;
            if !condition.holds_for(&current) {
                return Err(StoreError::ConditionFailed(id.to_string()));
            }
            let next = mutation.apply_to(&current);
            let next_bytes = codec::encode_entry(&next)?;
            let swap = self
                .entries
                .compare_and_swap(
                    id.as_bytes(),
                    Some(current_bytes.as_ref()),
                    Some(next_bytes),
                )
                .map_err(backend)?;
            match swap {
                Ok(()) => {
                    self.refresh_index_rows(&current, &next)?;
                    return Ok(next);
                }
                // A concurrent writer replaced the row between read and
                // swap; re-evaluate the condition against the new pre-image.
                Err(_) => continue,
            }
        }
    }

    fn query_by_index(&self, query: &IndexQuery) -> Result<Vec<LedgerEntry>, StoreError> {
        let tree = self.index_tree(query.index);
        let prefix = index::partition_prefix(&query.partition);
        let mut out = Vec::new();
        for item in tree.scan_prefix(&prefix) {
            let (key, _) = item.map_err(backend)?;
            let Some((_, sort, id)) = index::split_key(&key) else {
                continue;
            };
            if !query.sort_matches(&sort) {
                // Keys come back ascending by (sort, id); past an upper
                // bound nothing further can match.
                if matches!(&query.sort, SortCond::Le(bound) if sort.as_str() > bound.as_str()) {
                    break;
                }
                continue;
            }
            let Some(entry) = self.get(&id)? else {
                continue; // dangling row: the primary record is gone
            };
            // Stale row: the entry moved to a different index key (e.g. a
            // HOLD left the OPEN state) and maintenance has not caught up.
            if query.index.key_for(&entry).as_deref() != Some(key.as_ref()) {
                continue;
            }
            out.push(entry);
        }
        Ok(out)
    }

    fn scan(&self, opts: &ScanOptions) -> Result<Vec<LedgerEntry>, StoreError> {
        let limit = opts.limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        for item in self.entries.iter() {
            if out.len() >= limit {
                break;
            }
            let (key, bytes) = item.map_err(backend)?;
            match codec::decode_entry(&bytes) {
                Ok(entry) => out.push(entry),
                Err(e) => {
                    warn!(
                        target: LOG_TARGET,
                        key = %String::from_utf8_lossy(&key),
                        error = %e,
                        "skipping undecodable row during scan"
                    );
                }
            }
        }
        Ok(out)
    }

    fn count(&self) -> Result<u64, StoreError> {
        Ok(self.entries.len() as u64)
    }

    fn archive(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let bytes = codec::encode_entry(entry)?;
        self.archive
            .insert(entry.id.as_bytes(), bytes)
            .map_err(backend)?;
        Ok(())
    }

    fn get_archived(&self, id: &str) -> Result<Option<LedgerEntry>, StoreError> {
        match self.archive.get(id.as_bytes()).map_err(backend)? {
            Some(bytes) => Ok(Some(codec::decode_entry(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokra_core::constants::NEVER_EXPIRES;
    use tokra_core::entry::{HoldState, Metadata, TransactionType};

    fn hold(id: &str, user: &str, ref_id: &str, state: HoldState, version: u32) -> LedgerEntry {
        LedgerEntry {
            id: id.into(),
            user_id: user.into(),
            beneficiary_id: "carol".into(),
            transaction_type: TransactionType::Hold,
            amount: 10,
            purpose: "booking".into(),
            ref_id: ref_id.into(),
            expires_at: "2026-08-01T01:00:00.000Z".into(),
            created_at: "2026-08-01T00:00:00.000Z".into(),
            metadata: Metadata::Raw("{}".into()),
            state: Some(state),
            version,
            free_beneficiary_consumed: 0,
            free_system_consumed: 0,
            free_beneficiary_source_id: None,
        }
    }

    fn credit(id: &str, user: &str, created_at: &str) -> LedgerEntry {
        LedgerEntry {
            id: id.into(),
            user_id: user.into(),
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

    #[test]
    fn put_get_delete_round_trip() {
        let store = SledStore::temporary().unwrap();
        let e = credit("e1", "alice", "2026-08-01T00:00:00.000Z");
        store.put(&e).unwrap();
        assert_eq!(store.get("e1").unwrap(), Some(e));
        assert_eq!(store.count().unwrap(), 1);
        store.delete("e1").unwrap();
        assert_eq!(store.get("e1").unwrap(), None);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn user_created_index_returns_rows_in_time_order() {
        let store = SledStore::temporary().unwrap();
        store.put(&credit("b", "alice", "2026-08-01T00:00:02.000Z")).unwrap();
        store.put(&credit("a", "alice", "2026-08-01T00:00:01.000Z")).unwrap();
        store.put(&credit("c", "bob", "2026-08-01T00:00:00.000Z")).unwrap();

        let rows = store
            .query_by_index(&IndexQuery::all(IndexName::UserCreated, "alice"))
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn ref_state_index_finds_open_holds_only() {
        let store = SledStore::temporary().unwrap();
        store.put(&hold("h1", "alice", "booking-1", HoldState::Open, 1)).unwrap();
        store.put(&hold("h2", "alice", "booking-1", HoldState::Reversed, 2)).unwrap();
        store.put(&hold("h3", "alice", "booking-2", HoldState::Open, 1)).unwrap();

        let open = store
            .query_by_index(&IndexQuery::eq(IndexName::RefState, "booking-1", "OPEN"))
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "h1");
    }

    #[test]
    fn type_expires_upper_bound_query() {
        let store = SledStore::temporary().unwrap();
        let mut early = hold("h1", "alice", "r1", HoldState::Open, 1);
        early.expires_at = "2026-08-01T00:10:00.000Z".into();
        let mut late = hold("h2", "alice", "r2", HoldState::Open, 1);
        late.expires_at = "2026-08-01T09:00:00.000Z".into();
        store.put(&early).unwrap();
        store.put(&late).unwrap();

        let due = store
            .query_by_index(&IndexQuery::up_to(
                IndexName::TypeExpires,
                "HOLD",
                "2026-08-01T01:00:00.000Z",
            ))
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "h1");
    }

    #[test]
    fn conditional_update_applies_and_moves_index_rows() {
        let store = SledStore::temporary().unwrap();
        store.put(&hold("h1", "alice", "booking-1", HoldState::Open, 1)).unwrap();

        let post = store
            .update_conditional(
                "h1",
                EntryMutation {
                    state: Some(HoldState::Captured),
                    version: Some(2),
                    ..Default::default()
                },
                UpdateCondition {
                    transaction_type: Some(TransactionType::Hold),
                    state: Some(HoldState::Open),
                    version: Some(1),
                },
            )
            .unwrap();
        assert_eq!(post.state, Some(HoldState::Captured));
        assert_eq!(post.version, 2);

        // The OPEN index row is gone; the CAPTURED one exists.
        let open = store
            .query_by_index(&IndexQuery::eq(IndexName::RefState, "booking-1", "OPEN"))
            .unwrap();
        assert!(open.is_empty());
        let captured = store
            .query_by_index(&IndexQuery::eq(IndexName::RefState, "booking-1", "CAPTURED"))
            .unwrap();
        assert_eq!(captured.len(), 1);
    }

    #[test]
    fn conditional_update_rejects_stale_version() {
        let store = SledStore::temporary().unwrap();
        store.put(&hold("h1", "alice", "booking-1", HoldState::Open, 2)).unwrap();

        let err = store
            .update_conditional(
                "h1",
                EntryMutation { state: Some(HoldState::Captured), ..Default::default() },
                UpdateCondition { version: Some(1), ..Default::default() },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed(_)));
        // And the row is untouched.
        assert_eq!(store.get("h1").unwrap().unwrap().state, Some(HoldState::Open));
    }

    #[test]
    fn conditional_update_on_missing_row_fails_condition() {
        let store = SledStore::temporary().unwrap();
        let err = store
            .update_conditional("ghost", EntryMutation::default(), UpdateCondition::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed(_)));
    }

    #[test]
    fn archive_keeps_a_copy() {
        let store = SledStore::temporary().unwrap();
        let e = credit("e1", "alice", "2026-08-01T00:00:00.000Z");
        store.put(&e).unwrap();
        store.archive(&e).unwrap();
        store.delete("e1").unwrap();
        assert_eq!(store.get("e1").unwrap(), None);
        assert_eq!(store.get_archived("e1").unwrap(), Some(e));
    }

    #[test]
    fn scan_respects_limit() {
        let store = SledStore::temporary().unwrap();
        for i in 0..5 {
            store
                .put(&credit(&format!("e{i}"), "alice", "2026-08-01T00:00:00.000Z"))
                .unwrap();
        }
        let rows = store.scan(&ScanOptions { limit: Some(3) }).unwrap();
        assert_eq!(rows.len(), 3);
        let all = store.scan(&ScanOptions::default()).unwrap();
        assert_eq!(all.len(), 5);
    }
}
