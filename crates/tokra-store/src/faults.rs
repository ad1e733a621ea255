//! Fault injection for index-unavailability fallbacks.
//!
//! Secondary indexes are best-effort; every caller that depends on one must
//! survive [`StoreError::IndexUnavailable`] by falling back to an alternate
//! index or a scan. This wrapper makes named indexes fail on demand so those
//! fallback paths can be exercised deterministically.

use std::collections::HashSet;
use std::sync::Mutex;

use tokra_core::entry::LedgerEntry;

use crate::index::{IndexName, IndexQuery};
use crate::store::{EntryMutation, EntryStore, ScanOptions, StoreError, UpdateCondition};

pub struct FaultyIndexStore<S> {
    inner: S,
    down: Mutex<HashSet<IndexName>>,
}

impl<S: EntryStore> FaultyIndexStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, down: Mutex::new(HashSet::new()) }
    }

    /// Make `index` fail with `IndexUnavailable` until restored.
    pub fn fail_index(&self, index: IndexName) {
        self.down.lock().expect("fault set poisoned").insert(index);
    }

    pub fn restore_index(&self, index: IndexName) {
        self.down.lock().expect("fault set poisoned").remove(&index);
    }

    fn is_down(&self, index: IndexName) -> bool {
        self.down.lock().expect("fault set poisoned").contains(&index)
    }
}

impl<S: EntryStore> EntryStore for FaultyIndexStore<S> {
    fn put(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.inner.put(entry)
    }

    fn get(&self, id: &str) -> Result<Option<LedgerEntry>, StoreError> {
        self.inner.get(id)
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete(id)
    }

    fn update_conditional(
        &self,
        id: &str,
        mutation: EntryMutation,
        condition: UpdateCondition,
    ) -> Result<LedgerEntry, StoreError> {
        self.inner.update_conditional(id, mutation, condition)
    }

    fn query_by_index(&self, query: &IndexQuery) -> Result<Vec<LedgerEntry>, StoreError> {
        if self.is_down(query.index) {
            return Err(StoreError::IndexUnavailable(query.index.tree_name()));
        }
        self.inner.query_by_index(query)
    }

    fn scan(&self, opts: &ScanOptions) -> Result<Vec<LedgerEntry>, StoreError> {
        self.inner.scan(opts)
    }

    fn count(&self) -> Result<u64, StoreError> {
        self.inner.count()
    }

    fn archive(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.inner.archive(entry)
    }

    fn get_archived(&self, id: &str) -> Result<Option<LedgerEntry>, StoreError> {
        self.inner.get_archived(id)
    }
}
