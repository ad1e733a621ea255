//! Storage layer for the Tokra ledger.
//!
//! A wide-column flavored abstraction ([`EntryStore`]) over an embedded KV
//! store (sled): a primary ledger table, an archive table, and one tree per
//! named secondary index. Conditional updates are compare-and-swap loops on
//! the primary tree; index maintenance is best-effort, so every caller that
//! depends on an index either has a fallback or re-checks the primary row.

pub mod codec;
pub mod faults;
pub mod index;
pub mod sled_store;
pub mod store;

pub use faults::FaultyIndexStore;
pub use index::{IndexName, IndexQuery, SortCond};
pub use sled_store::SledStore;
pub use store::{EntryMutation, EntryStore, ScanOptions, StoreError, UpdateCondition};
