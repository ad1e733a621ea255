//! Core domain model for the Tokra token ledger.
//!
//! This crate holds everything the rest of the workspace agrees on:
//! - [`entry::LedgerEntry`] — the single event type the ledger is made of
//! - [`split`] — the pure consumption-split calculator
//! - [`error::LedgerError`] — the public error surface with stable codes
//! - [`timeutil`] — ISO-8601 helpers tolerant of malformed wild data
//! - [`sink::ErrorSink`] — recoverable-error collection for corruption and
//!   failed side effects

pub mod constants;
pub mod entry;
pub mod error;
pub mod sink;
pub mod split;
pub mod timeutil;
pub mod types;

pub use entry::{AuditEntry, HoldState, LedgerEntry, Metadata, TransactionType};
pub use error::LedgerError;
pub use sink::{ErrorSink, MemorySink, TracingSink};
pub use split::{plan_split, BalanceSnapshot, Split, SplitMode};
