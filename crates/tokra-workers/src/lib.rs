//! tokra-workers
//!
//! Cron-driven maintenance over the ledger. The workers are callable
//! operations with wall-clock budgets; scheduling belongs to the host
//! runtime, not to this crate. The expiry worker must run at a cadence of
//! at most half the minimum hold lifetime so reservations are never kept
//! past their guaranteed deadline by more than one tick.

pub mod expiry;
pub mod retention;

pub use expiry::{ExpirySummary, ExpiryWorker};
pub use retention::{PurgeOptions, PurgeSummary, RetentionWorker};
