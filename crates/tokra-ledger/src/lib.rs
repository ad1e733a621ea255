//! tokra-ledger
//!
//! The token ledger core: `TokenManager` writes validated events into the
//! store, folds balances out of them, and drives the HOLD lifecycle state
//! machine with version-conditional updates.

pub mod balance;
pub mod hold;
pub mod hooks;
pub mod manager;

pub use balance::{Balance, BalanceDrilldown, BucketBreakdown, ExpirySlice};
pub use hold::{HoldTarget, LifecycleSummary};
pub use hooks::EntitlementHooks;
pub use manager::{DebitOptions, HoldOptions, TokenManager, TransferOptions};
