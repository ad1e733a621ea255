//! ─── Tokra Ledger Constants ─────────────────────────────────────────────────
//!
//! Token amounts are whole tokens (no sub-units). Instants are ISO-8601
//! strings with millisecond precision; their lexicographic order equals
//! chronological order, which the index key encoding relies on.

// ── Sentinels ────────────────────────────────────────────────────────────────

/// Beneficiary id for universal free grants not tied to a specific creator.
pub const SYSTEM_BENEFICIARY: &str = "system";

/// Expiry sentinel for grants that never expire. Sorts after every real
/// instant in the ISO-8601 encoding.
pub const NEVER_EXPIRES: &str = "9999-12-31T23:59:59.999Z";

/// Prefix marking a synthetic refId materialized by a writer when the caller
/// supplied none. Synthetic refIds keep the refId indexes usable but carry
/// no semantic linkage and are exempt from the open-hold uniqueness check.
pub const SYNTHETIC_REF_PREFIX: &str = "noref-";

/// Target every structured ledger log record is tagged with.
pub const LOG_TARGET: &str = "tokens";

// ── HOLD reservations ─────────────────────────────────────────────────────────

/// Minimum reservation lifetime (seconds).
pub const MIN_HOLD_SECS: i64 = 300;

/// Maximum reservation lifetime at creation (seconds).
pub const MAX_HOLD_SECS: i64 = 3600;

/// Relaxed lower bound when the caller passes the `testing` metadata flag.
pub const MIN_HOLD_SECS_TESTING: i64 = 1;

/// Ceiling on `expires_at - created_at` across all extensions (seconds).
pub const MAX_HOLD_TOTAL_SECS: i64 = 7200;

// ── Free grants ───────────────────────────────────────────────────────────────

/// Default purpose tag for free-token grants.
pub const DEFAULT_GRANT_PURPOSE: &str = "free_grant";

// ── Retention ─────────────────────────────────────────────────────────────────

/// Records older than this many days are purge candidates.
pub const RETENTION_DEFAULT_OLDER_THAN_DAYS: i64 = 730;

/// Maximum rows examined per purge run.
pub const RETENTION_DEFAULT_LIMIT: usize = 1000;

/// Soft wall-clock budget for a single purge run (seconds).
pub const RETENTION_DEFAULT_MAX_SECS: u64 = 25;

// ── Admin pagination ──────────────────────────────────────────────────────────

/// Default page size for admin list queries.
pub const PAGE_LIMIT_DEFAULT: usize = 20;

/// Maximum page size for admin list queries.
pub const PAGE_LIMIT_MAX: usize = 1000;
