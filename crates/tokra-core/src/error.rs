use thiserror::Error;

/// Public error surface of the ledger core.
///
/// Every variant maps to a stable code via [`LedgerError::code`]; the codes
/// are part of the external contract and must not change.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ── Validation ───────────────────────────────────────────────────────────
    #[error("Invalid transaction payload: {0}")]
    InvalidPayload(String),

    #[error("invalid transaction type: {0}")]
    InvalidTransactionType(String),

    #[error("amount must be a positive integer")]
    InvalidAmount,

    #[error("invalid token type: {0}")]
    InvalidTokenType(String),

    #[error("beneficiaryId is required for free token operations")]
    MissingBeneficiaryId,

    #[error("expiresAfter must be between {min} and {max} seconds")]
    InvalidTimeout { min: i64, max: i64 },

    // ── Balance ──────────────────────────────────────────────────────────────
    #[error("insufficient tokens: need {need}, have {have}")]
    InsufficientTokens { need: u64, have: u64 },

    #[error("insufficient paid tokens: need {need}, have {have}")]
    InsufficientPaidTokens { need: u64, have: u64 },

    // ── Lookup ───────────────────────────────────────────────────────────────
    #[error("either transactionId or refId must be supplied")]
    MissingIdentifier,

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("transaction {0} carries no held tokens")]
    NoHeldTokens(String),

    #[error("no open holds for refId {0}")]
    NoOpenHolds(String),

    // ── HOLD lifecycle ───────────────────────────────────────────────────────
    #[error("hold {0} has no state attribute; record is corrupt")]
    HoldMissingState(String),

    #[error("an open hold already exists for refId {0}")]
    DuplicateHoldRefId(String),

    #[error("hold {0} is already captured")]
    AlreadyCaptured(String),

    #[error("hold {0} is already reversed")]
    AlreadyReversed(String),

    #[error("hold {0} was modified concurrently")]
    AlreadyProcessed(String),

    #[error("extension exceeds the {max}s total hold lifetime")]
    TimeoutExceeded { max: i64 },

    // ── Storage ──────────────────────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Stable public error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPayload(_) => "INVALID_TRANSACTION_PAYLOAD",
            Self::InvalidTransactionType(_) => "INVALID_TRANSACTION_TYPE",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::InvalidTokenType(_) => "INVALID_TOKEN_TYPE",
            Self::MissingBeneficiaryId => "MISSING_BENEFICIARY_ID",
            Self::InvalidTimeout { .. } => "INVALID_TIMEOUT",
            Self::InsufficientTokens { .. } => "INSUFFICIENT_TOKENS",
            Self::InsufficientPaidTokens { .. } => "INSUFFICIENT_PAID_TOKENS",
            Self::MissingIdentifier => "MISSING_IDENTIFIER",
            Self::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            Self::NoHeldTokens(_) => "NO_HELD_TOKENS",
            Self::NoOpenHolds(_) => "NO_OPEN_HOLDS",
            Self::HoldMissingState(_) => "HOLD_MISSING_STATE",
            Self::DuplicateHoldRefId(_) => "DUPLICATE_HOLD_REFID",
            Self::AlreadyCaptured(_) => "ALREADY_CAPTURED",
            Self::AlreadyReversed(_) => "ALREADY_REVERSED",
            Self::AlreadyProcessed(_) => "ALREADY_PROCESSED",
            Self::TimeoutExceeded { .. } => "TIMEOUT_EXCEEDED",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(LedgerError::InvalidAmount.code(), "INVALID_AMOUNT");
        assert_eq!(
            LedgerError::DuplicateHoldRefId("booking-1".into()).code(),
            "DUPLICATE_HOLD_REFID"
        );
        assert_eq!(
            LedgerError::InsufficientTokens { need: 10, have: 3 }.code(),
            "INSUFFICIENT_TOKENS"
        );
        assert_eq!(
            LedgerError::TimeoutExceeded { max: 7200 }.code(),
            "TIMEOUT_EXCEEDED"
        );
    }
}
