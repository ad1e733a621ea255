//! The ledger event model.
//!
//! The ledger is a set of [`LedgerEntry`] events; every derived figure
//! (balances, drilldowns, earnings) is computed by folding events. Non-HOLD
//! entries are immutable once written. HOLD entries mutate only through
//! version-conditional updates, which keeps their `audit_trail` append-only.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::NEVER_EXPIRES;
use crate::error::LedgerError;
use crate::types::{Amount, Version};

// ── TransactionType ───────────────────────────────────────────────────────────

/// Ledger event kind. Determines how `amount` and the free-consumption
/// fields are interpreted:
///
/// | kind        | `amount` means                       |
/// |-------------|--------------------------------------|
/// | CREDIT_PAID | paid tokens added to the holder      |
/// | CREDIT_FREE | free tokens added to a grant bucket  |
/// | DEBIT       | paid tokens deducted                 |
/// | HOLD        | paid tokens reserved, not transferred|
/// | TIP         | paid tokens transferred to receiver  |
///
/// For DEBIT/HOLD/TIP the free portions of the operation live in
/// `free_beneficiary_consumed` / `free_system_consumed`, never in `amount`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    CreditPaid,
    CreditFree,
    Debit,
    Hold,
    Tip,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditPaid => "CREDIT_PAID",
            Self::CreditFree => "CREDIT_FREE",
            Self::Debit => "DEBIT",
            Self::Hold => "HOLD",
            Self::Tip => "TIP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREDIT_PAID" => Some(Self::CreditPaid),
            "CREDIT_FREE" => Some(Self::CreditFree),
            "DEBIT" => Some(Self::Debit),
            "HOLD" => Some(Self::Hold),
            "TIP" => Some(Self::Tip),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| LedgerError::InvalidTransactionType(s.to_string()))
    }
}

// ── HoldState ─────────────────────────────────────────────────────────────────

/// Lifecycle state of a HOLD row. Transitions are exactly OPEN→CAPTURED and
/// OPEN→REVERSED; both targets are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldState {
    Open,
    Captured,
    Reversed,
}

impl HoldState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Captured => "CAPTURED",
            Self::Reversed => "REVERSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "CAPTURED" => Some(Self::Captured),
            "REVERSED" => Some(Self::Reversed),
            _ => None,
        }
    }

    /// True once no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Captured | Self::Reversed)
    }
}

impl std::fmt::Display for HoldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HoldState {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
            .ok_or_else(|| LedgerError::InvalidPayload(format!("unknown hold state: {s}")))
    }
}

// ── Metadata ──────────────────────────────────────────────────────────────────

/// Key under which a HOLD's lifecycle audit trail lives inside the metadata
/// bag.
pub const AUDIT_TRAIL_KEY: &str = "audit_trail";

/// The metadata bag attached to every entry.
///
/// Stored as a structured object for DEBIT/TIP rows and as a serialized JSON
/// string for every other type; readers must tolerate either shape. A string
/// that does not parse as a JSON object is corrupt metadata and is carried
/// as-is rather than failing the read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Metadata {
    Structured(Map<String, Value>),
    Raw(String),
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata::Structured(Map::new())
    }
}

impl Metadata {
    pub fn structured(map: Map<String, Value>) -> Self {
        Metadata::Structured(map)
    }

    /// The bag as a map, parsing the string shape on demand. `None` for
    /// corrupt metadata.
    pub fn as_map(&self) -> Option<Map<String, Value>> {
        match self {
            Metadata::Structured(map) => Some(map.clone()),
            Metadata::Raw(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            },
        }
    }

    /// Look up a single field, whatever the stored shape.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.as_map().and_then(|m| m.get(key).cloned())
    }

    /// The lifecycle audit trail, empty when absent or unreadable.
    pub fn audit_trail(&self) -> Vec<AuditEntry> {
        self.get(AUDIT_TRAIL_KEY)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Return a copy with `entry` appended to the audit trail, preserving
    /// the stored shape. Corrupt string metadata is replaced by a fresh bag
    /// holding only the trail, so lifecycle progress is never blocked.
    pub fn with_audit_entry(&self, entry: AuditEntry) -> Metadata {
        let mut map = self.as_map().unwrap_or_default();
        let mut trail = self.audit_trail();
        trail.push(entry);
        if let Ok(v) = serde_json::to_value(&trail) {
            map.insert(AUDIT_TRAIL_KEY.to_string(), v);
        }
        match self {
            Metadata::Structured(_) => Metadata::Structured(map),
            Metadata::Raw(_) => Metadata::Raw(
                serde_json::to_string(&Value::Object(map)).unwrap_or_default(),
            ),
        }
    }

    /// Return a copy with `key` set, preserving the stored shape.
    pub fn with_field(&self, key: &str, value: Value) -> Metadata {
        let mut map = self.as_map().unwrap_or_default();
        map.insert(key.to_string(), value);
        match self {
            Metadata::Structured(_) => Metadata::Structured(map),
            Metadata::Raw(_) => Metadata::Raw(
                serde_json::to_string(&Value::Object(map)).unwrap_or_default(),
            ),
        }
    }

    /// True when the caller marked this operation with the `testing` flag.
    /// The flag is stripped before persistence.
    pub fn testing_flag(&self) -> bool {
        matches!(self.get("testing"), Some(Value::Bool(true)))
    }
}

// ── AuditEntry ────────────────────────────────────────────────────────────────

/// One lifecycle event inside a HOLD's audit trail. The trail is append-only
/// under the version-conditional update protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// HOLD state after this lifecycle event.
    pub status: String,
    /// Instant the lifecycle event was recorded (ISO-8601).
    pub timestamp: String,
    /// Which operation produced the event: open, capture, reverse, extend.
    pub action: String,
    /// New deadline, present on extend entries only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl AuditEntry {
    pub fn new(status: &str, timestamp: &str, action: &str) -> Self {
        Self {
            status: status.to_string(),
            timestamp: timestamp.to_string(),
            action: action.to_string(),
            expires_at: None,
        }
    }
}

// ── LedgerEntry ───────────────────────────────────────────────────────────────

fn default_expires_at() -> String {
    NEVER_EXPIRES.to_string()
}

fn default_version() -> Version {
    1
}

/// One ledger event as stored in the primary table.
///
/// Fields added after the first schema use `#[serde(default)]` so rows
/// written by older builds keep deserializing without migration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Opaque unique identifier, assigned on creation, immutable.
    pub id: String,
    /// The party the event is attributed to: payer, holder, sender, or
    /// receiver-of-credit.
    pub user_id: String,
    /// Counterparty: grant-bucket owner for CREDIT_FREE, receiving side for
    /// DEBIT/TIP/HOLD, the system sentinel for universal grants.
    pub beneficiary_id: String,
    pub transaction_type: TransactionType,
    /// Paid-token portion of the event (see [`TransactionType`]).
    pub amount: Amount,
    /// Free-text tag describing why the event exists.
    #[serde(default)]
    pub purpose: String,
    /// External reference (e.g. a booking id), or a synthetic value when the
    /// caller supplied none. Participates in the refId indexes either way.
    pub ref_id: String,
    /// Grant expiry for CREDIT_FREE, reservation deadline for HOLD, the
    /// never-expires sentinel otherwise.
    #[serde(default = "default_expires_at")]
    pub expires_at: String,
    /// Creation instant; the ordering key for user history.
    pub created_at: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Lifecycle state, present only on HOLD rows. A HOLD row without a
    /// state is data corruption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<HoldState>,
    /// Optimistic-lock counter, strictly increasing per row.
    #[serde(default = "default_version")]
    pub version: Version,
    /// Beneficiary-bucket free tokens consumed by this event.
    #[serde(default)]
    pub free_beneficiary_consumed: Amount,
    /// System-bucket free tokens consumed by this event.
    #[serde(default)]
    pub free_system_consumed: Amount,
    /// For TIPs consuming a third creator's bucket: which bucket was debited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_beneficiary_source_id: Option<String>,
}

impl LedgerEntry {
    pub fn is_hold(&self) -> bool {
        self.transaction_type == TransactionType::Hold
    }

    pub fn is_open_hold(&self) -> bool {
        self.is_hold() && self.state == Some(HoldState::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(tt: TransactionType) -> LedgerEntry {
        LedgerEntry {
            id: "e1".into(),
            user_id: "alice".into(),
            beneficiary_id: "system".into(),
            transaction_type: tt,
            amount: 5,
            purpose: "test".into(),
            ref_id: "r1".into(),
            expires_at: NEVER_EXPIRES.into(),
            created_at: "2026-08-01T00:00:00.000Z".into(),
            metadata: Metadata::default(),
            state: None,
            version: 1,
            free_beneficiary_consumed: 0,
            free_system_consumed: 0,
            free_beneficiary_source_id: None,
        }
    }

    #[test]
    fn unknown_type_string_yields_the_stable_code() {
        let err = "CREDIT_BONUS".parse::<TransactionType>().unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSACTION_TYPE");
        assert_eq!("HOLD".parse::<TransactionType>().unwrap(), TransactionType::Hold);
        assert_eq!("OPEN".parse::<HoldState>().unwrap(), HoldState::Open);
        assert!("HELD".parse::<HoldState>().is_err());
    }

    #[test]
    fn type_and_state_round_trip_through_strings() {
        for tt in [
            TransactionType::CreditPaid,
            TransactionType::CreditFree,
            TransactionType::Debit,
            TransactionType::Hold,
            TransactionType::Tip,
        ] {
            assert_eq!(TransactionType::parse(tt.as_str()), Some(tt));
        }
        for st in [HoldState::Open, HoldState::Captured, HoldState::Reversed] {
            assert_eq!(HoldState::parse(st.as_str()), Some(st));
        }
        assert!(HoldState::Captured.is_terminal());
        assert!(!HoldState::Open.is_terminal());
    }

    #[test]
    fn metadata_reads_both_shapes() {
        let mut map = Map::new();
        map.insert("note".into(), json!("hi"));
        let structured = Metadata::Structured(map);
        assert_eq!(structured.get("note"), Some(json!("hi")));

        let raw = Metadata::Raw(r#"{"note":"hi"}"#.into());
        assert_eq!(raw.get("note"), Some(json!("hi")));

        let corrupt = Metadata::Raw("not json at all".into());
        assert_eq!(corrupt.get("note"), None);
        assert!(corrupt.as_map().is_none());
    }

    #[test]
    fn audit_append_preserves_shape() {
        let raw = Metadata::Raw("{}".into());
        let with =
            raw.with_audit_entry(AuditEntry::new("OPEN", "2026-08-01T00:00:00.000Z", "open"));
        assert!(matches!(with, Metadata::Raw(_)));
        assert_eq!(with.audit_trail().len(), 1);

        let structured = Metadata::default()
            .with_audit_entry(AuditEntry::new("OPEN", "t0", "open"))
            .with_audit_entry(AuditEntry::new("CAPTURED", "t1", "capture"));
        assert!(matches!(structured, Metadata::Structured(_)));
        let trail = structured.audit_trail();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1].action, "capture");
    }

    #[test]
    fn entry_serde_defaults_tolerate_old_rows() {
        // A minimal row without version/metadata/free fields still decodes.
        let old = json!({
            "id": "e9",
            "user_id": "bob",
            "beneficiary_id": "system",
            "transaction_type": "CREDIT_PAID",
            "amount": 10,
            "ref_id": "r9",
            "created_at": "2026-08-01T00:00:00.000Z"
        });
        let decoded: LedgerEntry = serde_json::from_value(old).unwrap();
        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.expires_at, NEVER_EXPIRES);
        assert_eq!(decoded.metadata, Metadata::default());
    }

    #[test]
    fn hold_state_in_row_serialization() {
        let mut e = entry(TransactionType::Hold);
        e.state = Some(HoldState::Open);
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["state"], json!("OPEN"));
        assert_eq!(v["transaction_type"], json!("HOLD"));
        let back: LedgerEntry = serde_json::from_value(v).unwrap();
        assert!(back.is_open_hold());
    }

    #[test]
    fn testing_flag_detected() {
        let meta = Metadata::default().with_field("testing", json!(true));
        assert!(meta.testing_flag());
        assert!(!Metadata::default().testing_flag());
    }
}
