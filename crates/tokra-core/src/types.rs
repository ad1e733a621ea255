use rand::RngCore;

use crate::constants::SYNTHETIC_REF_PREFIX;

/// Token amount in whole tokens. All ledger arithmetic is integral; balance
/// folds widen to i128 so invariant violations are detectable before clamping.
pub type Amount = u64;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

/// Optimistic-lock counter on mutable (HOLD) rows. Starts at 1 and is
/// incremented by every lifecycle mutation.
pub type Version = u32;

/// Generate a fresh entry id: hex BLAKE3 over 16 random bytes plus the
/// current wall clock, truncated to 32 hex characters.
pub fn new_entry_id() -> String {
    digest_hex()
}

/// Materialize a synthetic refId for a caller that supplied none.
pub fn new_synthetic_ref_id() -> String {
    format!("{}{}", SYNTHETIC_REF_PREFIX, &digest_hex()[..16])
}

/// True if `ref_id` was materialized by a writer rather than supplied by the
/// caller. Synthetic refIds are exempt from the open-hold uniqueness check.
pub fn is_synthetic_ref_id(ref_id: &str) -> bool {
    ref_id.starts_with(SYNTHETIC_REF_PREFIX)
}

fn digest_hex() -> String {
    let mut seed = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut seed[..16]);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    seed[16..].copy_from_slice(&nanos.to_be_bytes());
    let hash = blake3::hash(&seed);
    hex::encode(&hash.as_bytes()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_ids_are_unique_and_fixed_width() {
        let a = new_entry_id();
        let b = new_entry_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn synthetic_ref_ids_are_recognizable() {
        let r = new_synthetic_ref_id();
        assert!(is_synthetic_ref_id(&r));
        assert!(!is_synthetic_ref_id("booking-2"));
    }
}
