//! Optional entitlement side effects.

/// Post-write entitlement notifications, injected by the host service.
///
/// Invoked after a HOLD capture (grant) or reverse (deny). The ledger event
/// is the source of truth: hook failures are recorded through the error
/// sink and never propagate to the caller of the primary mutation. When no
/// hooks are configured the ledger notes it at debug level and moves on.
pub trait EntitlementHooks: Send + Sync {
    fn grant_access(&self, user_id: &str, beneficiary_id: &str, ref_id: &str)
        -> Result<(), String>;

    fn deny_access(&self, user_id: &str, beneficiary_id: &str, ref_id: &str)
        -> Result<(), String>;
}
