//! # Protocol Configuration & Constants
//!
//! Every magic number in Lumen lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.

use lumen_contracts::allowance::WEEK_SECONDS;
use lumen_contracts::attestation::SECONDS_PER_DAY;

// ---------------------------------------------------------------------------
// Protocol Identity
// ---------------------------------------------------------------------------

/// Protocol fingerprint for service identification. Shows up in health
/// checks and log banners so operators can tell builds apart.
pub const PROTOCOL_FINGERPRINT: &str = "LUMEN-SPEND-2026";

/// The full version string, assembled at compile time.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Address prefix for Lumen ledger identities.
pub const ADDRESS_PREFIX: &str = "lumen:";

// ---------------------------------------------------------------------------
// Spending Parameters
// ---------------------------------------------------------------------------

/// Default per-merchant daily limit for a freshly attested merchant,
/// in cents. Guardians tune this per merchant after attestation.
pub const DEFAULT_DAILY_LIMIT: u64 = 50_00;

/// Default weekly allowance for a new guardian/teen relationship, in cents.
pub const DEFAULT_WEEKLY_ALLOWANCE: u64 = 100_00;

/// Ceiling on a single emergency issuance, in cents. Large enough for a
/// stranded-at-the-airport situation, small enough to keep "emergency"
/// meaning something.
pub const MAX_EMERGENCY_ISSUANCE: u64 = 500_00;

/// Memo template stamped on the payment leg of every purchase group.
pub const PURCHASE_MEMO_PREFIX: &str = "Lumen purchase at ";

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// One calendar day, re-exported from the contract layer so service code
/// has a single import site.
pub const DAY_SECONDS: u64 = SECONDS_PER_DAY;

/// One allowance week, likewise re-exported.
pub const ALLOWANCE_WEEK_SECONDS: u64 = WEEK_SECONDS;

// ---------------------------------------------------------------------------
// Network Parameters
// ---------------------------------------------------------------------------

/// Default REST API port. Picked because it wasn't taken.
pub const DEFAULT_API_PORT: u16 = 9310;

/// Base URL for the block explorer links returned by purchase execution.
pub const EXPLORER_BASE_URL: &str = "https://explorer.lumenlabs.io/tx";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_names_the_protocol_family() {
        assert!(PROTOCOL_FINGERPRINT.contains("LUMEN"));
        assert!(!PROTOCOL_VERSION.is_empty());
    }

    #[test]
    fn timing_constants_line_up() {
        assert_eq!(ALLOWANCE_WEEK_SECONDS, DAY_SECONDS * 7);
    }

    #[test]
    fn emergency_ceiling_exceeds_default_allowance() {
        // An emergency should be able to cover at least a full week.
        assert!(MAX_EMERGENCY_ISSUANCE >= DEFAULT_WEEKLY_ALLOWANCE);
    }
}
