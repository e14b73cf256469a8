//! # Atomic Purchase Group — Shape Rules
//!
//! A Lumen purchase commits only as an indivisible group of exactly three
//! ordered legs:
//!
//! | Index | Leg          | Purpose                                   |
//! |-------|--------------|-------------------------------------------|
//! | 0     | Verification | Merchant attestation + daily-limit check  |
//! | 1     | Allowance    | Payer identity + weekly-ceiling check     |
//! | 2     | Payment      | Fund transfer to the merchant             |
//!
//! The shape invariants exist for the same reason group transactions do on
//! any ledger: an allowance check replayed outside a real three-leg group,
//! or shuffled to a different position, must fail even when every other
//! precondition holds. [`GroupContext`] is the view of the surrounding
//! group that the allowance machine validates against.

use serde::{Deserialize, Serialize};

/// A purchase group always contains exactly this many legs.
pub const PURCHASE_GROUP_SIZE: usize = 3;

/// Position of the attestation verification leg.
pub const VERIFICATION_LEG_INDEX: usize = 0;

/// Position of the allowance enforcement leg.
pub const ALLOWANCE_LEG_INDEX: usize = 1;

/// Position of the payment leg.
pub const PAYMENT_LEG_INDEX: usize = 2;

/// What one leg can observe about the atomic group it sits in: who signed
/// the group, how many legs it has, and which position this leg occupies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupContext {
    /// Identity that submitted (and pays within) the group.
    pub sender: String,
    /// Total number of legs in the group.
    pub group_size: usize,
    /// Zero-based position of the observing leg.
    pub leg_index: usize,
}

impl GroupContext {
    /// Context for a leg of a well-formed three-leg purchase group.
    pub fn purchase_leg(sender: impl Into<String>, leg_index: usize) -> Self {
        Self {
            sender: sender.into(),
            group_size: PURCHASE_GROUP_SIZE,
            leg_index,
        }
    }
}
