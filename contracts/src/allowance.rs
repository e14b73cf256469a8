//! # Allowance Account — State Machine
//!
//! One [`AllowanceAccount`] governs the relationship between a guardian
//! ("parent") and a spender ("teen"): a weekly allowance cadence, a pause
//! switch, out-of-band emergency issuance, and a single time-locked
//! savings slot.
//!
//! The reachable configurations are implicit in the fields rather than an
//! enumerated tag: `Active`, `Paused`, and either of those with a live
//! savings lock. Pause and resume are idempotent toggles, not counted
//! states.
//!
//! This machine performs **no caller-identity checks** — the service layer
//! authenticates the caller (parent-only vs teen-only operations) and
//! hands the machine only validated intents. The one exception is
//! [`authorize_purchase`](AllowanceAccount::authorize_purchase), which
//! re-checks the group sender against the teen identity because that check
//! is part of the atomic-group contract itself.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::atomic::{GroupContext, ALLOWANCE_LEG_INDEX, PURCHASE_GROUP_SIZE};

/// Length of the weekly allowance cadence in seconds (7 days).
pub const WEEK_SECONDS: u64 = 604_800;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Rejections produced by allowance operations.
///
/// These are expected outcomes — state conflicts and policy refusals —
/// never environment failures. The service layer surfaces them as
/// structured declines with the kind preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllowanceError {
    /// The allowance is paused; issuance and purchases are suspended.
    #[error("allowance is paused")]
    Paused,

    /// The weekly cadence has not elapsed yet.
    #[error("weekly allowance not due until {eligible_at}")]
    TooEarly {
        /// Earliest timestamp at which issuance will succeed.
        eligible_at: u64,
    },

    /// The operation requires a positive amount.
    #[error("amount must be positive")]
    ZeroAmount,

    /// A savings lock must unlock strictly in the future.
    #[error("unlock time must be in the future")]
    UnlockNotInFuture,

    /// There are no locked savings to release.
    #[error("no savings are locked")]
    NothingLocked,

    /// The savings timelock has not expired yet.
    #[error("savings still locked until {unlock_time}")]
    StillLocked {
        /// Timestamp at which the lock expires.
        unlock_time: u64,
    },

    /// The group sender is not the teen this allowance belongs to.
    #[error("only the designated teen can spend from this allowance")]
    WrongPayer,

    /// The allowance leg was presented outside a three-leg group.
    #[error("purchase group must contain exactly {expected} legs, found {found}")]
    BadGroupSize {
        /// Required group size.
        expected: usize,
        /// Size of the group actually presented.
        found: usize,
    },

    /// The allowance leg sits at the wrong position within the group.
    #[error("allowance leg must occupy group position {expected}, found {found}")]
    BadGroupPosition {
        /// Required leg index.
        expected: usize,
        /// Index the leg actually occupies.
        found: usize,
    },

    /// A single purchase may not exceed one full week's allowance.
    #[error("purchase of {amount} exceeds the weekly allowance of {weekly_amount}")]
    ExceedsWeeklyAllowance {
        /// Requested purchase amount.
        amount: u64,
        /// Configured weekly allowance ceiling.
        weekly_amount: u64,
    },
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Outcome of a savings-lock request.
///
/// A decline is a normal result, not an error: it means a previous lock is
/// still live and the account holds at most one lock at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockOutcome {
    /// The new lock is in place.
    Accepted,
    /// A prior lock has not expired; the existing lock is untouched.
    Declined,
}

impl LockOutcome {
    /// True if the lock was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, LockOutcome::Accepted)
    }
}

/// The allowance record for one guardian/teen relationship.
///
/// Created once at relationship setup and never deleted; guardianship can
/// be reassigned via [`transfer_control`](Self::transfer_control) without
/// resetting history. All amounts are in cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowanceAccount {
    /// Identity of the controlling guardian.
    pub parent: String,
    /// Identity of the spender. Also the account's stable storage key.
    pub teen: String,
    /// Amount issued by each weekly allowance, in cents.
    pub weekly_amount: u64,
    /// Timestamp of the last weekly issuance. Only ever advances.
    pub last_allowance_time: u64,
    /// Lifetime total of issued allowance (weekly + emergency). Monotonic.
    pub total_issued: u64,
    /// When true, issuance and purchases are suspended.
    pub is_paused: bool,
    /// Amount currently held in the savings timelock (0 = no lock).
    pub savings_locked: u64,
    /// Timestamp at which the savings lock expires (0 = no lock).
    pub savings_unlock_time: u64,
    /// Timestamp the relationship was created.
    pub created_at: u64,
}

impl AllowanceAccount {
    /// Opens a new, active allowance account.
    ///
    /// The weekly cadence starts counting from `now`: the first issuance
    /// becomes available one full week after creation.
    pub fn new(
        parent: impl Into<String>,
        teen: impl Into<String>,
        weekly_amount: u64,
        now: u64,
    ) -> Self {
        Self {
            parent: parent.into(),
            teen: teen.into(),
            weekly_amount,
            last_allowance_time: now,
            total_issued: 0,
            is_paused: false,
            savings_locked: 0,
            savings_unlock_time: 0,
            created_at: now,
        }
    }

    // -- Issuance -----------------------------------------------------------

    /// Issues the weekly allowance if the cadence has elapsed.
    ///
    /// On success, advances `last_allowance_time` to `now` and adds the
    /// weekly amount to `total_issued`, returning the issued amount.
    ///
    /// # Errors
    ///
    /// [`AllowanceError::Paused`] while paused,
    /// [`AllowanceError::TooEarly`] before a full week has elapsed.
    pub fn issue_weekly(&mut self, now: u64) -> Result<u64, AllowanceError> {
        if self.is_paused {
            return Err(AllowanceError::Paused);
        }
        let eligible_at = self.last_allowance_time.saturating_add(WEEK_SECONDS);
        if now < eligible_at {
            return Err(AllowanceError::TooEarly { eligible_at });
        }

        self.last_allowance_time = now;
        self.total_issued = self.total_issued.saturating_add(self.weekly_amount);
        Ok(self.weekly_amount)
    }

    /// Issues an out-of-cadence emergency allowance (guardian override).
    ///
    /// Bypasses the weekly timer entirely by design — `last_allowance_time`
    /// is untouched, so the regular cadence is unaffected.
    ///
    /// # Errors
    ///
    /// [`AllowanceError::Paused`] while paused,
    /// [`AllowanceError::ZeroAmount`] for a zero amount.
    pub fn issue_emergency(&mut self, amount: u64) -> Result<u64, AllowanceError> {
        if self.is_paused {
            return Err(AllowanceError::Paused);
        }
        if amount == 0 {
            return Err(AllowanceError::ZeroAmount);
        }

        self.total_issued = self.total_issued.saturating_add(amount);
        Ok(amount)
    }

    /// True if [`issue_weekly`](Self::issue_weekly) would succeed at `now`.
    pub fn can_issue_weekly(&self, now: u64) -> bool {
        !self.is_paused && now >= self.last_allowance_time.saturating_add(WEEK_SECONDS)
    }

    // -- Pause switch -------------------------------------------------------

    /// Suspends issuance and purchases. Idempotent.
    pub fn pause(&mut self) {
        self.is_paused = true;
    }

    /// Lifts a pause, restoring the pre-pause cadence fields exactly.
    /// Idempotent.
    pub fn resume(&mut self) {
        self.is_paused = false;
    }

    /// Updates the weekly allowance amount.
    ///
    /// # Errors
    ///
    /// [`AllowanceError::ZeroAmount`] for a zero amount.
    pub fn set_weekly_amount(&mut self, new_amount: u64) -> Result<(), AllowanceError> {
        if new_amount == 0 {
            return Err(AllowanceError::ZeroAmount);
        }
        self.weekly_amount = new_amount;
        Ok(())
    }

    // -- Savings timelock ---------------------------------------------------

    /// Locks `amount` until `unlock_time`.
    ///
    /// At most one lock is outstanding at a time. An expired prior lock is
    /// implicitly released and replaced; a still-live prior lock causes a
    /// [`LockOutcome::Declined`] result that leaves the existing lock
    /// untouched.
    ///
    /// # Errors
    ///
    /// [`AllowanceError::ZeroAmount`] for a zero amount,
    /// [`AllowanceError::UnlockNotInFuture`] when `unlock_time <= now`.
    pub fn lock_savings(
        &mut self,
        amount: u64,
        unlock_time: u64,
        now: u64,
    ) -> Result<LockOutcome, AllowanceError> {
        if amount == 0 {
            return Err(AllowanceError::ZeroAmount);
        }
        if unlock_time <= now {
            return Err(AllowanceError::UnlockNotInFuture);
        }

        if self.savings_locked > 0 {
            if now >= self.savings_unlock_time {
                // Expired lock: implicitly released, replaced below.
                self.savings_locked = 0;
                self.savings_unlock_time = 0;
            } else {
                return Ok(LockOutcome::Declined);
            }
        }

        self.savings_locked = amount;
        self.savings_unlock_time = unlock_time;
        Ok(LockOutcome::Accepted)
    }

    /// Releases the savings lock once its timelock has expired, returning
    /// the unlocked amount and zeroing both lock fields.
    ///
    /// # Errors
    ///
    /// [`AllowanceError::NothingLocked`] with no outstanding lock,
    /// [`AllowanceError::StillLocked`] before the unlock time.
    pub fn unlock_savings(&mut self, now: u64) -> Result<u64, AllowanceError> {
        if self.savings_locked == 0 {
            return Err(AllowanceError::NothingLocked);
        }
        if now < self.savings_unlock_time {
            return Err(AllowanceError::StillLocked {
                unlock_time: self.savings_unlock_time,
            });
        }

        let unlocked = self.savings_locked;
        self.savings_locked = 0;
        self.savings_unlock_time = 0;
        Ok(unlocked)
    }

    /// True if [`unlock_savings`](Self::unlock_savings) would succeed at `now`.
    pub fn can_unlock_savings(&self, now: u64) -> bool {
        self.savings_locked > 0 && now >= self.savings_unlock_time
    }

    // -- Control ------------------------------------------------------------

    /// Reassigns guardianship to a new parent identity.
    ///
    /// All history — `total_issued`, cadence timestamps, any savings lock —
    /// is retained.
    pub fn transfer_control(&mut self, new_parent: impl Into<String>) {
        self.parent = new_parent.into();
    }

    // -- Atomic purchase leg ------------------------------------------------

    /// Validates this account's leg of an atomic purchase group.
    ///
    /// Checks, in order: the allowance is not paused; the group sender is
    /// the teen; the group holds exactly
    /// [`PURCHASE_GROUP_SIZE`] legs; this leg sits at
    /// [`ALLOWANCE_LEG_INDEX`]; and the amount does not exceed one full
    /// week's allowance, regardless of any merchant daily limit.
    ///
    /// Read-only: the allowance leg enforces, it does not meter. Spend
    /// accounting lives in the attestation ledger.
    pub fn authorize_purchase(
        &self,
        ctx: &GroupContext,
        amount: u64,
    ) -> Result<(), AllowanceError> {
        if self.is_paused {
            return Err(AllowanceError::Paused);
        }
        if ctx.sender != self.teen {
            return Err(AllowanceError::WrongPayer);
        }
        if ctx.group_size != PURCHASE_GROUP_SIZE {
            return Err(AllowanceError::BadGroupSize {
                expected: PURCHASE_GROUP_SIZE,
                found: ctx.group_size,
            });
        }
        if ctx.leg_index != ALLOWANCE_LEG_INDEX {
            return Err(AllowanceError::BadGroupPosition {
                expected: ALLOWANCE_LEG_INDEX,
                found: ctx.leg_index,
            });
        }
        if amount > self.weekly_amount {
            return Err(AllowanceError::ExceedsWeeklyAllowance {
                amount,
                weekly_amount: self.weekly_amount,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_000;

    fn account() -> AllowanceAccount {
        AllowanceAccount::new("parent", "teen", 150_00, T0)
    }

    #[test]
    fn new_account_is_active_with_zero_history() {
        let acct = account();
        assert!(!acct.is_paused);
        assert_eq!(acct.total_issued, 0);
        assert_eq!(acct.savings_locked, 0);
        assert_eq!(acct.last_allowance_time, T0);
    }

    #[test]
    fn weekly_issuance_one_second_early_is_too_early() {
        let mut acct = account();
        let err = acct.issue_weekly(T0 + WEEK_SECONDS - 1).unwrap_err();
        assert_eq!(
            err,
            AllowanceError::TooEarly {
                eligible_at: T0 + WEEK_SECONDS
            }
        );
        assert_eq!(acct.total_issued, 0);
    }

    #[test]
    fn weekly_issuance_on_the_boundary_succeeds() {
        let mut acct = account();
        let issued = acct.issue_weekly(T0 + WEEK_SECONDS).unwrap();
        assert_eq!(issued, 150_00);
        assert_eq!(acct.total_issued, 150_00);
        assert_eq!(acct.last_allowance_time, T0 + WEEK_SECONDS);
    }

    #[test]
    fn weekly_issuance_while_paused_is_rejected() {
        let mut acct = account();
        acct.pause();
        assert_eq!(
            acct.issue_weekly(T0 + WEEK_SECONDS),
            Err(AllowanceError::Paused)
        );
    }

    #[test]
    fn emergency_issuance_bypasses_the_cadence() {
        let mut acct = account();
        let issued = acct.issue_emergency(20_00).unwrap();
        assert_eq!(issued, 20_00);
        assert_eq!(acct.total_issued, 20_00);
        // The weekly timer is untouched.
        assert_eq!(acct.last_allowance_time, T0);
    }

    #[test]
    fn emergency_issuance_rejects_zero_and_paused() {
        let mut acct = account();
        assert_eq!(acct.issue_emergency(0), Err(AllowanceError::ZeroAmount));
        acct.pause();
        assert_eq!(acct.issue_emergency(10_00), Err(AllowanceError::Paused));
    }

    #[test]
    fn pause_is_idempotent_and_resume_restores_cadence() {
        let mut acct = account();
        let before = acct.clone();

        acct.pause();
        acct.pause();
        assert!(acct.is_paused);

        acct.resume();
        assert!(!acct.is_paused);
        // Everything except the pause flag matches the pre-pause state.
        assert_eq!(acct, before);
    }

    #[test]
    fn set_weekly_amount_rejects_zero() {
        let mut acct = account();
        assert_eq!(acct.set_weekly_amount(0), Err(AllowanceError::ZeroAmount));
        acct.set_weekly_amount(200_00).unwrap();
        assert_eq!(acct.weekly_amount, 200_00);
    }

    #[test]
    fn lock_then_unlock_after_expiry() {
        let mut acct = account();
        assert_eq!(
            acct.lock_savings(100_00, T0 + 1_000, T0).unwrap(),
            LockOutcome::Accepted
        );

        assert_eq!(
            acct.unlock_savings(T0 + 500),
            Err(AllowanceError::StillLocked {
                unlock_time: T0 + 1_000
            })
        );

        let unlocked = acct.unlock_savings(T0 + 1_000).unwrap();
        assert_eq!(unlocked, 100_00);
        assert_eq!(acct.savings_locked, 0);
        assert_eq!(acct.savings_unlock_time, 0);
    }

    #[test]
    fn second_lock_before_expiry_is_declined() {
        let mut acct = account();
        acct.lock_savings(100_00, T0 + 1_000, T0).unwrap();

        let outcome = acct.lock_savings(50_00, T0 + 2_000, T0 + 500).unwrap();
        assert_eq!(outcome, LockOutcome::Declined);
        // Original lock untouched.
        assert_eq!(acct.savings_locked, 100_00);
        assert_eq!(acct.savings_unlock_time, T0 + 1_000);
    }

    #[test]
    fn expired_lock_is_replaced_by_a_new_one() {
        let mut acct = account();
        acct.lock_savings(100_00, T0 + 1_000, T0).unwrap();

        let outcome = acct.lock_savings(50_00, T0 + 5_000, T0 + 1_000).unwrap();
        assert_eq!(outcome, LockOutcome::Accepted);
        assert_eq!(acct.savings_locked, 50_00);
        assert_eq!(acct.savings_unlock_time, T0 + 5_000);
    }

    #[test]
    fn lock_preconditions() {
        let mut acct = account();
        assert_eq!(
            acct.lock_savings(0, T0 + 100, T0),
            Err(AllowanceError::ZeroAmount)
        );
        assert_eq!(
            acct.lock_savings(10_00, T0, T0),
            Err(AllowanceError::UnlockNotInFuture)
        );
    }

    #[test]
    fn unlock_with_nothing_locked() {
        let mut acct = account();
        assert_eq!(acct.unlock_savings(T0), Err(AllowanceError::NothingLocked));
    }

    #[test]
    fn transfer_control_retains_history() {
        let mut acct = account();
        acct.issue_emergency(30_00).unwrap();
        acct.transfer_control("step_parent");

        assert_eq!(acct.parent, "step_parent");
        assert_eq!(acct.total_issued, 30_00);
        assert_eq!(acct.created_at, T0);
    }

    #[test]
    fn purchase_leg_happy_path() {
        let acct = account();
        let ctx = GroupContext::purchase_leg("teen", ALLOWANCE_LEG_INDEX);
        assert!(acct.authorize_purchase(&ctx, 150_00).is_ok());
    }

    #[test]
    fn purchase_leg_rejects_wrong_payer() {
        let acct = account();
        let ctx = GroupContext::purchase_leg("somebody_else", ALLOWANCE_LEG_INDEX);
        assert_eq!(
            acct.authorize_purchase(&ctx, 1),
            Err(AllowanceError::WrongPayer)
        );
    }

    #[test]
    fn purchase_leg_rejects_malformed_groups() {
        let acct = account();

        let undersized = GroupContext {
            sender: "teen".into(),
            group_size: 1,
            leg_index: 0,
        };
        assert_eq!(
            acct.authorize_purchase(&undersized, 1),
            Err(AllowanceError::BadGroupSize {
                expected: 3,
                found: 1
            })
        );

        let misplaced = GroupContext::purchase_leg("teen", 2);
        assert_eq!(
            acct.authorize_purchase(&misplaced, 1),
            Err(AllowanceError::BadGroupPosition {
                expected: 1,
                found: 2
            })
        );
    }

    #[test]
    fn purchase_leg_enforces_weekly_ceiling() {
        let acct = account();
        let ctx = GroupContext::purchase_leg("teen", ALLOWANCE_LEG_INDEX);
        assert_eq!(
            acct.authorize_purchase(&ctx, 150_01),
            Err(AllowanceError::ExceedsWeeklyAllowance {
                amount: 150_01,
                weekly_amount: 150_00
            })
        );
    }

    #[test]
    fn purchase_leg_rejected_while_paused() {
        let mut acct = account();
        acct.pause();
        let ctx = GroupContext::purchase_leg("teen", ALLOWANCE_LEG_INDEX);
        assert_eq!(
            acct.authorize_purchase(&ctx, 1),
            Err(AllowanceError::Paused)
        );
    }
}
