//! # Guardian Service — Allowance Management
//!
//! The service wrapper around the allowance state machine. This is where
//! caller authentication lives: guardian-only operations (issuance, pause,
//! transfer) check the caller against the account's parent, teen-only
//! operations (savings locks) check against the teen. The machine itself
//! never sees an unauthenticated intent.
//!
//! Accounts are keyed by teen identity in storage, so a guardianship
//! transfer is a plain value update.

use std::sync::Arc;
use tracing::{info, warn};

use lumen_contracts::allowance::{AllowanceAccount, AllowanceError, LockOutcome};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::config::MAX_EMERGENCY_ISSUANCE;
use crate::storage::{SpendDb, StoreError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of the allowance service.
///
/// `Account` wraps the state machine's own rejections (paused, too early,
/// still locked, ...) unchanged, so callers can match on the underlying
/// kind.
#[derive(Debug, Error)]
pub enum AllowanceServiceError {
    #[error("no allowance relationship for teen: {0}")]
    NotFound(String),

    #[error("an allowance relationship already exists for teen: {0}")]
    AlreadyExists(String),

    #[error("caller {caller} is not authorized to {action} this allowance")]
    NotAuthorized {
        caller: String,
        action: &'static str,
    },

    #[error("emergency issuance of {amount} exceeds the cap of {max}")]
    EmergencyTooLarge { amount: u64, max: u64 },

    #[error(transparent)]
    Account(#[from] AllowanceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Read model
// ---------------------------------------------------------------------------

/// Status view of one allowance relationship as of now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowanceStatus {
    pub account: AllowanceAccount,
    /// True if a weekly issuance would succeed right now.
    pub weekly_due: bool,
    /// True if the savings lock (if any) can be released right now.
    pub savings_unlockable: bool,
}

// ---------------------------------------------------------------------------
// AllowanceService
// ---------------------------------------------------------------------------

/// The allowance management service.
///
/// Cheap to clone; clones share the same database and clock.
#[derive(Clone)]
pub struct AllowanceService {
    db: SpendDb,
    clock: Arc<dyn Clock>,
}

impl AllowanceService {
    pub fn new(db: SpendDb, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    // -- Relationship lifecycle ---------------------------------------------

    /// Sets up a new guardian/teen relationship.
    ///
    /// The weekly cadence starts from now; the first issuance is due one
    /// week after creation.
    pub fn create_relationship(
        &self,
        parent: &str,
        teen: &str,
        weekly_amount: u64,
    ) -> Result<AllowanceAccount, AllowanceServiceError> {
        if self.db.get_allowance(teen)?.is_some() {
            return Err(AllowanceServiceError::AlreadyExists(teen.to_string()));
        }

        let account = AllowanceAccount::new(parent, teen, weekly_amount, self.clock.now());
        self.db.put_allowance(&account)?;
        info!(parent, teen, weekly_amount, "allowance relationship created");
        Ok(account)
    }

    /// Reassigns guardianship. Only the current parent may do this.
    pub fn transfer_control(
        &self,
        caller: &str,
        teen: &str,
        new_parent: &str,
    ) -> Result<AllowanceAccount, AllowanceServiceError> {
        self.as_parent(caller, teen, "transfer control of", |account| {
            account.transfer_control(new_parent);
            Ok(())
        })
        .inspect(|_| info!(teen, new_parent, "guardianship transferred"))
    }

    // -- Issuance -----------------------------------------------------------

    /// Issues the weekly allowance. Parent-only; the machine enforces the
    /// cadence.
    pub fn issue_weekly(&self, caller: &str, teen: &str) -> Result<u64, AllowanceServiceError> {
        let now = self.clock.now();
        let mut issued = 0;
        self.as_parent(caller, teen, "issue allowance for", |account| {
            issued = account.issue_weekly(now)?;
            Ok(())
        })?;
        info!(teen, amount = issued, "weekly allowance issued");
        Ok(issued)
    }

    /// Issues an emergency allowance outside the cadence. Parent-only,
    /// capped at [`MAX_EMERGENCY_ISSUANCE`].
    pub fn issue_emergency(
        &self,
        caller: &str,
        teen: &str,
        amount: u64,
    ) -> Result<u64, AllowanceServiceError> {
        if amount > MAX_EMERGENCY_ISSUANCE {
            return Err(AllowanceServiceError::EmergencyTooLarge {
                amount,
                max: MAX_EMERGENCY_ISSUANCE,
            });
        }

        self.as_parent(caller, teen, "issue emergency funds for", |account| {
            account.issue_emergency(amount)?;
            Ok(())
        })?;
        warn!(teen, amount, "emergency allowance issued");
        Ok(amount)
    }

    /// Updates the weekly amount. Parent-only; applies from the next
    /// issuance.
    pub fn set_weekly_amount(
        &self,
        caller: &str,
        teen: &str,
        amount: u64,
    ) -> Result<AllowanceAccount, AllowanceServiceError> {
        self.as_parent(caller, teen, "reconfigure", |account| {
            account.set_weekly_amount(amount)?;
            Ok(())
        })
    }

    // -- Pause switch -------------------------------------------------------

    /// Suspends issuance and purchases. Parent-only, idempotent.
    pub fn pause(&self, caller: &str, teen: &str) -> Result<AllowanceAccount, AllowanceServiceError> {
        self.as_parent(caller, teen, "pause", |account| {
            account.pause();
            Ok(())
        })
        .inspect(|_| info!(teen, "allowance paused"))
    }

    /// Lifts a pause. Parent-only, idempotent.
    pub fn resume(&self, caller: &str, teen: &str) -> Result<AllowanceAccount, AllowanceServiceError> {
        self.as_parent(caller, teen, "resume", |account| {
            account.resume();
            Ok(())
        })
        .inspect(|_| info!(teen, "allowance resumed"))
    }

    // -- Savings ------------------------------------------------------------

    /// Locks savings until `unlock_time`. Teen-only; at most one lock is
    /// outstanding, and a still-live lock yields a decline rather than an
    /// error.
    pub fn lock_savings(
        &self,
        caller: &str,
        teen: &str,
        amount: u64,
        unlock_time: u64,
    ) -> Result<LockOutcome, AllowanceServiceError> {
        let now = self.clock.now();
        let mut outcome = LockOutcome::Declined;
        self.as_teen(caller, teen, "lock savings in", |account| {
            outcome = account.lock_savings(amount, unlock_time, now)?;
            Ok(())
        })?;
        info!(teen, amount, unlock_time, accepted = outcome.is_accepted(), "savings lock requested");
        Ok(outcome)
    }

    /// Releases an expired savings lock, returning the amount. Teen-only.
    pub fn unlock_savings(&self, caller: &str, teen: &str) -> Result<u64, AllowanceServiceError> {
        let now = self.clock.now();
        let mut unlocked = 0;
        self.as_teen(caller, teen, "unlock savings in", |account| {
            unlocked = account.unlock_savings(now)?;
            Ok(())
        })?;
        info!(teen, amount = unlocked, "savings unlocked");
        Ok(unlocked)
    }

    // -- Reads --------------------------------------------------------------

    /// The raw allowance account for a teen.
    pub fn get_account(&self, teen: &str) -> Result<AllowanceAccount, AllowanceServiceError> {
        self.db
            .get_allowance(teen)?
            .ok_or_else(|| AllowanceServiceError::NotFound(teen.to_string()))
    }

    /// The account plus its time-dependent probes, as of now.
    pub fn status(&self, teen: &str) -> Result<AllowanceStatus, AllowanceServiceError> {
        let account = self.get_account(teen)?;
        let now = self.clock.now();
        Ok(AllowanceStatus {
            weekly_due: account.can_issue_weekly(now),
            savings_unlockable: account.can_unlock_savings(now),
            account,
        })
    }

    /// All allowance relationships on file.
    pub fn list_accounts(&self) -> Result<Vec<AllowanceAccount>, AllowanceServiceError> {
        Ok(self.db.list_allowances()?)
    }

    // -- Internals ----------------------------------------------------------

    /// Load, check the caller is the parent, mutate, persist.
    fn as_parent(
        &self,
        caller: &str,
        teen: &str,
        action: &'static str,
        apply: impl FnOnce(&mut AllowanceAccount) -> Result<(), AllowanceServiceError>,
    ) -> Result<AllowanceAccount, AllowanceServiceError> {
        let mut account = self.get_account(teen)?;
        if account.parent != caller {
            return Err(AllowanceServiceError::NotAuthorized {
                caller: caller.to_string(),
                action,
            });
        }
        apply(&mut account)?;
        self.db.put_allowance(&account)?;
        Ok(account)
    }

    /// Load, check the caller is the teen, mutate, persist.
    fn as_teen(
        &self,
        caller: &str,
        teen: &str,
        action: &'static str,
        apply: impl FnOnce(&mut AllowanceAccount) -> Result<(), AllowanceServiceError>,
    ) -> Result<AllowanceAccount, AllowanceServiceError> {
        let mut account = self.get_account(teen)?;
        if account.teen != caller {
            return Err(AllowanceServiceError::NotAuthorized {
                caller: caller.to_string(),
                action,
            });
        }
        apply(&mut account)?;
        self.db.put_allowance(&account)?;
        Ok(account)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
