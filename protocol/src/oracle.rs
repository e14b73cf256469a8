//! # Attestation Oracle — Merchant Ledger Service
//!
//! The service wrapper around the merchant attestation machine. It owns
//! the persistence and the clock; the decision logic itself lives in
//! `lumen_contracts::attestation` and is never duplicated here.
//!
//! Responsibilities:
//!
//! - attesting merchants (upserts — a re-attestation replaces the record
//!   and zeroes the spend meter)
//! - flipping platform/guardian approval and tuning daily limits
//! - authorizing spends, with every check counted in the lifetime
//!   verification tally
//! - read-side analytics for dashboards

use std::sync::Arc;
use tracing::{debug, info};

use lumen_contracts::attestation::{CategoryPolicy, Decision, DenialReason, MerchantRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::storage::{SpendDb, StoreError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of the attestation ledger itself.
///
/// Note what is *not* here: a denied spend. Denials are [`Decision`]
/// values — policy working as intended. `LedgerError` means the caller
/// named a merchant that doesn't exist for an operation that requires one,
/// or the store broke.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("merchant not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Read models
// ---------------------------------------------------------------------------

/// Dashboard view of one merchant's spending posture at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantAnalytics {
    pub name: String,
    pub category: String,
    pub platform_approved: bool,
    pub guardian_approved: bool,
    pub daily_limit: u64,
    /// Spend counted against today's limit, rollover-aware.
    pub spent_today: u64,
    /// Headroom left under today's limit.
    pub remaining_today: u64,
    /// `spent_today / daily_limit` as a percentage, two decimals.
    pub daily_usage_percent: f64,
}

/// Ledger-wide counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LedgerStats {
    /// Distinct merchants ever attested.
    pub total_merchants: u64,
    /// Verification checks performed over the ledger's lifetime.
    pub total_verifications: u64,
}

// ---------------------------------------------------------------------------
// AttestationLedger
// ---------------------------------------------------------------------------

/// The merchant attestation ledger.
///
/// Cheap to clone; clones share the same database and clock.
#[derive(Clone)]
pub struct AttestationLedger {
    db: SpendDb,
    clock: Arc<dyn Clock>,
    policy: CategoryPolicy,
}

impl AttestationLedger {
    /// Creates a ledger over the given store with the stock category policy.
    pub fn new(db: SpendDb, clock: Arc<dyn Clock>) -> Self {
        Self::with_policy(db, clock, CategoryPolicy::default())
    }

    /// Creates a ledger with an explicit category policy.
    pub fn with_policy(db: SpendDb, clock: Arc<dyn Clock>, policy: CategoryPolicy) -> Self {
        Self { db, clock, policy }
    }

    /// The category policy this ledger enforces.
    pub fn policy(&self) -> &CategoryPolicy {
        &self.policy
    }

    // -- Attestation --------------------------------------------------------

    /// Attests (or re-attests) a merchant.
    ///
    /// An upsert: re-attesting an existing name replaces the whole record,
    /// which zeroes the spend meter. That is the intended escape hatch for
    /// a merchant whose meter was poisoned by a disputed charge.
    pub fn attest_merchant(
        &self,
        name: &str,
        category: &str,
        platform_approved: bool,
        guardian_approved: bool,
        daily_limit: u64,
        settlement_address: Option<String>,
    ) -> Result<MerchantRecord, LedgerError> {
        let now = self.clock.now();
        let mut record =
            MerchantRecord::new(name, category, platform_approved, guardian_approved, daily_limit, now);
        record.settlement_address = settlement_address;

        let is_new = self.db.put_merchant(&record)?;
        info!(
            merchant = name,
            category,
            daily_limit,
            is_new,
            "merchant attested"
        );
        Ok(record)
    }

    /// Updates a merchant's daily spending limit.
    pub fn set_daily_limit(&self, name: &str, daily_limit: u64) -> Result<MerchantRecord, LedgerError> {
        self.update(name, |record| {
            record.daily_limit = daily_limit;
        })
    }

    /// Updates the daily limit and the platform approval flag in one step.
    ///
    /// The spend meter is untouched: a raised limit does not restore spend
    /// already counted, and a lowered limit can leave `spent_today` above
    /// the new ceiling, blocking further spend until the next day.
    pub fn set_limits(
        &self,
        name: &str,
        daily_limit: u64,
        platform_approved: bool,
    ) -> Result<MerchantRecord, LedgerError> {
        self.update(name, |record| {
            record.daily_limit = daily_limit;
            record.platform_approved = platform_approved;
        })
    }

    /// Flips the platform-side approval flag.
    pub fn set_platform_approval(&self, name: &str, approved: bool) -> Result<MerchantRecord, LedgerError> {
        self.update(name, |record| {
            record.platform_approved = approved;
        })
    }

    /// Flips the guardian-side approval flag.
    pub fn set_guardian_approval(&self, name: &str, approved: bool) -> Result<MerchantRecord, LedgerError> {
        self.update(name, |record| {
            record.guardian_approved = approved;
        })
    }

    /// Sets or clears the merchant's settlement address.
    pub fn set_settlement_address(
        &self,
        name: &str,
        address: Option<String>,
    ) -> Result<MerchantRecord, LedgerError> {
        self.update(name, |record| {
            record.settlement_address = address;
        })
    }

    fn update(
        &self,
        name: &str,
        apply: impl FnOnce(&mut MerchantRecord),
    ) -> Result<MerchantRecord, LedgerError> {
        let mut record = self
            .db
            .get_merchant(name)?
            .ok_or_else(|| LedgerError::NotFound(name.to_string()))?;
        apply(&mut record);
        record.last_update = self.clock.now();
        self.db.put_merchant(&record)?;
        debug!(merchant = name, "merchant record updated");
        Ok(record)
    }

    // -- Verification -------------------------------------------------------

    /// Checks a spend without committing it.
    ///
    /// Counts toward the lifetime verification tally but never mutates the
    /// merchant record — this is the read-only leg used during purchase
    /// assembly. `at` is the evaluation timestamp; `None` reads the clock.
    pub fn verify_spend(
        &self,
        name: &str,
        amount: u64,
        at: Option<u64>,
    ) -> Result<Decision, LedgerError> {
        self.db.record_verification()?;
        let now = at.unwrap_or_else(|| self.clock.now());

        let decision = match self.db.get_merchant(name)? {
            Some(record) => record.evaluate_spend(amount, now, &self.policy),
            None => Decision::Denied(DenialReason::MerchantNotFound),
        };
        debug!(merchant = name, amount, %decision, "spend verified");
        Ok(decision)
    }

    /// Authorizes a spend, committing it to the merchant's meter on
    /// approval. `at` is the authorization timestamp; `None` reads the
    /// clock.
    ///
    /// A denial leaves the record exactly as it was, including across day
    /// boundaries: the rollover reset is only persisted by an approval.
    pub fn authorize_spend(
        &self,
        name: &str,
        amount: u64,
        at: Option<u64>,
    ) -> Result<Decision, LedgerError> {
        self.db.record_verification()?;
        let now = at.unwrap_or_else(|| self.clock.now());

        let Some(mut record) = self.db.get_merchant(name)? else {
            debug!(merchant = name, amount, "spend denied: unknown merchant");
            return Ok(Decision::Denied(DenialReason::MerchantNotFound));
        };

        let decision = record.authorize_spend(amount, now, &self.policy);
        if decision.is_approved() {
            self.db.put_merchant(&record)?;
            info!(
                merchant = name,
                amount,
                spent_today = record.spent_today,
                "spend authorized"
            );
        } else {
            debug!(merchant = name, amount, %decision, "spend denied");
        }
        Ok(decision)
    }

    // -- Reads --------------------------------------------------------------

    /// Looks up a merchant attestation.
    pub fn get_merchant(&self, name: &str) -> Result<MerchantRecord, LedgerError> {
        self.db
            .get_merchant(name)?
            .ok_or_else(|| LedgerError::NotFound(name.to_string()))
    }

    /// All attested merchants, name-ordered.
    pub fn list_merchants(&self) -> Result<Vec<MerchantRecord>, LedgerError> {
        Ok(self.db.list_merchants()?)
    }

    /// Spending analytics for one merchant as of now.
    pub fn merchant_analytics(&self, name: &str) -> Result<MerchantAnalytics, LedgerError> {
        let record = self.get_merchant(name)?;
        let now = self.clock.now();

        let spent_today = record.effective_spent(now);
        let remaining_today = record.daily_limit.saturating_sub(spent_today);
        let daily_usage_percent = if record.daily_limit == 0 {
            0.0
        } else {
            let percent = spent_today as f64 / record.daily_limit as f64 * 100.0;
            (percent * 100.0).round() / 100.0
        };

        Ok(MerchantAnalytics {
            name: record.name,
            category: record.category,
            platform_approved: record.platform_approved,
            guardian_approved: record.guardian_approved,
            daily_limit: record.daily_limit,
            spent_today,
            remaining_today,
            daily_usage_percent,
        })
    }

    /// Ledger-wide counters.
    pub fn stats(&self) -> Result<LedgerStats, LedgerError> {
        Ok(LedgerStats {
            total_merchants: self.db.total_merchants()?,
            total_verifications: self.db.total_verifications()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use lumen_contracts::attestation::SECONDS_PER_DAY;

    const NOW: u64 = 1_750_000_000;

    fn ledger() -> (AttestationLedger, ManualClock) {
        let clock = ManualClock::at(NOW);
        let db = SpendDb::open_temporary().unwrap();
        (AttestationLedger::new(db, Arc::new(clock.clone())), clock)
    }

    fn attest(ledger: &AttestationLedger, name: &str) -> MerchantRecord {
        ledger
            .attest_merchant(name, "Food", true, true, 50_00, None)
            .unwrap()
    }

    #[test]
    fn attest_then_authorize_within_limit() {
        let (ledger, _clock) = ledger();
        attest(&ledger, "Coffee Shop");

        let decision = ledger.authorize_spend("Coffee Shop", 30_00, None).unwrap();
        assert!(decision.is_approved());

        let record = ledger.get_merchant("Coffee Shop").unwrap();
        assert_eq!(record.spent_today, 30_00);
    }

    #[test]
    fn unknown_merchant_denies_rather_than_errors() {
        let (ledger, _clock) = ledger();
        let decision = ledger.authorize_spend("Nowhere", 1, None).unwrap();
        assert_eq!(decision.denial(), Some(DenialReason::MerchantNotFound));
    }

    #[test]
    fn reattestation_zeroes_the_meter() {
        let (ledger, _clock) = ledger();
        attest(&ledger, "Coffee Shop");
        ledger.authorize_spend("Coffee Shop", 50_00, None).unwrap();

        attest(&ledger, "Coffee Shop");
        let record = ledger.get_merchant("Coffee Shop").unwrap();
        assert_eq!(record.spent_today, 0);
        // Still only one distinct merchant in the lifetime tally.
        assert_eq!(ledger.stats().unwrap().total_merchants, 1);
    }

    #[test]
    fn verify_counts_but_does_not_commit() {
        let (ledger, _clock) = ledger();
        attest(&ledger, "Coffee Shop");

        let decision = ledger.verify_spend("Coffee Shop", 30_00, None).unwrap();
        assert!(decision.is_approved());

        let record = ledger.get_merchant("Coffee Shop").unwrap();
        assert_eq!(record.spent_today, 0);
        assert_eq!(ledger.stats().unwrap().total_verifications, 1);
    }

    #[test]
    fn guardian_revocation_applies_immediately() {
        let (ledger, _clock) = ledger();
        attest(&ledger, "Coffee Shop");
        ledger.set_guardian_approval("Coffee Shop", false).unwrap();

        let decision = ledger.authorize_spend("Coffee Shop", 1, None).unwrap();
        assert_eq!(decision.denial(), Some(DenialReason::GuardianNotApproved));
    }

    #[test]
    fn limit_update_applies_to_the_current_meter() {
        let (ledger, _clock) = ledger();
        attest(&ledger, "Coffee Shop");
        ledger.authorize_spend("Coffee Shop", 50_00, None).unwrap();

        // Raise the limit; the committed spend stays on the meter.
        ledger.set_daily_limit("Coffee Shop", 80_00).unwrap();
        assert!(ledger
            .authorize_spend("Coffee Shop", 30_00, None)
            .unwrap()
            .is_approved());
        assert!(!ledger
            .authorize_spend("Coffee Shop", 1, None)
            .unwrap()
            .is_approved());
    }

    #[test]
    fn rollover_across_the_day_boundary() {
        let (ledger, clock) = ledger();
        attest(&ledger, "Coffee Shop");
        ledger.authorize_spend("Coffee Shop", 50_00, None).unwrap();

        clock.advance(SECONDS_PER_DAY);
        assert!(ledger
            .authorize_spend("Coffee Shop", 50_00, None)
            .unwrap()
            .is_approved());
    }

    #[test]
    fn update_on_missing_merchant_is_not_found() {
        let (ledger, _clock) = ledger();
        let err = ledger.set_daily_limit("Nowhere", 1).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(name) if name == "Nowhere"));
    }

    #[test]
    fn analytics_reflect_the_rollover_without_committing_it() {
        let (ledger, clock) = ledger();
        attest(&ledger, "Coffee Shop");
        ledger.authorize_spend("Coffee Shop", 25_00, None).unwrap();

        let analytics = ledger.merchant_analytics("Coffee Shop").unwrap();
        assert_eq!(analytics.spent_today, 25_00);
        assert_eq!(analytics.remaining_today, 25_00);
        assert_eq!(analytics.daily_usage_percent, 50.0);

        clock.advance(SECONDS_PER_DAY);
        let analytics = ledger.merchant_analytics("Coffee Shop").unwrap();
        assert_eq!(analytics.spent_today, 0);
        assert_eq!(analytics.daily_usage_percent, 0.0);
        // The stored record still carries yesterday's meter.
        let record = ledger.get_merchant("Coffee Shop").unwrap();
        assert_eq!(record.spent_today, 25_00);
    }

    #[test]
    fn explicit_timestamp_overrides_the_clock() {
        let (ledger, _clock) = ledger();
        attest(&ledger, "Coffee Shop");
        ledger.authorize_spend("Coffee Shop", 50_00, None).unwrap();

        // The clock still reads NOW, but the caller's timestamp is on the
        // next day, so the meter rolls over for this authorization.
        let next_day = NOW + SECONDS_PER_DAY;
        assert!(ledger
            .authorize_spend("Coffee Shop", 50_00, Some(next_day))
            .unwrap()
            .is_approved());

        let record = ledger.get_merchant("Coffee Shop").unwrap();
        assert_eq!(record.spent_today, 50_00);
        assert_eq!(record.last_update, next_day);

        // Verification honors the explicit timestamp the same way.
        assert!(!ledger
            .verify_spend("Coffee Shop", 1, Some(next_day))
            .unwrap()
            .is_approved());
        assert!(ledger
            .verify_spend("Coffee Shop", 1, Some(next_day + SECONDS_PER_DAY))
            .unwrap()
            .is_approved());
    }

    #[test]
    fn combined_limit_update_sets_both_fields() {
        let (ledger, _clock) = ledger();
        attest(&ledger, "Coffee Shop");

        let record = ledger.set_limits("Coffee Shop", 80_00, false).unwrap();
        assert_eq!(record.daily_limit, 80_00);
        assert!(!record.platform_approved);

        // Platform approval is checked first, so the new limit is moot
        // until the flag comes back.
        let decision = ledger.authorize_spend("Coffee Shop", 1, None).unwrap();
        assert_eq!(decision.denial(), Some(DenialReason::MerchantNotApproved));

        ledger.set_limits("Coffee Shop", 80_00, true).unwrap();
        assert!(ledger
            .authorize_spend("Coffee Shop", 80_00, None)
            .unwrap()
            .is_approved());
    }

    #[test]
    fn stats_track_both_counters() {
        let (ledger, _clock) = ledger();
        attest(&ledger, "Coffee Shop");
        attest(&ledger, "Book Store");
        ledger.authorize_spend("Coffee Shop", 1_00, None).unwrap();
        ledger.verify_spend("Book Store", 1_00, None).unwrap();

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.total_merchants, 2);
        assert_eq!(stats.total_verifications, 2);
    }
}
