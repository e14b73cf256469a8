//! # Merchant Attestation — Record Machine
//!
//! A [`MerchantRecord`] is a stored assertion about one merchant: its
//! category, whether the platform and the guardian have each approved it,
//! a daily spending limit, and a rolling meter of what has been spent
//! against that limit today.
//!
//! The core algorithm is [`MerchantRecord::authorize_spend`]. Its checks
//! run in a fixed order and short-circuit on the first failure, so callers
//! always observe the *first* applicable denial reason rather than an
//! arbitrary one:
//!
//! 1. platform approval
//! 2. guardian approval
//! 3. category restriction
//! 4. daily limit (rollover-aware)
//!
//! (Existence of the record is checked one level up, in the ledger service
//! that owns the keyed store — a missing record denies with
//! [`DenialReason::MerchantNotFound`] before this machine is ever reached.)
//!
//! ## Daily rollover
//!
//! `spent_today` is measured against the calendar day of `last_update`,
//! where a day is `timestamp / 86_400`. When an authorization arrives on a
//! later day, the limit check treats the meter as zero — but the reset is
//! *committed* only on an approved spend. A denied attempt never mutates
//! the record, so a retry re-examines the exact same state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Length of a calendar day in seconds. Day boundaries for the rollover
/// are computed as `timestamp / SECONDS_PER_DAY`.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Returns the calendar day index for a Unix timestamp.
pub fn day_of(timestamp: u64) -> u64 {
    timestamp / SECONDS_PER_DAY
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Why a spend was denied. Variants are listed in check-precedence order;
/// when several conditions are simultaneously false, the earliest one is
/// the reason reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenialReason {
    /// No attestation exists for the merchant.
    MerchantNotFound,
    /// The platform has not approved (or has revoked approval for) the merchant.
    MerchantNotApproved,
    /// The guardian has not approved the merchant.
    GuardianNotApproved,
    /// The merchant's category is on the restriction list.
    CategoryRestricted,
    /// The purchase would push today's spend past the daily limit.
    DailyLimitExceeded,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MerchantNotFound => write!(f, "merchant not found"),
            Self::MerchantNotApproved => write!(f, "merchant not platform-approved"),
            Self::GuardianNotApproved => write!(f, "merchant not guardian-approved"),
            Self::CategoryRestricted => write!(f, "merchant category is restricted"),
            Self::DailyLimitExceeded => write!(f, "daily spending limit exceeded"),
        }
    }
}

/// The outcome of a spend authorization.
///
/// A denial is a normal, successful evaluation — not an error. Store
/// failures and the like are surfaced as `Err` by the service layer;
/// policy says no.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// The spend fits every rule and has been counted against the meter.
    Approved,
    /// The spend violates a rule; nothing was mutated.
    Denied(DenialReason),
}

impl Decision {
    /// True if the spend was approved.
    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approved)
    }

    /// The denial reason, if any.
    pub fn denial(&self) -> Option<DenialReason> {
        match self {
            Decision::Approved => None,
            Decision::Denied(reason) => Some(*reason),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Approved => write!(f, "approved"),
            Decision::Denied(reason) => write!(f, "denied: {}", reason),
        }
    }
}

// ---------------------------------------------------------------------------
// CategoryPolicy
// ---------------------------------------------------------------------------

/// The set of merchant categories a teen may never spend in.
///
/// Membership is an exact, case-sensitive string match. The policy is
/// plain data injected into every authorization — changing it requires no
/// change to the authorization logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPolicy {
    restricted: BTreeSet<String>,
}

impl CategoryPolicy {
    /// Builds a policy from an explicit list of restricted categories.
    pub fn new<I, S>(restricted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            restricted: restricted.into_iter().map(Into::into).collect(),
        }
    }

    /// A policy that restricts nothing.
    pub fn permissive() -> Self {
        Self {
            restricted: BTreeSet::new(),
        }
    }

    /// Adds a category to the restriction set.
    pub fn restrict(&mut self, category: impl Into<String>) {
        self.restricted.insert(category.into());
    }

    /// Removes a category from the restriction set.
    pub fn allow(&mut self, category: &str) {
        self.restricted.remove(category);
    }

    /// True if spending in this category is forbidden.
    pub fn is_restricted(&self, category: &str) -> bool {
        self.restricted.contains(category)
    }

    /// The restricted categories, in sorted order.
    pub fn restricted_categories(&self) -> impl Iterator<Item = &str> {
        self.restricted.iter().map(String::as_str)
    }
}

impl Default for CategoryPolicy {
    /// The stock family policy: gaming, gambling, adult content, tobacco,
    /// and alcohol are off the table.
    fn default() -> Self {
        Self::new(["Gaming", "Gambling", "Adult Content", "Tobacco", "Alcohol"])
    }
}

// ---------------------------------------------------------------------------
// MerchantRecord
// ---------------------------------------------------------------------------

/// Attestation state for a single merchant, keyed by its unique name.
///
/// Records are created on first attestation, mutated by approval/limit
/// updates and successful authorizations, and never deleted — approval is
/// revoked instead. All amounts are in the smallest currency unit (cents).
///
/// Field order matters: the persisted layout is the bincode encoding of
/// these fields in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantRecord {
    /// Unique merchant name — the record's identity.
    pub name: String,
    /// Merchant category label, matched exactly against the policy.
    pub category: String,
    /// Platform-side approval flag.
    pub platform_approved: bool,
    /// Guardian-side approval flag, independent of the platform's.
    pub guardian_approved: bool,
    /// Maximum approved spend per calendar day, in cents.
    pub daily_limit: u64,
    /// Spend counted against `daily_limit` on the day of `last_update`.
    pub spent_today: u64,
    /// Unix timestamp of the last committed mutation.
    pub last_update: u64,
    /// Where an executed payment settles. Optional: a merchant can be
    /// attested (and verified against) before an address is on file.
    pub settlement_address: Option<String>,
}

impl MerchantRecord {
    /// Creates a fresh attestation with a zeroed spend meter.
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        platform_approved: bool,
        guardian_approved: bool,
        daily_limit: u64,
        at: u64,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            platform_approved,
            guardian_approved,
            daily_limit,
            spent_today: 0,
            last_update: at,
            settlement_address: None,
        }
    }

    /// Sets the settlement address, builder-style.
    pub fn with_settlement_address(mut self, address: impl Into<String>) -> Self {
        self.settlement_address = Some(address.into());
        self
    }

    /// The spend meter as the limit check sees it at time `at`: zero if
    /// the calendar day has advanced past `last_update`, otherwise the
    /// stored value. Read-only — the actual reset is committed only by an
    /// approved [`authorize_spend`](Self::authorize_spend).
    pub fn effective_spent(&self, at: u64) -> u64 {
        if day_of(at) > day_of(self.last_update) {
            0
        } else {
            self.spent_today
        }
    }

    /// Evaluates a spend without mutating anything.
    ///
    /// Runs the ordered checks (platform approval, guardian approval,
    /// category, rollover-aware daily limit) and returns the decision the
    /// committing [`authorize_spend`](Self::authorize_spend) would make.
    pub fn evaluate_spend(&self, amount: u64, at: u64, policy: &CategoryPolicy) -> Decision {
        if !self.platform_approved {
            return Decision::Denied(DenialReason::MerchantNotApproved);
        }
        if !self.guardian_approved {
            return Decision::Denied(DenialReason::GuardianNotApproved);
        }
        if policy.is_restricted(&self.category) {
            return Decision::Denied(DenialReason::CategoryRestricted);
        }

        let spent = self.effective_spent(at);
        match spent.checked_add(amount) {
            Some(new_total) if new_total <= self.daily_limit => Decision::Approved,
            // Overflow counts as exceeding the limit; no u64 daily limit
            // is large enough to make the sum legal.
            _ => Decision::Denied(DenialReason::DailyLimitExceeded),
        }
    }

    /// Evaluates a spend and, only on approval, commits it: the meter is
    /// rolled over if the day advanced, incremented by `amount`, and
    /// `last_update` is stamped with `at`.
    ///
    /// A denied attempt leaves the record untouched — in particular, a
    /// same-day retry after a denial re-examines the old meter, and a
    /// denial on a new day does not zero out yesterday's total.
    pub fn authorize_spend(&mut self, amount: u64, at: u64, policy: &CategoryPolicy) -> Decision {
        let decision = self.evaluate_spend(amount, at, policy);
        if decision.is_approved() {
            self.spent_today = self.effective_spent(at) + amount;
            self.last_update = at;
        }
        decision
    }

    /// How much of today's limit has been consumed, as a percentage
    /// rounded to two decimals. A zero limit reads as 0% rather than a
    /// division by zero.
    pub fn daily_usage_percent(&self) -> f64 {
        if self.daily_limit == 0 {
            return 0.0;
        }
        let percent = self.spent_today as f64 / self.daily_limit as f64 * 100.0;
        (percent * 100.0).round() / 100.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const NOON: u64 = 1_700_000_000; // some mid-day timestamp

    fn approved_record(limit: u64) -> MerchantRecord {
        MerchantRecord::new("Coffee Shop", "Food", true, true, limit, NOON)
    }

    #[test]
    fn new_record_starts_with_zero_spend() {
        let record = approved_record(50_00);
        assert_eq!(record.spent_today, 0);
        assert_eq!(record.last_update, NOON);
        assert!(record.settlement_address.is_none());
    }

    #[test]
    fn spend_within_limit_is_approved_and_counted() {
        let mut record = approved_record(50_00);
        let policy = CategoryPolicy::default();

        assert_eq!(
            record.authorize_spend(50_00, NOON + 60, &policy),
            Decision::Approved
        );
        assert_eq!(record.spent_today, 50_00);
        assert_eq!(record.last_update, NOON + 60);
    }

    #[test]
    fn spend_past_limit_is_denied_without_mutation() {
        let mut record = approved_record(50_00);
        let policy = CategoryPolicy::default();

        record.authorize_spend(50_00, NOON, &policy);
        let decision = record.authorize_spend(1, NOON + 120, &policy);

        assert_eq!(decision, Decision::Denied(DenialReason::DailyLimitExceeded));
        assert_eq!(record.spent_today, 50_00);
        assert_eq!(record.last_update, NOON); // denial did not stamp
    }

    #[test]
    fn platform_approval_checked_before_guardian() {
        let mut record = MerchantRecord::new("Shady", "Food", false, false, 100_00, NOON);
        let policy = CategoryPolicy::default();

        // Both flags false — the platform denial must win.
        assert_eq!(
            record.authorize_spend(1, NOON, &policy),
            Decision::Denied(DenialReason::MerchantNotApproved)
        );

        record.platform_approved = true;
        assert_eq!(
            record.authorize_spend(1, NOON, &policy),
            Decision::Denied(DenialReason::GuardianNotApproved)
        );
    }

    #[test]
    fn restricted_category_denied_regardless_of_limits() {
        let mut record = MerchantRecord::new("Arcade", "Gaming", true, true, u64::MAX, NOON);
        let policy = CategoryPolicy::default();

        assert_eq!(
            record.authorize_spend(1, NOON, &policy),
            Decision::Denied(DenialReason::CategoryRestricted)
        );
        assert_eq!(record.spent_today, 0);
    }

    #[test]
    fn category_match_is_case_sensitive() {
        let mut record = MerchantRecord::new("Arcade", "gaming", true, true, 10_00, NOON);
        let policy = CategoryPolicy::default();

        // "gaming" != "Gaming" — not restricted under the stock policy.
        assert_eq!(record.authorize_spend(1, NOON, &policy), Decision::Approved);
    }

    #[test]
    fn day_rollover_resets_the_meter_on_approval() {
        let mut record = approved_record(50_00);
        let policy = CategoryPolicy::default();
        record.authorize_spend(40_00, NOON, &policy);

        let next_day = NOON + SECONDS_PER_DAY;
        assert_eq!(record.effective_spent(next_day), 0);

        // 30_00 would not fit on top of 40_00, but fits after rollover.
        assert_eq!(
            record.authorize_spend(30_00, next_day, &policy),
            Decision::Approved
        );
        // Meter holds only the new day's spend, not 40_00 + 30_00.
        assert_eq!(record.spent_today, 30_00);
    }

    #[test]
    fn denied_attempt_on_new_day_does_not_commit_the_reset() {
        let mut record = approved_record(50_00);
        let policy = CategoryPolicy::default();
        record.authorize_spend(40_00, NOON, &policy);

        let next_day = NOON + SECONDS_PER_DAY;
        let decision = record.authorize_spend(60_00, next_day, &policy);

        assert_eq!(decision, Decision::Denied(DenialReason::DailyLimitExceeded));
        // Yesterday's meter survives the failed attempt.
        assert_eq!(record.spent_today, 40_00);
        assert_eq!(record.last_update, NOON);
    }

    #[test]
    fn overflowing_amount_is_denied() {
        let mut record = approved_record(u64::MAX);
        let policy = CategoryPolicy::default();
        record.authorize_spend(1, NOON, &policy);

        assert_eq!(
            record.authorize_spend(u64::MAX, NOON, &policy),
            Decision::Denied(DenialReason::DailyLimitExceeded)
        );
    }

    #[test]
    fn usage_percent_rounds_to_two_decimals() {
        let mut record = approved_record(300);
        record.spent_today = 100;
        // 100/300 = 33.333...%
        assert_eq!(record.daily_usage_percent(), 33.33);
    }

    #[test]
    fn usage_percent_guards_zero_limit() {
        let mut record = approved_record(0);
        record.spent_today = 0;
        assert_eq!(record.daily_usage_percent(), 0.0);
    }

    #[test]
    fn policy_mutation() {
        let mut policy = CategoryPolicy::permissive();
        assert!(!policy.is_restricted("Gaming"));

        policy.restrict("Gaming");
        assert!(policy.is_restricted("Gaming"));

        policy.allow("Gaming");
        assert!(!policy.is_restricted("Gaming"));
    }
}
