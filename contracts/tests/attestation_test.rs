//! Integration tests for the merchant attestation machine.
//!
//! These tests walk full guardian-facing scenarios end to end: a merchant
//! being attested, approved on both sides, spent against across day
//! boundaries, and denied for each rule in precedence order.

use lumen_contracts::attestation::{
    CategoryPolicy, Decision, DenialReason, MerchantRecord, SECONDS_PER_DAY,
};

/// Monday, mid-morning. Any fixed timestamp works; the machine only ever
/// compares day indices.
const MONDAY: u64 = 1_750_000_000;

/// Helper: a fully approved merchant with the given daily limit.
fn approved(name: &str, category: &str, limit: u64) -> MerchantRecord {
    MerchantRecord::new(name, category, true, true, limit, MONDAY)
}

// ---------------------------------------------------------------------------
// Purchase Scenarios
// ---------------------------------------------------------------------------

#[test]
fn bookstore_purchase_within_limit() {
    let mut record = approved("City Books", "Education", 75_00);
    let policy = CategoryPolicy::default();

    let decision = record.authorize_spend(30_00, MONDAY + 600, &policy);
    assert_eq!(decision, Decision::Approved);
    assert_eq!(record.spent_today, 30_00);
}

#[test]
fn several_purchases_accumulate_until_the_limit() {
    let mut record = approved("City Books", "Education", 75_00);
    let policy = CategoryPolicy::default();

    assert!(record.authorize_spend(30_00, MONDAY, &policy).is_approved());
    assert!(record.authorize_spend(45_00, MONDAY + 60, &policy).is_approved());

    // The limit is exactly consumed; one more cent is refused.
    let decision = record.authorize_spend(1, MONDAY + 120, &policy);
    assert_eq!(decision, Decision::Denied(DenialReason::DailyLimitExceeded));
    assert_eq!(record.spent_today, 75_00);
}

#[test]
fn next_day_the_meter_starts_fresh() {
    let mut record = approved("City Books", "Education", 75_00);
    let policy = CategoryPolicy::default();
    record.authorize_spend(75_00, MONDAY, &policy);

    let tuesday = MONDAY + SECONDS_PER_DAY;
    let decision = record.authorize_spend(75_00, tuesday, &policy);
    assert_eq!(decision, Decision::Approved);
    assert_eq!(record.spent_today, 75_00);
    assert_eq!(record.last_update, tuesday);
}

#[test]
fn restricted_category_is_refused_before_the_limit_is_consulted() {
    let mut record = approved("Lucky Sevens", "Gambling", u64::MAX);
    let policy = CategoryPolicy::default();

    let decision = record.authorize_spend(1, MONDAY, &policy);
    assert_eq!(decision, Decision::Denied(DenialReason::CategoryRestricted));
    assert_eq!(record.spent_today, 0);
}

#[test]
fn guardian_revocation_stops_spending_immediately() {
    let mut record = approved("City Books", "Education", 75_00);
    let policy = CategoryPolicy::default();
    assert!(record.authorize_spend(10_00, MONDAY, &policy).is_approved());

    record.guardian_approved = false;
    let decision = record.authorize_spend(10_00, MONDAY + 60, &policy);
    assert_eq!(decision, Decision::Denied(DenialReason::GuardianNotApproved));
    // The earlier spend is still on the meter.
    assert_eq!(record.spent_today, 10_00);
}

#[test]
fn denial_precedence_platform_then_guardian_then_category() {
    let policy = CategoryPolicy::default();
    let mut record = MerchantRecord::new("Lucky Sevens", "Gambling", false, false, 0, MONDAY);

    // Everything is wrong at once; platform approval is reported first.
    assert_eq!(
        record.authorize_spend(1, MONDAY, &policy).denial(),
        Some(DenialReason::MerchantNotApproved)
    );

    record.platform_approved = true;
    assert_eq!(
        record.authorize_spend(1, MONDAY, &policy).denial(),
        Some(DenialReason::GuardianNotApproved)
    );

    record.guardian_approved = true;
    assert_eq!(
        record.authorize_spend(1, MONDAY, &policy).denial(),
        Some(DenialReason::CategoryRestricted)
    );
}

// ---------------------------------------------------------------------------
// Evaluate vs Commit
// ---------------------------------------------------------------------------

#[test]
fn evaluate_predicts_authorize_without_touching_the_record() {
    let mut record = approved("City Books", "Education", 75_00);
    let policy = CategoryPolicy::default();

    let preview = record.evaluate_spend(30_00, MONDAY, &policy);
    assert_eq!(preview, Decision::Approved);
    assert_eq!(record.spent_today, 0);

    let committed = record.authorize_spend(30_00, MONDAY, &policy);
    assert_eq!(committed, preview);
    assert_eq!(record.spent_today, 30_00);
}

#[test]
fn denied_rollover_preview_leaves_yesterday_intact() {
    let mut record = approved("City Books", "Education", 75_00);
    let policy = CategoryPolicy::default();
    record.authorize_spend(75_00, MONDAY, &policy);

    let tuesday = MONDAY + SECONDS_PER_DAY;
    // Over-limit attempt on the new day: denied, and Monday's total
    // survives because the reset is only committed by an approval.
    let decision = record.authorize_spend(100_00, tuesday, &policy);
    assert_eq!(decision, Decision::Denied(DenialReason::DailyLimitExceeded));
    assert_eq!(record.spent_today, 75_00);
    assert_eq!(record.last_update, MONDAY);
}

// ---------------------------------------------------------------------------
// Custom Policies
// ---------------------------------------------------------------------------

#[test]
fn household_policy_overrides_the_stock_list() {
    let mut record = approved("Arcade Alley", "Gaming", 20_00);

    // This household allows gaming but bans fast food.
    let policy = CategoryPolicy::new(["Fast Food"]);
    assert!(record.authorize_spend(5_00, MONDAY, &policy).is_approved());

    let mut burger = approved("Burger Barn", "Fast Food", 20_00);
    assert_eq!(
        burger.authorize_spend(5_00, MONDAY, &policy).denial(),
        Some(DenialReason::CategoryRestricted)
    );
}

#[test]
fn stock_policy_lists_the_five_restricted_categories() {
    let policy = CategoryPolicy::default();
    let restricted: Vec<&str> = policy.restricted_categories().collect();
    assert_eq!(
        restricted,
        ["Adult Content", "Alcohol", "Gambling", "Gaming", "Tobacco"]
    );
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

#[test]
fn merchant_record_serialization_roundtrip() {
    let record = approved("City Books", "Education", 75_00)
        .with_settlement_address("LUMEN7BOOKSTOREADDR");

    let json = serde_json::to_string(&record).unwrap();
    let restored: MerchantRecord = serde_json::from_str(&json).unwrap();

    assert_eq!(record, restored);
}
