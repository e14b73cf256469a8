//! # Purchase Coordinator — Atomic Three-Leg Authorization
//!
//! A purchase commits as one indivisible group of three legs: merchant
//! verification, allowance enforcement, and the payment itself. This
//! module assembles the group, evaluates every leg *without mutating
//! anything*, submits the group through a [`LedgerEnvironment`], and only
//! then commits the spend to the merchant meter.
//!
//! The ordering is what makes the protocol all-or-nothing:
//!
//! 1. verification leg evaluated read-only (denial ends the purchase,
//!    nothing changed)
//! 2. allowance leg evaluated read-only (ditto)
//! 3. the signed group is submitted; a submission failure ends the
//!    purchase with nothing changed
//! 4. the spend is committed to the merchant meter
//!
//! A half-committed purchase is therefore unrepresentable: every mutation
//! happens after every check and after submission has succeeded.

use std::sync::Arc;
use tracing::{info, warn};

use lumen_contracts::atomic::{GroupContext, ALLOWANCE_LEG_INDEX};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::{EXPLORER_BASE_URL, PURCHASE_MEMO_PREFIX};
use crate::guardian::{AllowanceService, AllowanceServiceError};
use crate::identity::LumenKeypair;
use crate::oracle::{AttestationLedger, LedgerError};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// What a buyer asks for: this teen, this merchant, this amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseIntent {
    pub teen: String,
    pub merchant: String,
    /// Purchase amount in cents.
    pub amount: u64,
    /// Explicit authorization timestamp. `None` means "now" — the ledger
    /// reads its clock when the intent is evaluated.
    #[serde(default)]
    pub at: Option<u64>,
}

/// One leg of the atomic group, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PurchaseLeg {
    /// Leg 0: the attestation check against the merchant ledger.
    Verification { merchant: String, amount: u64 },
    /// Leg 1: the allowance enforcement check.
    Allowance { teen: String, amount: u64 },
    /// Leg 2: the fund transfer to the merchant's settlement address.
    Payment {
        from: String,
        to: String,
        amount: u64,
        memo: String,
    },
}

/// A fully assembled, not-yet-submitted purchase group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseGroup {
    pub sender: String,
    pub legs: Vec<PurchaseLeg>,
}

/// What a successful submission hands back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedGroup {
    /// Hex-encoded group reference, stable for the signed payload.
    pub reference_id: String,
    /// Explorer deep link for the reference.
    pub explorer_link: String,
}

/// The result of an executed purchase.
///
/// A decline is a successful protocol run that said no; only
/// infrastructure failures surface as [`PurchaseError`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    Completed {
        reference_id: String,
        explorer_link: String,
    },
    Declined {
        reason: String,
    },
}

impl PurchaseOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PurchaseOutcome::Completed { .. })
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A ledger environment refused or failed to take the group.
#[derive(Debug, Error)]
#[error("ledger environment rejected the group: {0}")]
pub struct EnvironmentError(pub String);

/// Infrastructure failures during purchase coordination. Policy declines
/// are [`PurchaseOutcome::Declined`], never errors.
#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Allowance(#[from] AllowanceServiceError),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),
}

// ---------------------------------------------------------------------------
// LedgerEnvironment
// ---------------------------------------------------------------------------

/// Where signed purchase groups go.
///
/// The production implementation signs and records groups in-process;
/// tests substitute failing environments to exercise the all-or-nothing
/// path.
pub trait LedgerEnvironment: Send + Sync {
    /// Takes a fully evaluated group. On success the group is durable and
    /// referenceable; on failure nothing observable happened.
    fn submit_group(&self, group: &PurchaseGroup) -> Result<SubmittedGroup, EnvironmentError>;
}

/// The in-process environment: signs the serialized group with the
/// service's key and derives the reference id from the signature, so the
/// reference is unforgeable without the key and deterministic per payload.
pub struct SigningEnvironment {
    keypair: LumenKeypair,
}

impl SigningEnvironment {
    pub fn new(keypair: LumenKeypair) -> Self {
        Self { keypair }
    }
}

impl LedgerEnvironment for SigningEnvironment {
    fn submit_group(&self, group: &PurchaseGroup) -> Result<SubmittedGroup, EnvironmentError> {
        let payload =
            bincode::serialize(group).map_err(|e| EnvironmentError(e.to_string()))?;
        let signature = self.keypair.sign(&payload);

        let mut hasher = Sha256::new();
        hasher.update(&payload);
        hasher.update(signature);
        let reference_id = hex::encode(hasher.finalize());

        Ok(SubmittedGroup {
            explorer_link: format!("{EXPLORER_BASE_URL}/{reference_id}"),
            reference_id,
        })
    }
}

// ---------------------------------------------------------------------------
// PurchaseCoordinator
// ---------------------------------------------------------------------------

/// Preview of a purchase: what each check leg would say, with nothing
/// committed anywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchasePreview {
    /// The attestation ledger's decision, human-readable.
    pub merchant_check: String,
    /// The allowance machine's verdict, human-readable.
    pub allowance_check: String,
    /// True only if both checks pass.
    pub would_complete: bool,
}

/// Drives the three-leg purchase protocol over the two services.
#[derive(Clone)]
pub struct PurchaseCoordinator {
    ledger: AttestationLedger,
    allowances: AllowanceService,
    environment: Arc<dyn LedgerEnvironment>,
}

impl PurchaseCoordinator {
    pub fn new(
        ledger: AttestationLedger,
        allowances: AllowanceService,
        environment: Arc<dyn LedgerEnvironment>,
    ) -> Self {
        Self {
            ledger,
            allowances,
            environment,
        }
    }

    /// Evaluates both check legs without committing anything. The
    /// verification still counts toward the lifetime tally.
    pub fn verify_purchase(&self, intent: &PurchaseIntent) -> Result<PurchasePreview, PurchaseError> {
        let merchant_decision =
            self.ledger.verify_spend(&intent.merchant, intent.amount, intent.at)?;

        let account = self.allowances.get_account(&intent.teen)?;
        let ctx = GroupContext::purchase_leg(&*intent.teen, ALLOWANCE_LEG_INDEX);
        let allowance_verdict = account.authorize_purchase(&ctx, intent.amount);

        Ok(PurchasePreview {
            would_complete: merchant_decision.is_approved() && allowance_verdict.is_ok(),
            merchant_check: merchant_decision.to_string(),
            allowance_check: match allowance_verdict {
                Ok(()) => "approved".to_string(),
                Err(e) => format!("denied: {e}"),
            },
        })
    }

    /// Runs the full protocol: evaluate, submit, commit.
    ///
    /// Returns `Declined` the moment any check leg says no, with no state
    /// changed. A submission failure propagates as an error, also with no
    /// state changed. Only a fully submitted group commits the spend.
    pub fn execute_purchase(&self, intent: &PurchaseIntent) -> Result<PurchaseOutcome, PurchaseError> {
        // Leg 0: verification, read-only.
        let decision = self
            .ledger
            .verify_spend(&intent.merchant, intent.amount, intent.at)?;
        if let Some(reason) = decision.denial() {
            info!(merchant = %intent.merchant, amount = intent.amount, %reason, "purchase declined");
            return Ok(PurchaseOutcome::Declined {
                reason: reason.to_string(),
            });
        }

        // Leg 1: allowance enforcement, read-only.
        let account = self.allowances.get_account(&intent.teen)?;
        let ctx = GroupContext::purchase_leg(&*intent.teen, ALLOWANCE_LEG_INDEX);
        if let Err(reason) = account.authorize_purchase(&ctx, intent.amount) {
            info!(teen = %intent.teen, amount = intent.amount, %reason, "purchase declined");
            return Ok(PurchaseOutcome::Declined {
                reason: reason.to_string(),
            });
        }

        // Leg 2: the payment, settling to the attested address when one is
        // on file and to the merchant's own identity otherwise.
        let merchant = self.ledger.get_merchant(&intent.merchant)?;
        let settle_to = merchant
            .settlement_address
            .unwrap_or_else(|| merchant.name.clone());

        let group = PurchaseGroup {
            sender: intent.teen.clone(),
            legs: vec![
                PurchaseLeg::Verification {
                    merchant: intent.merchant.clone(),
                    amount: intent.amount,
                },
                PurchaseLeg::Allowance {
                    teen: intent.teen.clone(),
                    amount: intent.amount,
                },
                PurchaseLeg::Payment {
                    from: intent.teen.clone(),
                    to: settle_to,
                    amount: intent.amount,
                    memo: format!("{PURCHASE_MEMO_PREFIX}{}", intent.merchant),
                },
            ],
        };

        // Everything checked out; submit before any mutation so a failed
        // submission leaves no trace.
        let submitted = self.environment.submit_group(&group)?;

        // Commit the spend. The node serializes purchases behind a write
        // lock, so the record cannot have changed since the evaluation.
        let committed = self
            .ledger
            .authorize_spend(&intent.merchant, intent.amount, intent.at)?;
        if let Some(reason) = committed.denial() {
            warn!(
                merchant = %intent.merchant,
                reference_id = %submitted.reference_id,
                %reason,
                "commit diverged from evaluation"
            );
            return Ok(PurchaseOutcome::Declined {
                reason: reason.to_string(),
            });
        }

        info!(
            teen = %intent.teen,
            merchant = %intent.merchant,
            amount = intent.amount,
            reference_id = %submitted.reference_id,
            "purchase completed"
        );
        Ok(PurchaseOutcome::Completed {
            reference_id: submitted.reference_id,
            explorer_link: submitted.explorer_link,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
