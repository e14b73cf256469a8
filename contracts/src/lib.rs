//! # Lumen Ledger Contracts
//!
//! On-ledger logic for the Lumen guarded-spending network. These contracts
//! implement the rules that let a guardian delegate spending power to a
//! teen without handing over the keys to the vault:
//!
//! - **Attestation** — per-merchant approval state and a rolling daily
//!   spend meter. A purchase clears only if the merchant is approved by
//!   both the platform and the guardian, sits in an allowed category,
//!   and fits under the merchant's daily limit.
//! - **Allowance** — the weekly allowance cadence, guardian pause switch,
//!   emergency issuance, and a single time-locked savings slot.
//! - **Atomic** — the shape rules for the three-leg purchase group that
//!   binds verification, allowance enforcement, and payment into one
//!   indivisible unit.
//!
//! ## Design Principles
//!
//! 1. All monetary arithmetic is overflow-aware — checked or saturating,
//!    never wrapping, because wrapping arithmetic and money do not mix.
//! 2. A denied operation never mutates state. Callers can retry or
//!    inspect without worrying about half-applied side effects.
//! 3. Denial reasons are ordered and deterministic: the first failing
//!    check wins, always.
//! 4. Every public type is serializable (serde) for wire transport and
//!    persistent storage.
//!
//! These machines are pure: no clocks, no storage, no identity lookups.
//! Time arrives as an argument, persistence and caller authentication are
//! the service layer's problem (`lumen-protocol`).

pub mod allowance;
pub mod atomic;
pub mod attestation;
