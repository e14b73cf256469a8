// Copyright (c) 2026 Lumen Labs. MIT License.
// See LICENSE for details.

//! # Lumen Protocol — Core Library
//!
//! Lumen is guarded spending for families: a guardian funds an allowance,
//! a platform attests merchants, and a teen spends only where both say
//! yes — enforced by the ledger, not by a pinky promise in an app.
//!
//! This crate is the off-ledger half of the system. The pure contract
//! machines live in `lumen-contracts`; everything here wraps them with
//! persistence, caller authentication, and the atomic submission path.
//!
//! ## Architecture
//!
//! The crate is split into modules that mirror the actual concerns of the
//! service:
//!
//! - **oracle** — The merchant attestation ledger. Upserts, approvals,
//!   spend authorization, analytics.
//! - **guardian** — The allowance service. Weekly cadence, pause switch,
//!   savings locks, guardianship transfer. All caller checks live here.
//! - **purchase** — The three-leg atomic purchase coordinator and the
//!   ledger environment it submits groups through.
//! - **identity** — Ed25519 keypairs and address derivation for group
//!   signing.
//! - **storage** — Persistent storage over sled.
//! - **clock** — Time as a seam, so tests never sleep.
//! - **config** — Protocol constants.
//!
//! ## Design Philosophy
//!
//! 1. Contract machines decide, services authenticate, storage remembers.
//!    Never let those responsibilities blur.
//! 2. A policy "no" is data, not an error. `Err` is reserved for callers
//!    who asked the wrong question and infrastructure that broke.
//! 3. If it touches money, it has tests. Plural.

pub mod clock;
pub mod config;
pub mod guardian;
pub mod identity;
pub mod oracle;
pub mod purchase;
pub mod storage;
