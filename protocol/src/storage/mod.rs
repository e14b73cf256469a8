//! # Storage — Persistence Layer
//!
//! Everything Lumen keeps on disk goes through [`SpendDb`], a thin typed
//! layer over sled. Services own a `SpendDb` and never touch raw trees.

pub mod db;

pub use db::{SpendDb, StoreError, StoreResult};
