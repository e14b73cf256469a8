//! # SpendDb — Persistent Storage Engine
//!
//! The persistence layer for the Lumen spending services, built on sled's
//! embedded key-value store. All on-disk data flows through this module.
//!
//! ## Tree Layout
//!
//! sled organizes data into named "trees" (analogous to column families
//! in RocksDB or tables in SQL). Each tree is an independent B+ tree
//! with its own keyspace:
//!
//! | Tree         | Key                   | Value                       |
//! |--------------|-----------------------|-----------------------------|
//! | `merchants`  | merchant name (UTF-8) | `bincode(MerchantRecord)`   |
//! | `allowances` | teen identity (UTF-8) | `bincode(AllowanceAccount)` |
//! | `metadata`   | key (UTF-8)           | counter (8B BE)             |
//!
//! Allowance accounts are keyed by the *teen* identity, which is the one
//! party a relationship can never swap out. Guardianship transfer is then
//! a value update, not a re-keying.
//!
//! Counters are stored as big-endian u64 so a hex dump of the tree reads
//! naturally.

use sled::{Db, Tree};
use std::path::Path;

use lumen_contracts::allowance::AllowanceAccount;
use lumen_contracts::attestation::MerchantRecord;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Metadata Keys
// ---------------------------------------------------------------------------

/// Well-known key in the `metadata` tree: lifetime count of attested
/// merchants (upserts of brand-new names).
const META_TOTAL_MERCHANTS: &[u8] = b"total_merchants";

/// Well-known key in the `metadata` tree: lifetime count of verification
/// checks performed against the ledger.
const META_TOTAL_VERIFICATIONS: &[u8] = b"total_verifications";

// ---------------------------------------------------------------------------
// SpendDb
// ---------------------------------------------------------------------------

/// Persistent storage engine for merchant attestations and allowance
/// accounts.
///
/// Wraps a sled `Db` instance and exposes typed accessors. All
/// serialization uses bincode for compactness and speed.
///
/// # Thread Safety
///
/// sled is inherently thread-safe — all trees support lock-free concurrent
/// reads and serialized writes. `SpendDb` can be shared across threads via
/// `Arc<SpendDb>` (or cloned; clones share the same underlying database).
#[derive(Debug, Clone)]
pub struct SpendDb {
    /// The underlying sled database handle.
    db: Db,
    /// Merchant attestations indexed by merchant name (UTF-8).
    merchants: Tree,
    /// Allowance accounts indexed by teen identity (UTF-8).
    allowances: Tree,
    /// Lifetime counters (8-byte big-endian values).
    metadata: Tree,
}

impl SpendDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that lives in memory and is cleaned
    /// up automatically when the `SpendDb` is dropped.
    ///
    /// Ideal for unit tests — no filesystem side effects, no cleanup needed.
    pub fn open_temporary() -> StoreResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    /// Internal constructor: opens named trees from an existing sled `Db`.
    fn from_db(db: Db) -> StoreResult<Self> {
        let merchants = db.open_tree("merchants")?;
        let allowances = db.open_tree("allowances")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            merchants,
            allowances,
            metadata,
        })
    }

    // -- Merchant operations ------------------------------------------------

    /// Persist a merchant attestation, keyed by its name.
    ///
    /// Returns `true` if the name was new to the ledger (in which case the
    /// lifetime merchant counter is bumped), `false` on an overwrite.
    pub fn put_merchant(&self, record: &MerchantRecord) -> StoreResult<bool> {
        let bytes =
            bincode::serialize(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let previous = self.merchants.insert(record.name.as_bytes(), bytes)?;

        let is_new = previous.is_none();
        if is_new {
            self.bump_counter(META_TOTAL_MERCHANTS)?;
        }
        self.db.flush()?;
        Ok(is_new)
    }

    /// Retrieve a merchant attestation by name.
    ///
    /// Returns `None` if the merchant has never been attested.
    pub fn get_merchant(&self, name: &str) -> StoreResult<Option<MerchantRecord>> {
        match self.merchants.get(name.as_bytes())? {
            Some(bytes) => {
                let record: MerchantRecord = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// All merchant attestations, in key (name) order.
    pub fn list_merchants(&self) -> StoreResult<Vec<MerchantRecord>> {
        let mut records = Vec::new();
        for entry in self.merchants.iter() {
            let (_key, value) = entry?;
            let record: MerchantRecord = bincode::deserialize(&value)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            records.push(record);
        }
        Ok(records)
    }

    /// Number of merchants currently attested.
    pub fn merchant_count(&self) -> usize {
        self.merchants.len()
    }

    // -- Allowance operations -----------------------------------------------

    /// Persist an allowance account, keyed by the teen identity.
    pub fn put_allowance(&self, account: &AllowanceAccount) -> StoreResult<()> {
        let bytes =
            bincode::serialize(account).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.allowances.insert(account.teen.as_bytes(), bytes)?;
        self.db.flush()?;
        Ok(())
    }

    /// Retrieve the allowance account for a teen.
    ///
    /// Returns `None` if no relationship has been set up for this teen.
    pub fn get_allowance(&self, teen: &str) -> StoreResult<Option<AllowanceAccount>> {
        match self.allowances.get(teen.as_bytes())? {
            Some(bytes) => {
                let account: AllowanceAccount = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(account))
            }
            None => Ok(None),
        }
    }

    /// All allowance accounts, in key (teen) order.
    pub fn list_allowances(&self) -> StoreResult<Vec<AllowanceAccount>> {
        let mut accounts = Vec::new();
        for entry in self.allowances.iter() {
            let (_key, value) = entry?;
            let account: AllowanceAccount = bincode::deserialize(&value)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            accounts.push(account);
        }
        Ok(accounts)
    }

    /// Number of allowance relationships on file.
    pub fn allowance_count(&self) -> usize {
        self.allowances.len()
    }

    // -- Counters -----------------------------------------------------------

    /// Lifetime count of distinct merchants ever attested.
    pub fn total_merchants(&self) -> StoreResult<u64> {
        self.read_counter(META_TOTAL_MERCHANTS)
    }

    /// Lifetime count of verification checks performed.
    pub fn total_verifications(&self) -> StoreResult<u64> {
        self.read_counter(META_TOTAL_VERIFICATIONS)
    }

    /// Bump the lifetime verification counter by one.
    pub fn record_verification(&self) -> StoreResult<u64> {
        self.bump_counter(META_TOTAL_VERIFICATIONS)
    }

    fn read_counter(&self, key: &[u8]) -> StoreResult<u64> {
        match self.metadata.get(key)? {
            Some(bytes) => {
                let value = u64::from_be_bytes(
                    bytes
                        .as_ref()
                        .try_into()
                        .map_err(|_| StoreError::Serialization("invalid counter bytes".into()))?,
                );
                Ok(value)
            }
            None => Ok(0),
        }
    }

    fn bump_counter(&self, key: &[u8]) -> StoreResult<u64> {
        // Compare-and-swap loop inside sled: concurrent bumps from
        // different handles never lose an increment.
        let updated = self.metadata.update_and_fetch(key, |old| {
            let current = old
                .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                .map(u64::from_be_bytes)
                .unwrap_or(0);
            Some(current.saturating_add(1).to_be_bytes().to_vec())
        })?;

        updated
            .as_ref()
            .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_ref()).ok())
            .map(u64::from_be_bytes)
            .ok_or_else(|| StoreError::Serialization("invalid counter bytes".into()))
    }

    // -- Utility operations -------------------------------------------------

    /// Force a flush of all pending writes to disk.
    ///
    /// sled buffers writes in memory for performance. This call blocks
    /// until all data is durable on the underlying storage device.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_750_000_000;

    fn merchant(name: &str) -> MerchantRecord {
        MerchantRecord::new(name, "Food", true, true, 50_00, NOW)
    }

    #[test]
    fn open_temporary_database() {
        let db = SpendDb::open_temporary().expect("should create temp db");
        assert_eq!(db.merchant_count(), 0);
        assert_eq!(db.allowance_count(), 0);
    }

    #[test]
    fn persistent_database_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let db = SpendDb::open(dir.path()).expect("should open db");
            db.put_merchant(&merchant("Coffee Shop")).unwrap();
        }

        let db = SpendDb::open(dir.path()).expect("should reopen db");
        let record = db.get_merchant("Coffee Shop").unwrap().expect("persisted");
        assert_eq!(record.daily_limit, 50_00);
        assert_eq!(db.total_merchants().unwrap(), 1);
    }

    #[test]
    fn merchant_roundtrip_and_counter() {
        let db = SpendDb::open_temporary().unwrap();

        assert!(db.put_merchant(&merchant("Coffee Shop")).unwrap());
        assert!(db.put_merchant(&merchant("Book Store")).unwrap());
        // Overwriting does not re-count.
        assert!(!db.put_merchant(&merchant("Coffee Shop")).unwrap());

        assert_eq!(db.merchant_count(), 2);
        assert_eq!(db.total_merchants().unwrap(), 2);
    }

    #[test]
    fn get_merchant_returns_none_for_unknown_name() {
        let db = SpendDb::open_temporary().unwrap();
        assert!(db.get_merchant("Nowhere").unwrap().is_none());
    }

    #[test]
    fn list_merchants_is_name_ordered() {
        let db = SpendDb::open_temporary().unwrap();
        db.put_merchant(&merchant("Zebra Mart")).unwrap();
        db.put_merchant(&merchant("Apple Cart")).unwrap();

        let names: Vec<String> = db
            .list_merchants()
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, ["Apple Cart", "Zebra Mart"]);
    }

    #[test]
    fn allowance_roundtrip_keyed_by_teen() {
        let db = SpendDb::open_temporary().unwrap();
        let account = AllowanceAccount::new("guardian", "jamie", 100_00, NOW);
        db.put_allowance(&account).unwrap();

        let restored = db.get_allowance("jamie").unwrap().expect("stored");
        assert_eq!(restored, account);
        assert!(db.get_allowance("guardian").unwrap().is_none());
    }

    #[test]
    fn reparented_allowance_keeps_its_key() {
        let db = SpendDb::open_temporary().unwrap();
        let mut account = AllowanceAccount::new("guardian", "jamie", 100_00, NOW);
        db.put_allowance(&account).unwrap();

        account.transfer_control("other_guardian");
        db.put_allowance(&account).unwrap();

        assert_eq!(db.allowance_count(), 1);
        let restored = db.get_allowance("jamie").unwrap().unwrap();
        assert_eq!(restored.parent, "other_guardian");
    }

    #[test]
    fn verification_counter_accumulates() {
        let db = SpendDb::open_temporary().unwrap();
        assert_eq!(db.total_verifications().unwrap(), 0);

        assert_eq!(db.record_verification().unwrap(), 1);
        assert_eq!(db.record_verification().unwrap(), 2);
        assert_eq!(db.total_verifications().unwrap(), 2);
    }

    #[test]
    fn verification_counter_survives_contention() {
        use std::sync::Arc;
        use std::thread;

        let db = Arc::new(SpendDb::open_temporary().unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    for _ in 0..25 {
                        db.record_verification().unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("writer thread should not panic");
        }

        // Every bump lands; none are lost to interleaved read-then-write.
        assert_eq!(db.total_verifications().unwrap(), 100);
    }

    #[test]
    fn concurrent_reads_do_not_block() {
        use std::sync::Arc;
        use std::thread;

        let db = Arc::new(SpendDb::open_temporary().unwrap());
        for i in 0..10 {
            db.put_merchant(&merchant(&format!("Shop {i}"))).unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    for i in 0..10 {
                        let record = db.get_merchant(&format!("Shop {i}")).unwrap().unwrap();
                        assert_eq!(record.daily_limit, 50_00);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("reader thread should not panic");
        }
    }

    #[test]
    fn flush_does_not_error() {
        let db = SpendDb::open_temporary().unwrap();
        db.put_merchant(&merchant("Coffee Shop")).unwrap();
        db.flush().expect("flush should succeed");
    }
}
