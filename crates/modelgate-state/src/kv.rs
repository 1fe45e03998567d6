//! Key-value layer with TTL support.
//!
//! `KvStore` is the seam between routing state and whatever actually holds
//! the bytes. `RedbKv` is the bundled implementation; a networked store
//! (Redis, etcd) slots in behind the same trait. Expiry is passive: an
//! expired key reads as absent, and `purge_expired` only reclaims space.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Single-key operations a routing state backend must provide.
///
/// Every call is atomic on its own. Nothing here spans more than one key.
pub trait KvStore: Send + Sync {
    /// Live value for `key`, or `None` when absent or expired.
    fn get(&self, key: &str) -> StateResult<Option<Vec<u8>>>;

    /// Write without expiry.
    fn set(&self, key: &str, value: &[u8]) -> StateResult<()>;

    /// Write with a relative time-to-live.
    fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> StateResult<()>;

    fn exists(&self, key: &str) -> StateResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Remove a key. Returns true if a live value was removed.
    fn delete(&self, key: &str) -> StateResult<bool>;

    /// Replace the value only if the live value equals `expected`
    /// (`None` meaning absent or expired). `expires_at_ms` is absolute;
    /// `None` stores the value without expiry.
    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
        expires_at_ms: Option<u64>,
    ) -> StateResult<bool>;

    /// All live entries whose key starts with `prefix`.
    fn scan_prefix(&self, prefix: &str) -> StateResult<Vec<(String, Vec<u8>)>>;

    /// Round-trip to the backend without touching data.
    fn ping(&self) -> StateResult<()>;

    /// Drop expired entries. Returns the number removed.
    fn purge_expired(&self) -> StateResult<u32>;
}

/// Current wall-clock time in unix milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Absolute expiry for a TTL starting now.
pub fn expiry_from_now(ttl: Duration) -> u64 {
    epoch_millis().saturating_add(ttl.as_millis() as u64)
}

/// Thread-safe `KvStore` backed by redb.
#[derive(Clone)]
pub struct RedbKv {
    db: Arc<Database>,
}

impl RedbKv {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(StoreUnavailable))?;
        let kv = Self { db: Arc::new(db) };
        kv.ensure_tables()?;
        debug!(?path, "redb kv opened");
        Ok(kv)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(StoreUnavailable))?;
        let kv = Self { db: Arc::new(db) };
        kv.ensure_tables()?;
        debug!("in-memory redb kv opened");
        Ok(kv)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(StoreUnavailable))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(VALUES).map_err(map_err!(StoreUnavailable))?;
        txn.open_table(EXPIRY).map_err(map_err!(StoreUnavailable))?;
        txn.commit().map_err(map_err!(StoreUnavailable))?;
        Ok(())
    }

    fn write(&self, key: &str, value: &[u8], expires_at_ms: Option<u64>) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(StoreUnavailable))?;
        {
            let mut values = txn.open_table(VALUES).map_err(map_err!(StoreUnavailable))?;
            let mut expiry = txn.open_table(EXPIRY).map_err(map_err!(StoreUnavailable))?;
            values.insert(key, value).map_err(map_err!(StoreUnavailable))?;
            match expires_at_ms {
                Some(at) => {
                    expiry.insert(key, at).map_err(map_err!(StoreUnavailable))?;
                }
                None => {
                    expiry.remove(key).map_err(map_err!(StoreUnavailable))?;
                }
            }
        }
        txn.commit().map_err(map_err!(StoreUnavailable))?;
        Ok(())
    }
}

/// Read `key` from a values/expiry table pair, treating expired as absent.
fn live_value<V, E>(values: &V, expiry: &E, key: &str, now: u64) -> StateResult<Option<Vec<u8>>>
where
    V: ReadableTable<&'static str, &'static [u8]>,
    E: ReadableTable<&'static str, u64>,
{
    let expired = expiry
        .get(key)
        .map_err(map_err!(StoreUnavailable))?
        .is_some_and(|at| at.value() <= now);
    if expired {
        return Ok(None);
    }
    Ok(values
        .get(key)
        .map_err(map_err!(StoreUnavailable))?
        .map(|guard| guard.value().to_vec()))
}

impl KvStore for RedbKv {
    fn get(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(StoreUnavailable))?;
        let values = txn.open_table(VALUES).map_err(map_err!(StoreUnavailable))?;
        let expiry = txn.open_table(EXPIRY).map_err(map_err!(StoreUnavailable))?;
        live_value(&values, &expiry, key, epoch_millis())
    }

    fn set(&self, key: &str, value: &[u8]) -> StateResult<()> {
        self.write(key, value, None)
    }

    fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> StateResult<()> {
        self.write(key, value, Some(expiry_from_now(ttl)))
    }

    fn delete(&self, key: &str) -> StateResult<bool> {
        let now = epoch_millis();
        let txn = self.db.begin_write().map_err(map_err!(StoreUnavailable))?;
        let existed;
        {
            let mut values = txn.open_table(VALUES).map_err(map_err!(StoreUnavailable))?;
            let mut expiry = txn.open_table(EXPIRY).map_err(map_err!(StoreUnavailable))?;
            existed = live_value(&values, &expiry, key, now)?.is_some();
            values.remove(key).map_err(map_err!(StoreUnavailable))?;
            expiry.remove(key).map_err(map_err!(StoreUnavailable))?;
        }
        txn.commit().map_err(map_err!(StoreUnavailable))?;
        debug!(%key, existed, "kv entry deleted");
        Ok(existed)
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: &[u8],
        expires_at_ms: Option<u64>,
    ) -> StateResult<bool> {
        let now = epoch_millis();
        let txn = self.db.begin_write().map_err(map_err!(StoreUnavailable))?;
        let swapped;
        {
            let mut values = txn.open_table(VALUES).map_err(map_err!(StoreUnavailable))?;
            let mut expiry = txn.open_table(EXPIRY).map_err(map_err!(StoreUnavailable))?;
            let current = live_value(&values, &expiry, key, now)?;
            swapped = current.as_deref() == expected;
            if swapped {
                values.insert(key, value).map_err(map_err!(StoreUnavailable))?;
                match expires_at_ms {
                    Some(at) => {
                        expiry.insert(key, at).map_err(map_err!(StoreUnavailable))?;
                    }
                    None => {
                        expiry.remove(key).map_err(map_err!(StoreUnavailable))?;
                    }
                }
            }
        }
        if swapped {
            txn.commit().map_err(map_err!(StoreUnavailable))?;
        } else {
            txn.abort().map_err(map_err!(StoreUnavailable))?;
        }
        Ok(swapped)
    }

    fn scan_prefix(&self, prefix: &str) -> StateResult<Vec<(String, Vec<u8>)>> {
        let now = epoch_millis();
        let txn = self.db.begin_read().map_err(map_err!(StoreUnavailable))?;
        let values = txn.open_table(VALUES).map_err(map_err!(StoreUnavailable))?;
        let expiry = txn.open_table(EXPIRY).map_err(map_err!(StoreUnavailable))?;
        let mut results = Vec::new();
        for entry in values.range(prefix..).map_err(map_err!(StoreUnavailable))? {
            let (key, value) = entry.map_err(map_err!(StoreUnavailable))?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            let expired = expiry
                .get(key)
                .map_err(map_err!(StoreUnavailable))?
                .is_some_and(|at| at.value() <= now);
            if !expired {
                results.push((key.to_string(), value.value().to_vec()));
            }
        }
        Ok(results)
    }

    fn ping(&self) -> StateResult<()> {
        let txn = self.db.begin_read().map_err(map_err!(StoreUnavailable))?;
        txn.open_table(VALUES).map_err(map_err!(StoreUnavailable))?;
        Ok(())
    }

    fn purge_expired(&self) -> StateResult<u32> {
        let now = epoch_millis();
        // Collect keys in a read transaction first.
        let stale: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(StoreUnavailable))?;
            let expiry = txn.open_table(EXPIRY).map_err(map_err!(StoreUnavailable))?;
            let mut stale = Vec::new();
            for entry in expiry.iter().map_err(map_err!(StoreUnavailable))? {
                let (key, at) = entry.map_err(map_err!(StoreUnavailable))?;
                if at.value() <= now {
                    stale.push(key.value().to_string());
                }
            }
            stale
        };
        if stale.is_empty() {
            return Ok(0);
        }
        let txn = self.db.begin_write().map_err(map_err!(StoreUnavailable))?;
        let mut removed = 0u32;
        {
            let mut values = txn.open_table(VALUES).map_err(map_err!(StoreUnavailable))?;
            let mut expiry = txn.open_table(EXPIRY).map_err(map_err!(StoreUnavailable))?;
            for key in &stale {
                // Re-check: the key may have been rewritten since the scan.
                let still_stale = expiry
                    .get(key.as_str())
                    .map_err(map_err!(StoreUnavailable))?
                    .is_some_and(|at| at.value() <= now);
                if still_stale {
                    values.remove(key.as_str()).map_err(map_err!(StoreUnavailable))?;
                    expiry.remove(key.as_str()).map_err(map_err!(StoreUnavailable))?;
                    removed += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(StoreUnavailable))?;
        debug!(removed, "purged expired kv entries");
        Ok(removed)
    }
}
