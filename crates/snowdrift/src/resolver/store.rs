use core::convert::Infallible;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::mutex::Mutex;

/// A key-value service with an atomic increment, in the manner of Redis
/// `INCR` and `PEXPIRE`.
///
/// A missing (or expired) key counts as `0`, so the first increment returns
/// `1`. Both operations must be atomic with respect to every other client of
/// the store; that atomicity is the only coordination [`AtomicStoreResolver`]
/// relies on.
///
/// [`AtomicStoreResolver`]: crate::AtomicStoreResolver
pub trait AtomicStore {
    /// Error reported when the store cannot be reached.
    type Error: core::error::Error + Send + Sync + 'static;

    /// Atomically increments `key` and returns the new value.
    fn increment_and_get(&self, key: &str) -> Result<i64, Self::Error>;

    /// Sets `key` to expire `ttl` from now.
    fn expire(&self, key: &str, ttl: Duration) -> Result<(), Self::Error>;
}

impl<S: AtomicStore + ?Sized> AtomicStore for &S {
    type Error = S::Error;

    fn increment_and_get(&self, key: &str) -> Result<i64, Self::Error> {
        (**self).increment_and_get(key)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<(), Self::Error> {
        (**self).expire(key, ttl)
    }
}

impl<S: AtomicStore + ?Sized> AtomicStore for Arc<S> {
    type Error = S::Error;

    fn increment_and_get(&self, key: &str) -> Result<i64, Self::Error> {
        (**self).increment_and_get(key)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<(), Self::Error> {
        (**self).expire(key, ttl)
    }
}

/// Map size below which new keys never trigger a sweep.
const MIN_SWEEP_LEN: usize = 1_024;

#[derive(Debug)]
struct Entry {
    value: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

#[derive(Debug)]
struct Entries {
    map: HashMap<String, Entry>,
    // Inserting a new key sweeps expired ones once the map reaches this size.
    sweep_at: usize,
}

impl Default for Entries {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
            sweep_at: MIN_SWEEP_LEN,
        }
    }
}

impl Entries {
    fn purge(&mut self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, entry| entry.is_live(now));
        self.sweep_at = MIN_SWEEP_LEN.max(self.map.len().saturating_mul(2));
        before - self.map.len()
    }
}

/// An in-memory [`AtomicStore`].
///
/// Every handle to the same `MemoryStore` (share it through an `Arc`) sees
/// one counter space, which makes it a drop-in stand-in for an external store
/// in tests, benchmarks and single-host deployments. Expired keys read as
/// missing. They are dropped when touched, by [`Self::purge_expired`], and by
/// a sweep whenever inserting a new key finds the map at twice its live size,
/// so a key per bucket never accumulates.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live value of `key`, if any.
    pub fn get(&self, key: &str) -> Option<i64> {
        let entries = self.lock();
        entries
            .map
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.value)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired key and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.lock().purge(Instant::now())
    }

    // A panic while holding this lock cannot leave an entry half-written, so
    // a poisoned map is still consistent.
    #[cfg(not(feature = "parking-lot"))]
    fn lock(&self) -> crate::mutex::MutexGuard<'_, Entries> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[cfg(feature = "parking-lot")]
    fn lock(&self) -> parking_lot::MutexGuard<'_, Entries> {
        self.entries.lock()
    }
}

impl AtomicStore for MemoryStore {
    type Error = Infallible;

    fn increment_and_get(&self, key: &str) -> Result<i64, Self::Error> {
        let now = Instant::now();
        let mut entries = self.lock();
        if let Some(entry) = entries.map.get_mut(key) {
            if !entry.is_live(now) {
                entry.value = 0;
                entry.expires_at = None;
            }
            entry.value += 1;
            return Ok(entry.value);
        }

        if entries.map.len() >= entries.sweep_at {
            entries.purge(now);
        }
        entries.map.insert(
            key.to_owned(),
            Entry {
                value: 1,
                expires_at: None,
            },
        );
        Ok(1)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<(), Self::Error> {
        let now = Instant::now();
        let mut entries = self.lock();
        if let Some(entry) = entries.map.get_mut(key).filter(|entry| entry.is_live(now)) {
            entry.expires_at = now.checked_add(ttl);
        }
        Ok(())
    }
}
