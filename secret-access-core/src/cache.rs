//! Thread-safe secret cache with per-entry TTL override.
//!
//! Backed by a `std::sync::RwLock<HashMap<..>>` — cache operations never
//! cross an `.await` point, so a plain `std::sync` lock (not `tokio::sync`)
//! is the right tool, and it keeps `get`/`put` non-blocking on uncontended
//! paths.

use crate::model::{Secret, SecretReference};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// The reference implementation's default TTL: 15 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

struct CacheEntry {
    secret: Secret,
    expires_at: Instant,
}

/// A thread-safe mapping from [`SecretReference`] to `(Secret, expiry)`.
///
/// `get` returns a defensive copy and lazily drops (and zeroes) expired
/// entries it observes. `get`/`put`/`invalidate` on distinct references never
/// block each other beyond the per-map-operation lock, which is held only
/// for the duration of the `HashMap` mutation — no I/O ever happens while it
/// is held.
pub struct Cache {
    entries: RwLock<HashMap<SecretReference, CacheEntry>>,
    default_ttl: RwLock<Duration>,
    overrides: RwLock<HashMap<SecretReference, Duration>>,
}

impl Cache {
    /// Build an empty cache with the reference default TTL.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl: RwLock::new(DEFAULT_TTL),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    fn ttl_for(&self, reference: &SecretReference) -> Duration {
        self.overrides
            .read()
            .unwrap()
            .get(reference)
            .copied()
            .unwrap_or_else(|| *self.default_ttl.read().unwrap())
    }

    /// The cached secret for `reference`, or `None` if absent or expired.
    /// An expired entry observed here is dropped and its buffer zeroed.
    pub fn get(&self, reference: &SecretReference) -> Option<Secret> {
        let now = Instant::now();
        {
            let entries = self.entries.read().unwrap();
            if let Some(entry) = entries.get(reference) {
                if now <= entry.expires_at {
                    return Some(entry.secret.defensive_copy());
                }
            } else {
                return None;
            }
        }
        // Entry exists but is expired: drop and zero it under the write lock.
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get(reference) {
            if now <= entry.expires_at {
                // Someone refreshed it between our two lock acquisitions.
                return Some(entry.secret.defensive_copy());
            }
        }
        if let Some(mut entry) = entries.remove(reference) {
            entry.secret.clear_value();
        }
        None
    }

    /// Insert or replace the entry keyed by `secret.metadata().source_ref()`.
    /// The previous entry's buffer, if any, is zeroed — it is never aliased
    /// by a live caller because every `get` hands out a defensive copy.
    pub fn put(&self, secret: Secret) {
        let reference = secret.metadata().source_ref().clone();
        let ttl = self.ttl_for(&reference);
        let expires_at = Instant::now() + ttl;
        let mut entries = self.entries.write().unwrap();
        if let Some(mut old) = entries.insert(reference, CacheEntry { secret, expires_at }) {
            old.secret.clear_value();
        }
    }

    /// Remove and zero the entry for `reference`, if present.
    pub fn invalidate(&self, reference: &SecretReference) {
        let mut entries = self.entries.write().unwrap();
        if let Some(mut entry) = entries.remove(reference) {
            entry.secret.clear_value();
        }
    }

    /// Remove and zero every entry.
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap();
        for (_, mut entry) in entries.drain() {
            entry.secret.clear_value();
        }
    }

    /// Set the process-lifetime default TTL applied when no per-reference
    /// override is set.
    pub fn set_default_ttl(&self, ttl: Duration) {
        *self.default_ttl.write().unwrap() = ttl;
    }

    /// The current default TTL.
    pub fn get_default_ttl(&self) -> Duration {
        *self.default_ttl.read().unwrap()
    }

    /// Set a per-reference TTL override. Persists across subsequent `put`s
    /// for the same reference.
    pub fn set_ttl(&self, reference: SecretReference, ttl: Duration) {
        self.overrides.write().unwrap().insert(reference, ttl);
    }

    /// True iff the entry for `reference` is absent or expired.
    pub fn is_stale(&self, reference: &SecretReference) -> bool {
        let entries = self.entries.read().unwrap();
        match entries.get(reference) {
            Some(entry) => Instant::now() > entry.expires_at,
            None => true,
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}
