//! TTL-based deduplication of drift identifiers.
//!
//! The tracker is process-local and not durable: after a restart duplicates
//! are possible and acceptable, because receivers deduplicate by identifier.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Default time-to-live for tracked identifiers.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

type NowFn = dyn Fn() -> DateTime<Utc> + Send + Sync;

/// Tracks recently seen drift identifiers with TTL expiry.
///
/// Reads run concurrently; writes are serialised on the inner lock.
pub struct Tracker {
    ids: RwLock<HashMap<String, DateTime<Utc>>>,
    ttl: chrono::Duration,
    now_fn: Box<NowFn>,
}

impl Tracker {
    /// Creates a tracker with [`DEFAULT_TTL`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Creates a tracker with the given TTL.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ids: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            now_fn: Box::new(Utc::now),
        }
    }

    /// Replaces the clock, for tests.
    #[cfg(test)]
    pub(crate) fn with_now_fn(
        mut self,
        now_fn: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> Self {
        self.now_fn = Box::new(now_fn);
        self
    }

    /// Records `id`. Returns true when the identifier was new (or its
    /// previous entry had expired), false when it is still live.
    pub fn track(&self, id: &str) -> bool {
        let now = (self.now_fn)();
        let mut ids = self.ids.write().unwrap();
        if let Some(expiry) = ids.get(id) {
            if now < *expiry {
                return false;
            }
        }
        ids.insert(id.to_owned(), now + self.ttl);
        true
    }

    /// Records `id` unconditionally, refreshing its expiry if already live.
    pub fn touch(&self, id: &str) {
        let now = (self.now_fn)();
        self.ids
            .write()
            .unwrap()
            .insert(id.to_owned(), now + self.ttl);
    }

    /// Whether `id` is currently tracked and unexpired.
    #[must_use]
    pub fn is_tracked(&self, id: &str) -> bool {
        let now = (self.now_fn)();
        self.ids
            .read()
            .unwrap()
            .get(id)
            .is_some_and(|expiry| now < *expiry)
    }

    /// Removes `id`. Returns true when a live entry was removed.
    pub fn remove(&self, id: &str) -> bool {
        let now = (self.now_fn)();
        self.ids
            .write()
            .unwrap()
            .remove(id)
            .is_some_and(|expiry| now < expiry)
    }

    /// Drops expired entries, returning how many were removed. Called
    /// periodically by the dispatcher's sweeper.
    pub fn sweep(&self) -> usize {
        let now = (self.now_fn)();
        let mut ids = self.ids.write().unwrap();
        let before = ids.len();
        ids.retain(|_, expiry| now < *expiry);
        before - ids.len()
    }

    /// Number of entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.read().unwrap().len()
    }

    /// Whether the tracker holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.read().unwrap().is_empty()
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}
