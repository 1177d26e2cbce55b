//! Cache keys and entries.

use leadflow_core::{FetchError, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Key identifying one cached collection inside a cache instance.
///
/// Most entity caches hold a single well-known key ("all") plus optional
/// filtered views ("deals/open", "leads/unassigned").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One cached collection with its freshness bookkeeping.
///
/// `value` is `None` only for entries created to record a fetch error
/// before any successful fetch. `fetched_at` is `None` for invalidated
/// entries: the stale value stays visible through `peek` while the next
/// `ensure_fresh` is forced to refetch.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: Option<V>,
    pub fetched_at: Option<Timestamp>,
    pub ttl: Duration,
    /// Bumped on every successful write, fetch or optimistic. A refresh
    /// applies only if the generation it captured at start still matches.
    pub generation: u64,
    pub last_error: Option<FetchError>,
    pub last_error_at: Option<Timestamp>,
}

impl<V> CacheEntry<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            value: None,
            fetched_at: None,
            ttl,
            generation: 0,
            last_error: None,
            last_error_at: None,
        }
    }

    /// Fresh iff fetched and younger than the TTL.
    pub fn is_fresh(&self, now: Timestamp) -> bool {
        match (&self.value, self.fetched_at) {
            (Some(_), Some(fetched_at)) => {
                let age = now
                    .signed_duration_since(fetched_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                age < self.ttl
            }
            _ => false,
        }
    }

    /// The recorded error, if it is an auth failure inside the cool-down
    /// window ending at `now`.
    pub fn auth_error_within(&self, cooldown: Duration, now: Timestamp) -> Option<FetchError> {
        let err = self.last_error.as_ref().filter(|e| e.is_auth())?;
        let at = self.last_error_at?;
        let age = now
            .signed_duration_since(at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age < cooldown {
            Some(err.clone())
        } else {
            None
        }
    }
}

/// Persisted form of an entry. Errors are never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySnapshot<V> {
    pub value: V,
    pub fetched_at: Option<Timestamp>,
    pub ttl_ms: u64,
    pub generation: u64,
}

impl<V: Clone> CacheEntry<V> {
    /// Snapshot for persistence; entries with no value yet are skipped.
    pub fn snapshot(&self) -> Option<EntrySnapshot<V>> {
        let value = self.value.clone()?;
        Some(EntrySnapshot {
            value,
            fetched_at: self.fetched_at,
            ttl_ms: self.ttl.as_millis() as u64,
            generation: self.generation,
        })
    }

    /// Rebuild an entry from its persisted form.
    pub fn from_snapshot(snapshot: EntrySnapshot<V>) -> Self {
        Self {
            value: Some(snapshot.value),
            fetched_at: snapshot.fetched_at,
            ttl: Duration::from_millis(snapshot.ttl_ms),
            generation: snapshot.generation,
            last_error: None,
            last_error_at: None,
        }
    }
}

impl<V> Default for CacheEntry<V> {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}
