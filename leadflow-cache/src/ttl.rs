//! TTL cache with single-flight refresh and optimistic writes.

use crate::entry::{CacheEntry, CacheKey, EntrySnapshot};
use crate::stats::{CacheStats, CacheStatsSnapshot};
use chrono::Utc;
use leadflow_core::{FetchError, LeadflowError, Timestamp, ValidationError};
use leadflow_store::DurableStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Cache layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no cached entry for {key}")]
    MissingEntry { key: String },
}

impl From<CacheError> for LeadflowError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Fetch(e) => LeadflowError::Fetch(e),
            CacheError::Validation(e) => LeadflowError::Validation(e),
            CacheError::MissingEntry { key } => LeadflowError::Cache {
                reason: format!("no cached entry for {key}"),
            },
        }
    }
}

/// How a read treats an existing fresh value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    /// Serve a fresh cached value without I/O; fetch only when stale.
    #[default]
    IfStale,
    /// Always fetch (user-initiated refresh). Still coalesces with an
    /// in-flight fetch instead of starting a second one.
    Force,
}

/// Configuration for one cache instance.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Maximum age before a cached value needs a refresh.
    pub ttl: Duration,
    /// Window during which a recorded auth failure short-circuits new
    /// fetch attempts.
    pub auth_cooldown: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            auth_cooldown: Duration::from_secs(5),
        }
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_auth_cooldown(mut self, cooldown: Duration) -> Self {
        self.auth_cooldown = cooldown;
        self
    }
}

/// Type-erased invalidation handle.
///
/// The sync coordinator holds one per entity kind; it never needs the
/// value type, only the ability to mark everything stale.
pub trait Invalidate: Send + Sync {
    /// Clear freshness on every entry, keeping the stale values visible.
    fn invalidate_all(&self);
}

type Waiter<V> = oneshot::Sender<Result<V, FetchError>>;

struct CacheState<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    in_flight: HashMap<CacheKey, Vec<Waiter<V>>>,
}

impl<V> Default for CacheState<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            in_flight: HashMap::new(),
        }
    }
}

/// Keyed TTL cache for one entity kind.
///
/// All mutations are synchronous under one lock; the only suspension
/// points are the fetch itself and store I/O, so entries never change
/// underneath a same-task caller.
pub struct TtlCache<V> {
    name: String,
    options: CacheOptions,
    store: Arc<dyn DurableStore>,
    state: Mutex<CacheState<V>>,
    stats: CacheStats,
}

impl<V> TtlCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        options: CacheOptions,
        store: Arc<dyn DurableStore>,
    ) -> Self {
        Self {
            name: name.into(),
            options,
            store,
            state: Mutex::new(CacheState::default()),
            stats: CacheStats::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    fn storage_key(&self) -> String {
        format!("cache/{}", self.name)
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState<V>> {
        // a poisoned lock still holds consistent data; keep serving it
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Return the value for `key`, fetching if needed.
    ///
    /// A fresh cached value is returned without I/O (unless `Force`). If a
    /// fetch for the key is already in flight, this caller awaits its
    /// settled result instead of starting a second fetch. Otherwise this
    /// caller runs `fetch` and applies the result under the generation
    /// guard: a refresh that raced a newer optimistic write is discarded
    /// and the newer local value is returned instead.
    ///
    /// On fetch failure the cached value is left untouched, the error is
    /// recorded on the entry, and every waiter receives the error. The
    /// stale value stays readable through [`TtlCache::peek`].
    pub async fn ensure_fresh<F, Fut>(
        &self,
        key: &CacheKey,
        mode: RefreshMode,
        fetch: F,
    ) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>>,
    {
        enum Role<V> {
            Waiter(oneshot::Receiver<Result<V, FetchError>>),
            Leader { start_generation: u64 },
        }

        let role = {
            let mut state = self.lock_state();
            let now = Utc::now();

            if mode == RefreshMode::IfStale {
                if let Some(value) = state
                    .entries
                    .get(key)
                    .filter(|entry| entry.is_fresh(now))
                    .and_then(|entry| entry.value.clone())
                {
                    self.stats.record_hit();
                    return Ok(value);
                }
            }

            if let Some(waiters) = state.in_flight.get_mut(key) {
                // joining an in-flight fetch costs no I/O, so it takes
                // priority over the auth cool-down
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                self.stats.record_coalesced();
                Role::Waiter(rx)
            } else if let Some(err) = state
                .entries
                .get(key)
                .and_then(|entry| entry.auth_error_within(self.options.auth_cooldown, now))
            {
                tracing::debug!(
                    cache = %self.name,
                    key = %key,
                    "auth failure inside cool-down, suppressing refetch"
                );
                return Err(CacheError::Fetch(err));
            } else {
                state.in_flight.insert(key.clone(), Vec::new());
                let start_generation = state
                    .entries
                    .get(key)
                    .map(|entry| entry.generation)
                    .unwrap_or(0);
                Role::Leader { start_generation }
            }
        };

        match role {
            Role::Waiter(rx) => match rx.await {
                Ok(result) => result.map_err(CacheError::Fetch),
                // leader dropped mid-fetch without settling
                Err(_) => Err(CacheError::Fetch(FetchError::Transient {
                    reason: "refresh cancelled before settling".to_string(),
                })),
            },
            Role::Leader { start_generation } => {
                self.stats.record_miss();
                let mut guard = FlightGuard {
                    cache: self,
                    key: key.clone(),
                    armed: true,
                };
                let fetched = fetch().await;
                let result = self.settle(key, start_generation, fetched);
                guard.armed = false;
                result
            }
        }
    }

    /// Apply the settled fetch result, wake waiters, clear the in-flight
    /// slot, and schedule a snapshot persist on success.
    fn settle(
        &self,
        key: &CacheKey,
        start_generation: u64,
        fetched: Result<V, FetchError>,
    ) -> Result<V, CacheError> {
        let (outcome, snapshot) = {
            let mut state = self.lock_state();
            let now = Utc::now();
            let waiters = state.in_flight.remove(key).unwrap_or_default();

            let outcome: Result<V, FetchError> = match fetched {
                Ok(value) => {
                    let ttl = self.options.ttl;
                    let entry = state
                        .entries
                        .entry(key.clone())
                        .or_insert_with(|| CacheEntry::new(ttl));
                    if entry.generation != start_generation {
                        self.stats.record_discarded_stale();
                        tracing::debug!(
                            cache = %self.name,
                            key = %key,
                            captured = start_generation,
                            current = entry.generation,
                            "refresh raced a newer write, discarding fetched value"
                        );
                        Ok(entry.value.clone().unwrap_or(value))
                    } else {
                        entry.value = Some(value.clone());
                        entry.fetched_at = Some(now);
                        entry.generation += 1;
                        entry.ttl = ttl;
                        entry.last_error = None;
                        entry.last_error_at = None;
                        Ok(value)
                    }
                }
                Err(err) => {
                    self.stats.record_fetch_error();
                    let ttl = self.options.ttl;
                    let entry = state
                        .entries
                        .entry(key.clone())
                        .or_insert_with(|| CacheEntry::new(ttl));
                    entry.last_error = Some(err.clone());
                    entry.last_error_at = Some(now);
                    Err(err)
                }
            };

            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }

            let snapshot = outcome.is_ok().then(|| Self::snapshot_value(&state));
            (outcome, snapshot)
        };

        if let Some(snapshot) = snapshot {
            self.spawn_persist(snapshot);
        }
        outcome.map_err(CacheError::Fetch)
    }

    /// Synchronously transform the cached value and bump the generation.
    ///
    /// `fetched_at` and the TTL are untouched: an optimistic write changes
    /// what the user sees, not how fresh the server copy is. A mutation
    /// error or a missing entry leaves the cache exactly as it was.
    pub fn apply_optimistic<M>(&self, key: &CacheKey, mutate: M) -> Result<u64, CacheError>
    where
        M: FnOnce(&mut V) -> Result<(), ValidationError>,
    {
        let (generation, snapshot) = {
            let mut state = self.lock_state();
            let entry = state
                .entries
                .get_mut(key)
                .ok_or_else(|| CacheError::MissingEntry {
                    key: key.to_string(),
                })?;
            let current = entry.value.as_ref().ok_or_else(|| CacheError::MissingEntry {
                key: key.to_string(),
            })?;

            // mutate a copy so a rejected mutation leaves no partial edits
            let mut candidate = current.clone();
            mutate(&mut candidate)?;

            entry.value = Some(candidate);
            entry.generation += 1;
            let generation = entry.generation;
            (generation, Self::snapshot_value(&state))
        };

        self.spawn_persist(snapshot);
        Ok(generation)
    }

    /// Force the next `ensure_fresh` for `key` to refetch, keeping the
    /// stale value visible in the meantime.
    pub fn invalidate(&self, key: &CacheKey) {
        let snapshot = {
            let mut state = self.lock_state();
            let had_entry = match state.entries.get_mut(key) {
                Some(entry) => {
                    entry.fetched_at = None;
                    true
                }
                None => false,
            };
            had_entry.then(|| Self::snapshot_value(&state))
        };
        if let Some(snapshot) = snapshot {
            self.spawn_persist(snapshot);
        }
    }

    /// Stale-tolerant read with no I/O.
    pub fn peek(&self, key: &CacheKey) -> Option<V> {
        self.lock_state()
            .entries
            .get(key)
            .and_then(|entry| entry.value.clone())
    }

    /// Generation of the entry, if present.
    pub fn generation(&self, key: &CacheKey) -> Option<u64> {
        self.lock_state().entries.get(key).map(|e| e.generation)
    }

    /// When the entry was last fetched, if present and not invalidated.
    pub fn fetched_at(&self, key: &CacheKey) -> Option<Timestamp> {
        self.lock_state()
            .entries
            .get(key)
            .and_then(|e| e.fetched_at)
    }

    /// Load the persisted snapshot into any keys not already populated.
    ///
    /// Returns the number of restored entries. Snapshot problems degrade
    /// to a cold cache with a warning; they never fail startup.
    pub async fn hydrate(&self) -> usize {
        let raw = match self.store.get(&self.storage_key()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return 0,
            Err(err) => {
                tracing::warn!(cache = %self.name, error = %err, "cache snapshot load failed");
                return 0;
            }
        };

        let snapshots: HashMap<String, EntrySnapshot<V>> = match serde_json::from_value(raw) {
            Ok(snapshots) => snapshots,
            Err(err) => {
                tracing::warn!(cache = %self.name, error = %err, "cache snapshot decode failed");
                return 0;
            }
        };

        let mut state = self.lock_state();
        let mut restored = 0;
        for (key, snapshot) in snapshots {
            state
                .entries
                .entry(CacheKey::new(key))
                .or_insert_with(|| {
                    restored += 1;
                    CacheEntry::from_snapshot(snapshot)
                });
        }
        restored
    }

    fn snapshot_value(state: &CacheState<V>) -> Value {
        let snapshots: HashMap<&str, EntrySnapshot<V>> = state
            .entries
            .iter()
            .filter_map(|(key, entry)| Some((key.as_str(), entry.snapshot()?)))
            .collect();
        serde_json::to_value(snapshots).unwrap_or(Value::Null)
    }

    /// Best-effort background persist. The data is re-derivable, so a
    /// failed write is logged and dropped.
    fn spawn_persist(&self, snapshot: Value) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(cache = %self.name, "no async runtime, snapshot persist skipped");
            return;
        };
        let store = Arc::clone(&self.store);
        let key = self.storage_key();
        let name = self.name.clone();
        handle.spawn(async move {
            if let Err(err) = store.set(&key, &snapshot).await {
                tracing::warn!(cache = %name, error = %err, "cache snapshot persist failed");
            }
        });
    }
}

impl<V> Invalidate for TtlCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn invalidate_all(&self) {
        let snapshot = {
            let mut state = self.lock_state();
            for entry in state.entries.values_mut() {
                entry.fetched_at = None;
            }
            if state.entries.is_empty() {
                None
            } else {
                Some(Self::snapshot_value(&state))
            }
        };
        if let Some(snapshot) = snapshot {
            self.spawn_persist(snapshot);
        }
    }
}

/// Clears the in-flight slot if the leading fetch is dropped before it
/// settles, so waiters fail fast instead of hanging on a wedged key.
struct FlightGuard<'a, V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    cache: &'a TtlCache<V>,
    key: CacheKey,
    armed: bool,
}

impl<V> Drop for FlightGuard<'_, V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.cache.lock_state();
            // dropping the senders settles every waiter with a recv error
            state.in_flight.remove(&self.key);
        }
    }
}
