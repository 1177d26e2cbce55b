//! The notification log service.

use crate::notification::Notification;
use chrono::Utc;
use leadflow_store::DurableStore;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// Hard cap on retained notifications.
pub const MAX_NOTIFICATIONS: usize = 50;

/// Entries older than this are pruned at load time.
pub const MAX_AGE_DAYS: i64 = 7;

/// Window inside which identical (kind, message) pairs merge.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(5);

/// Tunables for the log. Defaults match production behavior; tests
/// shrink them.
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub max_entries: usize,
    pub max_age: chrono::Duration,
    pub dedup_window: Duration,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            max_entries: MAX_NOTIFICATIONS,
            max_age: chrono::Duration::days(MAX_AGE_DAYS),
            dedup_window: DEDUP_WINDOW,
        }
    }
}

impl LogOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn with_max_age(mut self, max_age: chrono::Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }
}

/// Deduplicated, bounded, persisted notification history.
///
/// Entries are kept most-recent-first. All mutations are synchronous
/// under one lock and followed by a best-effort background persist.
pub struct NotificationLog {
    store: Arc<dyn DurableStore>,
    storage_key: String,
    options: LogOptions,
    entries: Mutex<Vec<Notification>>,
}

impl NotificationLog {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self::with_options(store, LogOptions::default())
    }

    pub fn with_options(store: Arc<dyn DurableStore>, options: LogOptions) -> Self {
        Self {
            store,
            storage_key: "notifications".to_string(),
            options,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, Vec<Notification>> {
        // a poisoned lock still holds consistent data; keep serving it
        self.entries.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Hydrate from the store and prune aged-out entries.
    ///
    /// Returns the number of live entries. Load problems degrade to an
    /// empty log with a warning; they never fail startup.
    pub async fn load(&self) -> usize {
        let raw = match self.store.get(&self.storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return 0,
            Err(err) => {
                tracing::warn!(error = %err, "notification history load failed");
                return 0;
            }
        };

        let mut loaded: Vec<Notification> = match serde_json::from_value(raw) {
            Ok(loaded) => loaded,
            Err(err) => {
                tracing::warn!(error = %err, "notification history decode failed");
                return 0;
            }
        };

        let cutoff = Utc::now() - self.options.max_age;
        let before = loaded.len();
        loaded.retain(|n| n.timestamp >= cutoff);
        let pruned = before - loaded.len();

        let count = loaded.len();
        let persist = {
            let mut entries = self.lock_entries();
            *entries = loaded;
            (pruned > 0).then(|| Self::to_json(&entries))
        };
        if let Some(value) = persist {
            tracing::debug!(pruned, "pruned aged-out notifications at load");
            self.spawn_persist(value);
        }
        count
    }

    /// Record an event, merging with a recent identical one.
    ///
    /// If an entry with the same (kind, message) exists inside the dedup
    /// window, it is refreshed in place: timestamp bumped, metadata
    /// replaced, `read` cleared. Its position in the list is kept.
    /// Otherwise a new entry is prepended and the tail is trimmed to the
    /// size cap. Returns the id of the affected entry.
    pub fn add(
        &self,
        kind: impl Into<String>,
        message: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Uuid {
        let kind = kind.into();
        let message = message.into();
        let now = Utc::now();

        let (id, persist) = {
            let mut entries = self.lock_entries();

            let duplicate = entries.iter_mut().find(|n| {
                n.matches(&kind, &message)
                    && now
                        .signed_duration_since(n.timestamp)
                        .to_std()
                        .map(|age| age < self.options.dedup_window)
                        .unwrap_or(false)
            });

            let id = match duplicate {
                Some(existing) => {
                    existing.timestamp = now;
                    existing.metadata = metadata;
                    existing.read = false;
                    existing.id
                }
                None => {
                    let notification = Notification::new(kind, message, metadata);
                    let id = notification.id;
                    entries.insert(0, notification);
                    entries.truncate(self.options.max_entries);
                    id
                }
            };
            (id, Self::to_json(&entries))
        };

        self.spawn_persist(persist);
        id
    }

    /// Mark one entry as read. Returns false for unknown ids.
    pub fn mark_as_read(&self, id: Uuid) -> bool {
        let (found, persist) = {
            let mut entries = self.lock_entries();
            let found = match entries.iter_mut().find(|n| n.id == id) {
                Some(entry) => {
                    entry.read = true;
                    true
                }
                None => false,
            };
            (found, Self::to_json(&entries))
        };
        self.spawn_persist(persist);
        found
    }

    /// Mark everything read. Returns how many entries changed.
    pub fn mark_all_as_read(&self) -> usize {
        let (changed, persist) = {
            let mut entries = self.lock_entries();
            let mut changed = 0;
            for entry in entries.iter_mut().filter(|n| !n.read) {
                entry.read = true;
                changed += 1;
            }
            (changed, Self::to_json(&entries))
        };
        self.spawn_persist(persist);
        changed
    }

    /// Remove one entry. Returns false for unknown ids.
    pub fn remove(&self, id: Uuid) -> bool {
        let (found, persist) = {
            let mut entries = self.lock_entries();
            let before = entries.len();
            entries.retain(|n| n.id != id);
            (entries.len() != before, Self::to_json(&entries))
        };
        self.spawn_persist(persist);
        found
    }

    /// Drop the whole history.
    pub fn clear_all(&self) {
        let persist = {
            let mut entries = self.lock_entries();
            entries.clear();
            Self::to_json(&entries)
        };
        self.spawn_persist(persist);
    }

    /// Derived, never stored.
    pub fn unread_count(&self) -> usize {
        self.lock_entries().iter().filter(|n| !n.read).count()
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// Entries newest-first, for the UI layer.
    pub fn snapshot(&self) -> Vec<Notification> {
        self.lock_entries().clone()
    }

    fn to_json(entries: &[Notification]) -> Value {
        serde_json::to_value(entries).unwrap_or(Value::Null)
    }

    /// Best-effort background persist; the log is rebuilt from live
    /// events if a write is lost.
    fn spawn_persist(&self, value: Value) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime, notification persist skipped");
            return;
        };
        let store = Arc::clone(&self.store);
        let key = self.storage_key.clone();
        handle.spawn(async move {
            if let Err(err) = store.set(&key, &value).await {
                tracing::warn!(error = %err, "notification persist failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_store::MemoryStore;
    use serde_json::json;

    fn new_log() -> NotificationLog {
        NotificationLog::new(Arc::new(MemoryStore::new()))
    }

    async fn drain_background_tasks() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// Shift an entry's timestamp into the past.
    fn age_entry(log: &NotificationLog, id: Uuid, by: chrono::Duration) {
        let mut entries = log.lock_entries();
        let entry = entries.iter_mut().find(|n| n.id == id).unwrap();
        entry.timestamp = entry.timestamp - by;
    }

    #[tokio::test]
    async fn test_duplicate_within_window_merges() {
        let log = new_log();

        let first = log.add("email_sync", "2 new emails", Map::new());
        log.mark_as_read(first);

        let mut metadata = Map::new();
        metadata.insert("attempt".to_string(), json!(2));
        let second = log.add("email_sync", "2 new emails", metadata);

        assert_eq!(first, second);
        assert_eq!(log.len(), 1);

        let entry = &log.snapshot()[0];
        assert!(!entry.read, "merge resets read");
        assert_eq!(entry.metadata.get("attempt"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_duplicate_outside_window_creates_new_entry() {
        let log = new_log();

        let first = log.add("email_sync", "2 new emails", Map::new());
        age_entry(&log, first, chrono::Duration::seconds(10));

        let second = log.add("email_sync", "2 new emails", Map::new());
        assert_ne!(first, second);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_different_message_is_not_merged() {
        let log = new_log();
        log.add("email_sync", "2 new emails", Map::new());
        log.add("email_sync", "3 new emails", Map::new());
        log.add("crm_sync", "2 new emails", Map::new());
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn test_newest_entry_is_first() {
        let log = new_log();
        log.add("a", "first", Map::new());
        log.add("a", "second", Map::new());

        let snapshot = log.snapshot();
        assert_eq!(snapshot[0].message, "second");
        assert_eq!(snapshot[1].message, "first");
    }

    #[tokio::test]
    async fn test_merge_keeps_list_position() {
        let log = new_log();
        log.add("a", "older", Map::new());
        log.add("a", "newer", Map::new());

        // "older" merges in place; it does not jump to the front
        log.add("a", "older", Map::new());

        let snapshot = log.snapshot();
        assert_eq!(snapshot[0].message, "newer");
        assert_eq!(snapshot[1].message, "older");
    }

    #[tokio::test]
    async fn test_size_cap_drops_oldest() {
        let log = new_log();
        for i in 0..60 {
            log.add("bulk", format!("event {i}"), Map::new());
        }

        assert_eq!(log.len(), MAX_NOTIFICATIONS);
        let snapshot = log.snapshot();
        assert_eq!(snapshot[0].message, "event 59");
        assert_eq!(snapshot.last().unwrap().message, "event 10");
    }

    #[tokio::test]
    async fn test_mark_and_unread_count() {
        let log = new_log();
        let a = log.add("a", "one", Map::new());
        log.add("a", "two", Map::new());
        assert_eq!(log.unread_count(), 2);

        assert!(log.mark_as_read(a));
        assert_eq!(log.unread_count(), 1);

        assert!(!log.mark_as_read(Uuid::now_v7()));

        assert_eq!(log.mark_all_as_read(), 1);
        assert_eq!(log.unread_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let log = new_log();
        let a = log.add("a", "one", Map::new());
        log.add("a", "two", Map::new());

        assert!(log.remove(a));
        assert!(!log.remove(a));
        assert_eq!(log.len(), 1);

        log.clear_all();
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_history_survives_reload() {
        let store = Arc::new(MemoryStore::new());

        let log = NotificationLog::new(store.clone());
        log.add("crm_sync", "3 new leads", Map::new());
        drain_background_tasks().await;

        let reloaded = NotificationLog::new(store.clone());
        assert_eq!(reloaded.load().await, 1);
        assert_eq!(reloaded.snapshot()[0].message, "3 new leads");
    }

    #[tokio::test]
    async fn test_load_prunes_aged_entries() {
        let store = Arc::new(MemoryStore::new());

        let log = NotificationLog::new(store.clone());
        let old = log.add("a", "ancient", Map::new());
        log.add("a", "recent", Map::new());
        age_entry(&log, old, chrono::Duration::days(8));

        // write the aged state out, then reload into a fresh log
        let _ = log.mark_all_as_read();
        drain_background_tasks().await;

        let reloaded = NotificationLog::new(store.clone());
        assert_eq!(reloaded.load().await, 1);
        let snapshot = reloaded.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].message, "recent");
    }

    #[tokio::test]
    async fn test_load_tolerates_corrupt_history() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("notifications", &json!({"not": "a list"}))
            .await
            .unwrap();

        let log = NotificationLog::new(store.clone());
        assert_eq!(log.load().await, 0);
        assert!(log.is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn log_never_exceeds_cap(
                events in prop::collection::vec((0u8..4, 0u8..8), 0..200)
            ) {
                let log = new_log();
                for (kind, message) in events {
                    log.add(
                        format!("kind-{kind}"),
                        format!("message-{message}"),
                        Map::new(),
                    );
                    prop_assert!(log.len() <= MAX_NOTIFICATIONS);
                    prop_assert!(log.unread_count() <= log.len());
                }
            }

            #[test]
            fn snapshot_is_newest_first(
                messages in prop::collection::vec(0u32..1000, 1..60)
            ) {
                let log = new_log();
                for m in messages {
                    log.add("k", format!("m-{m}"), Map::new());
                }
                let snapshot = log.snapshot();
                for pair in snapshot.windows(2) {
                    prop_assert!(pair[0].timestamp >= pair[1].timestamp);
                }
            }
        }
    }
}
