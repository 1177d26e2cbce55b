//! Policy layer binding completed sync runs to cache invalidations and
//! notifications.
//!
//! Everything below this module is generic; the coordinator is the only
//! component that knows what a given provider's sync means for the rest
//! of the client.

use crate::registry::{SubscriberRegistry, SubscriptionId};
use crate::scheduler::SyncScheduler;
use leadflow_cache::Invalidate;
use leadflow_core::{EntityKind, ProviderId, SyncOutcome, SyncResult};
use leadflow_notify::NotificationLog;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// What one provider's completed sync does to the client.
#[derive(Debug, Clone)]
pub struct ProviderPolicy {
    pub provider: ProviderId,
    /// Name shown in notification messages ("Gmail", "Acme CRM").
    pub display_name: String,
    /// Caches stale after this provider syncs new items.
    pub invalidates: Vec<EntityKind>,
    /// Notification kind emitted for completed syncs.
    pub notification_kind: String,
}

impl ProviderPolicy {
    pub fn new(provider: impl Into<ProviderId>, display_name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            display_name: display_name.into(),
            invalidates: Vec::new(),
            notification_kind: "sync".to_string(),
        }
    }

    pub fn with_invalidates(mut self, kinds: Vec<EntityKind>) -> Self {
        self.invalidates = kinds;
        self
    }

    pub fn with_notification_kind(mut self, kind: impl Into<String>) -> Self {
        self.notification_kind = kind.into();
        self
    }
}

struct CoordinatorInner {
    notifications: Arc<NotificationLog>,
    policies: HashMap<ProviderId, ProviderPolicy>,
    caches: Mutex<HashMap<EntityKind, Arc<dyn Invalidate>>>,
    /// Cleared by `set_enabled(false)`; results that land afterwards are
    /// dropped instead of acting on stale context.
    active: AtomicBool,
    /// Providers whose auth failure has already been surfaced. Cleared by
    /// the next successful sync, so the user sees the prompt once per
    /// expiry, not once per tick.
    auth_seen: Mutex<HashSet<ProviderId>>,
    last_sync: Mutex<Option<SyncOutcome>>,
}

impl CoordinatorInner {
    fn lock_caches(&self) -> MutexGuard<'_, HashMap<EntityKind, Arc<dyn Invalidate>>> {
        self.caches.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn lock_auth_seen(&self) -> MutexGuard<'_, HashSet<ProviderId>> {
        self.auth_seen.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn lock_last_sync(&self) -> MutexGuard<'_, Option<SyncOutcome>> {
        self.last_sync.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn on_outcome(&self, outcome: &SyncOutcome) {
        if !self.active.load(Ordering::Relaxed) {
            tracing::debug!(
                provider = %outcome.provider,
                "sync result arrived after disable, dropping"
            );
            return;
        }

        *self.lock_last_sync() = Some(outcome.clone());

        match &outcome.result {
            Ok(result) => self.on_success(outcome, result),
            Err(err) if err.is_auth() => self.on_auth_failure(outcome),
            Err(err) => {
                // transient: silent unless repeated, the scheduler already
                // logged the cycle failure
                tracing::debug!(
                    provider = %outcome.provider,
                    error = %err,
                    "transient sync failure, no user-facing notification"
                );
            }
        }
    }

    fn on_success(&self, outcome: &SyncOutcome, result: &SyncResult) {
        // a working credential re-arms the one-shot auth prompt
        self.lock_auth_seen().remove(&outcome.provider);

        if result.items_synced == 0 {
            tracing::debug!(provider = %outcome.provider, "sync cycle found nothing new");
            return;
        }

        let Some(policy) = self.policies.get(&outcome.provider) else {
            tracing::warn!(
                provider = %outcome.provider,
                "sync result for unconfigured provider, ignoring"
            );
            return;
        };

        {
            let caches = self.lock_caches();
            for kind in &policy.invalidates {
                match caches.get(kind) {
                    Some(cache) => cache.invalidate_all(),
                    None => {
                        tracing::debug!(kind = %kind, "no cache registered for kind")
                    }
                }
            }
        }

        self.notifications.add(
            policy.notification_kind.clone(),
            summary_message(policy, result),
            summary_metadata(result),
        );
    }

    fn on_auth_failure(&self, outcome: &SyncOutcome) {
        let first_since_expiry = self.lock_auth_seen().insert(outcome.provider.clone());
        if !first_since_expiry {
            tracing::debug!(
                provider = %outcome.provider,
                "auth failure already surfaced, waiting for re-authentication"
            );
            return;
        }

        let display_name = self
            .policies
            .get(&outcome.provider)
            .map(|p| p.display_name.as_str())
            .unwrap_or_else(|| outcome.provider.as_str());

        let mut metadata = Map::new();
        metadata.insert("provider".to_string(), json!(outcome.provider));
        self.notifications.add(
            "auth",
            format!("{display_name} needs to be reconnected"),
            metadata,
        );
    }
}

/// Human summary for the notification list; detail goes in metadata.
fn summary_message(policy: &ProviderPolicy, result: &SyncResult) -> String {
    let noun = if result.items_synced == 1 {
        "item"
    } else {
        "items"
    };
    format!(
        "{} sync complete: {} new {}",
        policy.display_name, result.items_synced, noun
    )
}

/// Counts plus per-item rows for expandable UI.
fn summary_metadata(result: &SyncResult) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("provider".to_string(), json!(result.provider));
    metadata.insert("items_synced".to_string(), json!(result.items_synced));
    metadata.insert("total_items".to_string(), json!(result.total_items));
    metadata.insert(
        "items".to_string(),
        serde_json::to_value(&result.items).unwrap_or(Value::Null),
    );
    metadata
}

/// Composes schedulers, registry, notification log and caches.
///
/// Constructed once per process with its dependencies injected; the
/// session collaborator drives [`SyncCoordinator::set_enabled`] on
/// login/logout.
pub struct SyncCoordinator {
    inner: Arc<CoordinatorInner>,
    registry: Arc<SubscriberRegistry>,
    subscription: Mutex<Option<SubscriptionId>>,
    schedulers: Mutex<Vec<Arc<SyncScheduler>>>,
}

impl SyncCoordinator {
    /// Build a coordinator and wire it into `registry`.
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        notifications: Arc<NotificationLog>,
        policies: Vec<ProviderPolicy>,
    ) -> Self {
        let inner = Arc::new(CoordinatorInner {
            notifications,
            policies: policies
                .into_iter()
                .map(|p| (p.provider.clone(), p))
                .collect(),
            caches: Mutex::new(HashMap::new()),
            active: AtomicBool::new(true),
            auth_seen: Mutex::new(HashSet::new()),
            last_sync: Mutex::new(None),
        });

        let subscription = {
            let inner = Arc::clone(&inner);
            registry.register(move |outcome| {
                inner.on_outcome(outcome);
                Ok(())
            })
        };

        Self {
            inner,
            registry,
            subscription: Mutex::new(Some(subscription)),
            schedulers: Mutex::new(Vec::new()),
        }
    }

    /// Give the coordinator the invalidation handle for one entity kind.
    pub fn register_cache(&self, kind: EntityKind, cache: Arc<dyn Invalidate>) {
        self.inner.lock_caches().insert(kind, cache);
    }

    /// Adopt a scheduler so `set_enabled` starts and stops it.
    pub fn attach_scheduler(&self, scheduler: Arc<SyncScheduler>) {
        self.lock_schedulers().push(scheduler);
    }

    /// Start or stop background sync; driven by login/logout.
    ///
    /// Disabling also drops any result still in flight: the cycle
    /// completes and notifies the registry, but this coordinator no
    /// longer acts on it.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.active.store(enabled, Ordering::Relaxed);
        for scheduler in self.lock_schedulers().iter() {
            if enabled {
                scheduler.start();
            } else {
                scheduler.stop();
            }
        }
        tracing::info!(enabled, "background sync toggled");
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.active.load(Ordering::Relaxed)
    }

    /// The most recent outcome acted upon, if any. Runs are not retained
    /// as history.
    pub fn last_sync(&self) -> Option<SyncOutcome> {
        self.inner.lock_last_sync().clone()
    }

    /// Disconnect from the registry. Called automatically on drop.
    pub fn detach(&self) {
        let id = self
            .subscription
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take();
        if let Some(id) = id {
            self.registry.unregister(id);
        }
    }

    fn lock_schedulers(&self) -> MutexGuard<'_, Vec<Arc<SyncScheduler>>> {
        self.schedulers.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use leadflow_core::{FetchError, SyncedItem};
    use leadflow_notify::LogOptions;
    use leadflow_store::MemoryStore;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeCache {
        invalidations: AtomicUsize,
    }

    impl Invalidate for FakeCache {
        fn invalidate_all(&self) {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn email_policy() -> ProviderPolicy {
        ProviderPolicy::new("gmail", "Gmail")
            .with_invalidates(vec![EntityKind::EmailThread, EntityKind::Activity])
            .with_notification_kind("email_sync")
    }

    fn log_without_dedup() -> Arc<NotificationLog> {
        Arc::new(NotificationLog::with_options(
            Arc::new(MemoryStore::new()),
            LogOptions::new().with_dedup_window(Duration::ZERO),
        ))
    }

    fn success_outcome(provider: &str, items_synced: u32) -> SyncOutcome {
        let provider = ProviderId::from(provider);
        SyncOutcome {
            provider: provider.clone(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            result: Ok(SyncResult {
                provider,
                items_synced,
                total_items: items_synced,
                items: (0..items_synced)
                    .map(|i| SyncedItem {
                        id: format!("msg-{i}"),
                        name: "Ada Lovelace".to_string(),
                        subject: format!("Subject {i}"),
                    })
                    .collect(),
            }),
        }
    }

    fn auth_outcome(provider: &str) -> SyncOutcome {
        let provider = ProviderId::from(provider);
        SyncOutcome {
            provider: provider.clone(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            result: Err(FetchError::AuthRequired { provider }),
        }
    }

    #[tokio::test]
    async fn test_successful_sync_invalidates_and_notifies() {
        let registry = Arc::new(SubscriberRegistry::new());
        let notifications = log_without_dedup();
        let coordinator = SyncCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&notifications),
            vec![email_policy()],
        );

        let threads = Arc::new(FakeCache::default());
        let activities = Arc::new(FakeCache::default());
        coordinator.register_cache(EntityKind::EmailThread, threads.clone());
        coordinator.register_cache(EntityKind::Activity, activities.clone());

        registry.notify(&success_outcome("gmail", 3));

        assert_eq!(threads.invalidations.load(Ordering::SeqCst), 1);
        assert_eq!(activities.invalidations.load(Ordering::SeqCst), 1);

        let snapshot = notifications.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].kind, "email_sync");
        assert_eq!(snapshot[0].message, "Gmail sync complete: 3 new items");
        assert_eq!(
            snapshot[0].metadata.get("items_synced"),
            Some(&serde_json::json!(3))
        );
        assert_eq!(
            snapshot[0]
                .metadata
                .get("items")
                .and_then(|v| v.as_array())
                .map(|a| a.len()),
            Some(3)
        );

        assert_eq!(coordinator.last_sync().unwrap().items_synced(), 3);
    }

    #[tokio::test]
    async fn test_empty_sync_is_silent() {
        let registry = Arc::new(SubscriberRegistry::new());
        let notifications = log_without_dedup();
        let coordinator = SyncCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&notifications),
            vec![email_policy()],
        );

        let threads = Arc::new(FakeCache::default());
        coordinator.register_cache(EntityKind::EmailThread, threads.clone());

        registry.notify(&success_outcome("gmail", 0));

        assert_eq!(threads.invalidations.load(Ordering::SeqCst), 0);
        assert!(notifications.is_empty());
        // the run is still recorded as the most recent sync
        assert!(coordinator.last_sync().is_some());
    }

    #[tokio::test]
    async fn test_auth_failure_surfaces_once_until_reauth() {
        let registry = Arc::new(SubscriberRegistry::new());
        let notifications = log_without_dedup();
        let _coordinator = SyncCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&notifications),
            vec![email_policy()],
        );

        registry.notify(&auth_outcome("gmail"));
        registry.notify(&auth_outcome("gmail"));
        registry.notify(&auth_outcome("gmail"));

        let snapshot = notifications.snapshot();
        assert_eq!(snapshot.len(), 1, "one prompt per expiry, not per tick");
        assert_eq!(snapshot[0].kind, "auth");
        assert_eq!(snapshot[0].message, "Gmail needs to be reconnected");

        // a successful sync re-arms the prompt for the next expiry
        registry.notify(&success_outcome("gmail", 0));
        registry.notify(&auth_outcome("gmail"));
        assert_eq!(notifications.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_is_silent() {
        let registry = Arc::new(SubscriberRegistry::new());
        let notifications = log_without_dedup();
        let coordinator = SyncCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&notifications),
            vec![email_policy()],
        );

        let provider = ProviderId::from("gmail");
        registry.notify(&SyncOutcome {
            provider: provider.clone(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            result: Err(FetchError::Transient {
                reason: "502".to_string(),
            }),
        });

        assert!(notifications.is_empty());
        assert!(coordinator.last_sync().unwrap().result.is_err());
    }

    #[tokio::test]
    async fn test_disabled_coordinator_drops_late_results() {
        let registry = Arc::new(SubscriberRegistry::new());
        let notifications = log_without_dedup();
        let coordinator = SyncCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&notifications),
            vec![email_policy()],
        );

        let threads = Arc::new(FakeCache::default());
        coordinator.register_cache(EntityKind::EmailThread, threads.clone());

        coordinator.set_enabled(false);
        registry.notify(&success_outcome("gmail", 5));

        assert_eq!(threads.invalidations.load(Ordering::SeqCst), 0);
        assert!(notifications.is_empty());
        assert!(coordinator.last_sync().is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_provider_is_ignored() {
        let registry = Arc::new(SubscriberRegistry::new());
        let notifications = log_without_dedup();
        let _coordinator = SyncCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&notifications),
            vec![email_policy()],
        );

        registry.notify(&success_outcome("mystery", 4));
        assert!(notifications.is_empty());
    }

    #[tokio::test]
    async fn test_detach_on_drop_stops_acting() {
        let registry = Arc::new(SubscriberRegistry::new());
        let notifications = log_without_dedup();

        {
            let _coordinator = SyncCoordinator::new(
                Arc::clone(&registry),
                Arc::clone(&notifications),
                vec![email_policy()],
            );
            assert_eq!(registry.len(), 1);
        }

        assert!(registry.is_empty());
        registry.notify(&success_outcome("gmail", 2));
        assert!(notifications.is_empty());
    }

    #[tokio::test]
    async fn test_single_item_message_is_singular() {
        let policy = email_policy();
        let outcome = success_outcome("gmail", 1);
        let Ok(result) = &outcome.result else {
            unreachable!()
        };
        assert_eq!(
            summary_message(&policy, result),
            "Gmail sync complete: 1 new item"
        );
    }
}
