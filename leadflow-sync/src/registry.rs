//! Ordered pub/sub registry for completed sync runs.

use leadflow_core::{LeadflowResult, SyncOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Handle returned by [`SubscriberRegistry::register`], used to
/// unregister. Ids come from a monotonic counter, so a handle never
/// aliases another registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&SyncOutcome) -> LeadflowResult<()> + Send + Sync>;

/// Connects a scheduler's completed runs to interested listeners.
///
/// Callbacks run synchronously in registration order. A callback
/// returning an error is logged and does not stop the remaining
/// callbacks. Callbacks must not assume anything about each other's side
/// effects across async boundaries.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Mutex<Vec<(SubscriptionId, Callback)>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Callback)>> {
        // a poisoned lock still holds consistent data; keep serving it
        self.subscribers.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Append a callback to the notify order.
    pub fn register<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SyncOutcome) -> LeadflowResult<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock_subscribers().push((id, Arc::new(callback)));
        id
    }

    /// Remove a registration. Safe to call repeatedly or for ids the
    /// registry no longer holds; returns whether anything was removed.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock_subscribers();
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }

    /// Invoke every callback with `outcome`, in registration order.
    ///
    /// The list is snapshotted first, so a callback may register or
    /// unregister without deadlocking; such changes take effect from the
    /// next notify.
    pub fn notify(&self, outcome: &SyncOutcome) {
        let snapshot: Vec<(SubscriptionId, Callback)> = self.lock_subscribers().clone();
        for (id, callback) in snapshot {
            if let Err(err) = callback(outcome) {
                tracing::error!(
                    subscriber = id.0,
                    provider = %outcome.provider,
                    error = %err,
                    "sync subscriber failed"
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock_subscribers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_subscribers().is_empty()
    }
}
