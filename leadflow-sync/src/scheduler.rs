//! Periodic fetch-and-report loop with a single-flight guard.

use crate::config::SyncConfig;
use crate::registry::SubscriberRegistry;
use async_trait::async_trait;
use chrono::Utc;
use leadflow_core::{FetchError, ProviderId, SyncOutcome, SyncResult, SyncStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// One sync provider (a mail account, the CRM API). Implemented over the
/// remote REST endpoints by the data layer; faked in tests.
#[async_trait]
pub trait ProviderFetcher: Send + Sync {
    /// Pull everything new since the last cycle.
    async fn sync(&self) -> Result<SyncResult, FetchError>;
}

/// Counters for one scheduler's lifetime.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Cycles that settled successfully.
    pub cycles_completed: AtomicU64,
    /// Cycles that settled with an error.
    pub cycles_failed: AtomicU64,
    /// Ticks skipped because a cycle was still running.
    pub ticks_skipped: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all counters.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`SchedulerMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub ticks_skipped: u64,
}

struct SchedulerInner {
    provider: ProviderId,
    fetcher: Arc<dyn ProviderFetcher>,
    registry: Arc<SubscriberRegistry>,
    config: SyncConfig,
    status: Mutex<SyncStatus>,
    metrics: SchedulerMetrics,
}

impl SchedulerInner {
    fn lock_status(&self) -> MutexGuard<'_, SyncStatus> {
        // a poisoned lock still holds a valid status; keep serving it
        self.status.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Run one cycle unless one is already in flight.
    ///
    /// Returns whether a cycle actually ran. The cooperative runtime
    /// makes the check-and-set atomic with respect to other callers: no
    /// suspension point sits between reading and writing the status.
    async fn run_cycle(&self) -> bool {
        {
            let mut status = self.lock_status();
            if status.is_running() {
                self.metrics.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    provider = %self.provider,
                    "sync cycle still running, skipping tick"
                );
                return false;
            }
            *status = SyncStatus::Running;
        }

        let started_at = Utc::now();
        let result = self.fetcher.sync().await;
        let finished_at = Utc::now();

        match &result {
            Ok(res) => {
                *self.lock_status() = SyncStatus::Completed;
                self.metrics.cycles_completed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    provider = %self.provider,
                    items_synced = res.items_synced,
                    "sync cycle completed"
                );
            }
            Err(err) if err.is_auth() => {
                // not user-visible here; the session collaborator pauses
                // the scheduler on logout
                *self.lock_status() = SyncStatus::Failed;
                self.metrics.cycles_failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    provider = %self.provider,
                    "sync cycle needs re-authentication"
                );
            }
            Err(err) => {
                *self.lock_status() = SyncStatus::Failed;
                self.metrics.cycles_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    provider = %self.provider,
                    error = %err,
                    "sync cycle failed, next tick proceeds normally"
                );
            }
        }

        // failed cycles notify too; consumers decide what to surface
        let outcome = SyncOutcome {
            provider: self.provider.clone(),
            started_at,
            finished_at,
            result,
        };
        self.registry.notify(&outcome);

        *self.lock_status() = SyncStatus::Idle;
        true
    }
}

/// Cooperative periodic runner for one provider.
///
/// `start()` arms a repeating timer; ticks that land while a cycle is
/// still in flight are skipped, never queued. `stop()` cancels the timer
/// but leaves an in-flight cycle to complete naturally; its result is
/// still delivered to subscribers.
pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn new(
        provider: ProviderId,
        fetcher: Arc<dyn ProviderFetcher>,
        registry: Arc<SubscriberRegistry>,
        config: SyncConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(SchedulerInner {
                provider,
                fetcher,
                registry,
                config,
                status: Mutex::new(SyncStatus::Idle),
                metrics: SchedulerMetrics::new(),
            }),
            shutdown,
            handle: Mutex::new(None),
        }
    }

    pub fn provider(&self) -> &ProviderId {
        &self.inner.provider
    }

    pub fn status(&self) -> SyncStatus {
        *self.inner.lock_status()
    }

    pub fn metrics(&self) -> SchedulerSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Arm the repeating timer.
    ///
    /// The first cycle runs after `initial_delay`; subsequent cycles every
    /// `interval`. Calling `start` while the loop is alive is a no-op.
    pub fn start(&self) {
        let mut handle = self.lock_handle();
        if handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            tracing::debug!(provider = %self.inner.provider, "sync loop already started");
            return;
        }

        self.shutdown.send_replace(false);
        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.shutdown.subscribe();

        *handle = Some(tokio::spawn(async move {
            tracing::info!(
                provider = %inner.provider,
                interval_secs = inner.config.interval.as_secs(),
                "sync loop started"
            );

            if !inner.config.initial_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(inner.config.initial_delay) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!(provider = %inner.provider, "sync loop stopped before first cycle");
                            return;
                        }
                    }
                }
            }

            let mut ticker = interval(inner.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            tracing::info!(provider = %inner.provider, "sync loop stopped");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        inner.run_cycle().await;
                    }
                }
            }
        }));
    }

    /// Immediate out-of-band cycle (user pressed "refresh").
    ///
    /// A no-op returning false when a cycle is already in flight.
    pub async fn trigger(&self) -> bool {
        self.inner.run_cycle().await
    }

    /// Cancel the timer. An in-flight cycle completes naturally and its
    /// result is still delivered to subscribers.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    fn lock_handle(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
