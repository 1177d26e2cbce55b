//! Leadflow Sync - Background Provider Sync
//!
//! Orchestrates the periodic pull from external providers (mail accounts,
//! the CRM API) and fans completed runs out to the rest of the client:
//!
//! - [`SyncScheduler`] runs one fetch-and-report cycle per interval with a
//!   single-flight guard, one instance per provider;
//! - [`SubscriberRegistry`] decouples the scheduler from its consumers,
//!   invoking callbacks in registration order with fault isolation;
//! - [`SyncCoordinator`] is the policy layer: it alone knows which caches
//!   a provider's sync invalidates and what notification it produces.
//!
//! The scheduler never halts on a failed cycle; failures ride to
//! subscribers inside the `SyncOutcome` and the next tick proceeds.

pub mod config;
pub mod coordinator;
pub mod registry;
pub mod scheduler;

pub use config::SyncConfig;
pub use coordinator::{ProviderPolicy, SyncCoordinator};
pub use registry::{SubscriberRegistry, SubscriptionId};
pub use scheduler::{ProviderFetcher, SchedulerMetrics, SchedulerSnapshot, SyncScheduler};
