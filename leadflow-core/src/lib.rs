//! Leadflow Core - Shared Types
//!
//! Pure data structures for the client-side sync core. All other crates
//! depend on this. This crate contains ONLY data types - no business logic.

use chrono::{DateTime, Utc};

pub mod entity;
pub mod error;
pub mod sync;

pub use entity::EntityKind;
pub use error::{FetchError, LeadflowError, LeadflowResult, ValidationError};
pub use sync::{ProviderId, SyncOutcome, SyncResult, SyncStatus, SyncedItem};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
