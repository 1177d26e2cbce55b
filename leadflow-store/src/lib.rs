//! Leadflow Store - Durable Key/Value Persistence
//!
//! Defines the `DurableStore` abstraction the cache and notification log
//! persist through, plus two backends: an in-memory store for tests and
//! ephemeral sessions, and a JSON-file-per-key store for real clients.
//!
//! Stored values are JSON blobs. Writes elsewhere in the system are
//! best-effort: the data is a cache, re-derivable from the remote API, so
//! a failed write is logged and otherwise ignored.

use async_trait::async_trait;
use leadflow_core::LeadflowError;
use serde_json::Value;
use thiserror::Error;

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Persistence layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for LeadflowError {
    fn from(err: StoreError) -> Self {
        LeadflowError::Store {
            reason: err.to_string(),
        }
    }
}

/// Durable key/value persistence for JSON blobs.
///
/// Backends are swappable; the rest of the system only sees this trait.
/// A missing key reads as `Ok(None)`, never as an error. `remove` on a
/// missing key is a no-op.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read the blob stored under `key`.
    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Write `value` under `key`, replacing any previous blob.
    async fn set(&self, key: &str, value: &Value) -> StoreResult<()>;

    /// Delete the blob under `key`, if present.
    async fn remove(&self, key: &str) -> StoreResult<()>;
}
