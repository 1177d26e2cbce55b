//! Notification entries.

use leadflow_core::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One user-facing event in the notification log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// UUIDv7, timestamp-sortable.
    pub id: Uuid,
    /// Event kind ("email_sync", "crm_sync", "auth", ...). Kinds are
    /// assigned by the sync coordinator; the log treats them as opaque.
    pub kind: String,
    /// Human-readable summary shown in the notification list.
    pub message: String,
    /// Creation time, bumped when a duplicate merges into this entry.
    pub timestamp: Timestamp,
    /// Cleared back to false when a duplicate merges in.
    pub read: bool,
    /// Structured detail for expandable UI (counts, per-item rows).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Notification {
    pub fn new(
        kind: impl Into<String>,
        message: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind: kind.into(),
            message: message.into(),
            timestamp: chrono::Utc::now(),
            read: false,
            metadata,
        }
    }

    /// Whether `other_kind`/`other_message` would merge into this entry.
    pub fn matches(&self, other_kind: &str, other_message: &str) -> bool {
        self.kind == other_kind && self.message == other_message
    }
}
