//! Provider sync payloads and run states.

use crate::error::FetchError;
use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Identifies one sync provider (a mail account or the CRM API itself).
///
/// Providers are configured at runtime, so this is an opaque string id
/// rather than a closed enum. Only the sync coordinator attaches meaning
/// to individual ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One item reported by a provider sync, in the shape the UI expands
/// inside a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedItem {
    /// Remote id of the synced record.
    pub id: String,
    /// Display name (sender, contact name, ...).
    pub name: String,
    /// Subject or one-line summary.
    pub subject: String,
}

/// The payload a provider fetcher produces for one completed sync cycle.
///
/// The scheduler and subscriber registry treat this as opaque; only the
/// sync coordinator interprets its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Which provider produced this result.
    pub provider: ProviderId,
    /// Number of new items pulled in this cycle.
    pub items_synced: u32,
    /// Total items the provider reported on the remote side.
    pub total_items: u32,
    /// Per-item detail for the synced items.
    pub items: Vec<SyncedItem>,
}

impl SyncResult {
    /// An empty result for a cycle that found nothing new.
    pub fn empty(provider: ProviderId) -> Self {
        Self {
            provider,
            items_synced: 0,
            total_items: 0,
            items: Vec::new(),
        }
    }
}

/// What subscribers receive when a sync cycle settles.
///
/// Failed cycles notify too; the error rides in `result` and consumers
/// decide whether to surface it.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub provider: ProviderId,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub result: Result<SyncResult, FetchError>,
}

impl SyncOutcome {
    /// Items synced, or zero for a failed cycle.
    pub fn items_synced(&self) -> u32 {
        self.result.as_ref().map(|r| r.items_synced).unwrap_or(0)
    }
}

/// Lifecycle of one sync cycle.
///
/// Legal transitions: `Idle -> Running -> {Completed, Failed} -> Idle`.
/// Exactly one `Running` cycle may exist per provider at any instant; a
/// tick arriving while `Running` is skipped, not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, SyncStatus::Running)
    }

    /// Whether a new cycle may begin from this state.
    pub fn can_start(&self) -> bool {
        !self.is_running()
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_result_serde_round_trip() {
        let result = SyncResult {
            provider: ProviderId::from("gmail"),
            items_synced: 2,
            total_items: 40,
            items: vec![
                SyncedItem {
                    id: "msg-1".to_string(),
                    name: "Ada Lovelace".to_string(),
                    subject: "Re: proposal".to_string(),
                },
                SyncedItem {
                    id: "msg-2".to_string(),
                    name: "Grace Hopper".to_string(),
                    subject: "Intro call".to_string(),
                },
            ],
        };

        let json = serde_json::to_string(&result).unwrap();
        let back: SyncResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result, back);
    }

    #[test]
    fn test_provider_id_is_transparent_in_json() {
        let provider = ProviderId::from("outlook");
        assert_eq!(serde_json::to_string(&provider).unwrap(), "\"outlook\"");
    }

    #[test]
    fn test_status_transitions() {
        assert!(SyncStatus::Idle.can_start());
        assert!(SyncStatus::Completed.can_start());
        assert!(SyncStatus::Failed.can_start());
        assert!(!SyncStatus::Running.can_start());
        assert!(SyncStatus::Running.is_running());
    }

    #[test]
    fn test_outcome_items_synced_for_failure() {
        let outcome = SyncOutcome {
            provider: ProviderId::from("gmail"),
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
            result: Err(FetchError::Transient {
                reason: "503".to_string(),
            }),
        };
        assert_eq!(outcome.items_synced(), 0);
    }
}
