//! Entity kinds served by the remote CRM.

use serde::{Deserialize, Serialize};

/// The entity collections the client caches locally.
///
/// Each kind maps to one remote REST collection and gets its own TTL cache
/// instance. The sync coordinator uses kinds to decide which caches a
/// completed provider sync invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Unqualified prospects captured from forms and imports.
    Lead,
    /// People attached to accounts or deals.
    Contact,
    /// Opportunities moving through the pipeline.
    Deal,
    /// Calls, meetings, tasks and other timeline entries.
    Activity,
    /// Email conversations pulled in from mail providers.
    EmailThread,
}

impl EntityKind {
    /// Stable string form, used for cache snapshot keys and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Lead => "lead",
            EntityKind::Contact => "contact",
            EntityKind::Deal => "deal",
            EntityKind::Activity => "activity",
            EntityKind::EmailThread => "email_thread",
        }
    }

    /// All kinds, in display order.
    pub fn all() -> &'static [EntityKind] {
        &[
            EntityKind::Lead,
            EntityKind::Contact,
            EntityKind::Deal,
            EntityKind::Activity,
            EntityKind::EmailThread,
        ]
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_round_trip() {
        for kind in EntityKind::all() {
            let json = serde_json::to_string(kind).unwrap();
            let back: EntityKind = serde_json::from_str(&json).unwrap();
            assert_eq!(*kind, back);
        }
    }

    #[test]
    fn test_entity_kind_as_str_matches_serde() {
        let json = serde_json::to_string(&EntityKind::EmailThread).unwrap();
        assert_eq!(json, "\"email_thread\"");
        assert_eq!(EntityKind::EmailThread.as_str(), "email_thread");
    }
}
