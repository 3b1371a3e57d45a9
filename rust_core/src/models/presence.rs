//! Point-in-time presence observations and the transitions between them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entity's observed status at a point in time.
///
/// Immutable once created: the poll cycle replaces snapshots in the store,
/// it never edits them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entity_id: String,
    pub online: bool,
    /// Server the entity is on; `None` whenever `online` is false
    pub server_id: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn online(
        entity_id: impl Into<String>,
        server_id: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            online: true,
            server_id: Some(server_id.into()),
            observed_at,
        }
    }

    pub fn offline(entity_id: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            online: false,
            server_id: None,
            observed_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    WentOnline,
    WentOffline,
    ChangedServer,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WentOnline => "went_online",
            Self::WentOffline => "went_offline",
            Self::ChangedServer => "changed_server",
        }
    }
}

/// A classified change between two snapshots of the same entity.
///
/// Produced once per poll cycle and consumed once by a notification sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// Delivery id so sinks can drop duplicates
    pub event_id: Uuid,
    pub kind: TransitionKind,
    pub entity_id: String,
    pub previous: Option<Snapshot>,
    pub current: Snapshot,
}

impl TransitionEvent {
    pub fn new(kind: TransitionKind, previous: Option<Snapshot>, current: Snapshot) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            entity_id: current.entity_id.clone(),
            previous,
            current,
        }
    }

    /// Short human-readable line used by log and webhook sinks.
    pub fn summary(&self) -> String {
        let previous_server = self
            .previous
            .as_ref()
            .and_then(|p| p.server_id.as_deref())
            .unwrap_or("-");
        let current_server = self.current.server_id.as_deref().unwrap_or("-");

        match self.kind {
            TransitionKind::WentOnline => {
                format!("{} is online on server {}", self.entity_id, current_server)
            }
            TransitionKind::WentOffline => {
                format!("{} went offline (last server {})", self.entity_id, previous_server)
            }
            TransitionKind::ChangedServer => format!(
                "{} changed server {} -> {}",
                self.entity_id, previous_server, current_server
            ),
        }
    }
}
