//! Tracking API abstraction
//!
//! Defines the TrackingApi trait that supplies point-in-time status and
//! session history for an entity id. The BattleMetrics client is the
//! production implementation; tests plug in scripted fakes.

use crate::error::Result;
use crate::models::Snapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source of presence data for tracked entities
#[async_trait]
pub trait TrackingApi: Send + Sync {
    /// Current status of an entity. `TrackerError::NotFound` when the id is
    /// unknown upstream.
    async fn get_status(&self, entity_id: &str) -> Result<Snapshot>;

    /// Raw session history for an entity, reaching back at least to `since`.
    /// Records may come back in any order.
    async fn get_sessions(&self, entity_id: &str, since: DateTime<Utc>)
        -> Result<Vec<SessionRecord>>;

    /// Provider name for logging and debugging
    fn provider_name(&self) -> &str;
}

/// One session as reported upstream, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub server_id: String,
    pub start: DateTime<Utc>,
    /// `None` while the session is still running
    pub stop: Option<DateTime<Utc>>,
}
