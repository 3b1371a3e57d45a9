//! Historical session windows and the overlap groups computed from them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One contiguous presence interval for an entity on a server.
///
/// `end == None` means the session was still active when it was fetched.
/// Windows for one entity arrive in arbitrary order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub entity_id: String,
    pub server_id: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl SessionWindow {
    pub fn closed(
        entity_id: impl Into<String>,
        server_id: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            server_id: server_id.into(),
            start,
            end: Some(end),
        }
    }

    pub fn open(
        entity_id: impl Into<String>,
        server_id: impl Into<String>,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            server_id: server_id.into(),
            start,
            end: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// End used for sweeping: open windows run until `now`.
    pub fn effective_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.end.unwrap_or(now)
    }
}

/// A maximal sub-interval on one server during which a fixed set of two or
/// more entities were all present. The interval is half-open `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlapGroup {
    pub server_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub members: BTreeSet<String>,
    /// Every member was still in an open session at correlation time
    pub ongoing: bool,
}

impl OverlapGroup {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.members.contains(entity_id)
    }
}
