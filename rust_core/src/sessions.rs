//! Session history fetching and normalization.
//!
//! Turns raw upstream session records into `SessionWindow`s for the
//! correlator. Records are not sorted here; the correlator sorts explicitly.

use crate::error::{ResolutionFailure, Result, TrackerError};
use crate::models::SessionWindow;
use crate::providers::{SessionRecord, TrackingApi};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounds for concurrent upstream fetches
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Deadline for a single id's fetch
    pub fetch_timeout: Duration,
    pub max_concurrent_fetches: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            max_concurrent_fetches: 4,
        }
    }
}

/// Histories for a batch of ids plus the ids that could not be fetched.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub windows_by_id: BTreeMap<String, Vec<SessionWindow>>,
    pub failures: Vec<ResolutionFailure>,
}

pub struct SessionFetcher {
    api: Arc<dyn TrackingApi>,
    options: FetchOptions,
}

impl SessionFetcher {
    pub fn new(api: Arc<dyn TrackingApi>, options: FetchOptions) -> Self {
        Self { api, options }
    }

    /// Session windows for one entity that were still running at or after
    /// `now - lookback`. Fails with an upstream error when the API is
    /// unreachable, times out, or returns malformed records.
    pub async fn fetch_sessions(
        &self,
        entity_id: &str,
        lookback: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionWindow>> {
        let since = lookback_start(now, lookback)?;
        let records = tokio::time::timeout(
            self.options.fetch_timeout,
            self.api.get_sessions(entity_id, since),
        )
        .await
        .map_err(|_| TrackerError::Timeout(self.options.fetch_timeout))??;

        let windows = normalize_records(entity_id, records, since)?;
        debug!(
            "Normalized {} session windows for {} via {}",
            windows.len(),
            entity_id,
            self.api.provider_name()
        );
        Ok(windows)
    }

    /// Fetch several ids through a bounded pool. A failing id lands in
    /// `failures` and never affects the others.
    pub async fn fetch_many(
        &self,
        entity_ids: &[String],
        lookback: chrono::Duration,
        now: DateTime<Utc>,
    ) -> FetchOutcome {
        let results: Vec<(String, Result<Vec<SessionWindow>>)> =
            stream::iter(entity_ids.to_vec())
                .map(|id| async move {
                    let result = self.fetch_sessions(&id, lookback, now).await;
                    (id, result)
                })
                .buffer_unordered(self.options.max_concurrent_fetches.max(1))
                .collect()
                .await;

        let mut outcome = FetchOutcome::default();
        for (id, result) in results {
            match result {
                Ok(windows) => {
                    outcome.windows_by_id.insert(id, windows);
                }
                Err(e) => {
                    warn!("Failed to fetch sessions for {}: {}", id, e);
                    outcome.failures.push(ResolutionFailure::new(id, &e));
                }
            }
        }
        outcome
            .failures
            .sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        outcome
    }
}

/// `now - lookback`, or `InvalidRequest` when that falls outside the
/// representable date range.
pub fn lookback_start(now: DateTime<Utc>, lookback: chrono::Duration) -> Result<DateTime<Utc>> {
    now.checked_sub_signed(lookback).ok_or_else(|| {
        TrackerError::InvalidRequest(format!(
            "lookback of {} days reaches past the supported date range",
            lookback.num_days()
        ))
    })
}

/// Map raw records to windows for `entity_id`, dropping sessions that ended
/// before `since`. A record whose stop precedes its start is malformed.
pub fn normalize_records(
    entity_id: &str,
    records: Vec<SessionRecord>,
    since: DateTime<Utc>,
) -> Result<Vec<SessionWindow>> {
    let mut windows = Vec::with_capacity(records.len());

    for record in records {
        if let Some(stop) = record.stop {
            if stop < record.start {
                return Err(TrackerError::Upstream(format!(
                    "session for {} on server {} stops ({}) before it starts ({})",
                    entity_id, record.server_id, stop, record.start
                )));
            }
            if stop < since {
                continue;
            }
        }

        windows.push(SessionWindow {
            entity_id: entity_id.to_string(),
            server_id: record.server_id,
            start: record.start,
            end: record.stop,
        });
    }

    Ok(windows)
}
