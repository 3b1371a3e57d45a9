//! Session overlap correlation
//!
//! Finds timeframes where two or more requested players shared a server.
//! `correlate` is the pure sweep over already-fetched windows;
//! `correlate_players` drives one on-demand request end to end: validate the
//! id list, fetch every history through the bounded pool, sweep, and report
//! the ids that could not be resolved next to the groups that could.

mod sweep;

pub use sweep::correlate;

use crate::error::{ResolutionFailure, Result, TrackerError};
use crate::models::OverlapGroup;
use crate::providers::TrackingApi;
use crate::sessions::{lookback_start, FetchOptions, SessionFetcher};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Result of one correlation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationReport {
    /// Overlaps, most recent first
    pub groups: Vec<OverlapGroup>,
    /// Ids whose history could not be fetched
    pub unresolved: Vec<ResolutionFailure>,
    /// Ids that resolved but had no sessions in the lookback window
    pub without_sessions: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub lookback_secs: i64,
}

impl CorrelationReport {
    pub fn unresolved_ids(&self) -> Vec<&str> {
        self.unresolved
            .iter()
            .map(|f| f.entity_id.as_str())
            .collect()
    }
}

/// Collapse duplicates (keeping first-seen order) and reject requests that
/// cannot produce an overlap.
pub fn validate_request(ids: &[String]) -> Result<Vec<String>> {
    let mut seen = BTreeSet::new();
    let mut distinct = Vec::with_capacity(ids.len());

    for raw in ids {
        let id = raw.trim();
        if id.is_empty() {
            return Err(TrackerError::InvalidRequest(
                "empty player id in correlation request".to_string(),
            ));
        }
        if seen.insert(id.to_string()) {
            distinct.push(id.to_string());
        }
    }

    if distinct.len() < 2 {
        return Err(TrackerError::InvalidRequest(format!(
            "correlation needs at least two distinct ids, got {}",
            distinct.len()
        )));
    }
    Ok(distinct)
}

/// Run one correlation request against the tracking API.
pub async fn correlate_players(
    api: Arc<dyn TrackingApi>,
    ids: &[String],
    lookback: chrono::Duration,
    options: FetchOptions,
) -> Result<CorrelationReport> {
    correlate_players_at(api, ids, lookback, options, Utc::now()).await
}

/// As `correlate_players`, with an explicit correlation time. Open sessions
/// are treated as ending at `now`.
pub async fn correlate_players_at(
    api: Arc<dyn TrackingApi>,
    ids: &[String],
    lookback: chrono::Duration,
    options: FetchOptions,
    now: DateTime<Utc>,
) -> Result<CorrelationReport> {
    let ids = validate_request(ids)?;
    if lookback <= chrono::Duration::zero() {
        return Err(TrackerError::InvalidRequest(
            "lookback window must be positive".to_string(),
        ));
    }
    lookback_start(now, lookback)?;

    info!(
        "Correlating {} players over the last {} days",
        ids.len(),
        lookback.num_days()
    );

    let fetcher = SessionFetcher::new(api, options);
    let outcome = fetcher.fetch_many(&ids, lookback, now).await;

    let without_sessions: Vec<String> = ids
        .iter()
        .filter(|id| {
            outcome
                .windows_by_id
                .get(*id)
                .map_or(false, |windows| windows.is_empty())
        })
        .cloned()
        .collect();

    let requested: BTreeSet<String> = ids.iter().cloned().collect();
    let groups = correlate(&requested, &outcome.windows_by_id, now);

    info!(
        "Correlation found {} overlap groups ({} unresolved, {} without sessions)",
        groups.len(),
        outcome.failures.len(),
        without_sessions.len()
    );

    Ok(CorrelationReport {
        groups,
        unresolved: outcome.failures,
        without_sessions,
        generated_at: now,
        lookback_secs: lookback.num_seconds(),
    })
}
