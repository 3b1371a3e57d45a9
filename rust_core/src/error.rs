//! Error taxonomy shared by the tracker core.
//!
//! Per-entity failures (unknown id, unreachable upstream, timeout) are
//! reported per id and never abort a batch. Configuration errors are only
//! fatal at startup.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrackerError>;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// Entity id unknown to the tracking API
    #[error("entity {0} not found upstream")]
    NotFound(String),

    /// Transport, status or payload failure from the tracking API
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Upstream call exceeded its deadline
    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed tracked-id list or invalid interval
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller supplied an unusable request (e.g. fewer than two ids)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TrackerError::NotFound(_))
    }

    /// Whether a retry against the upstream API could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            TrackerError::Timeout(_) => true,
            TrackerError::Http(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    return true;
                }
                e.status()
                    .map(|s| s.is_server_error() || s.as_u16() == 429)
                    .unwrap_or(false)
            }
            _ => false,
        }
    }

    /// Classify this error for per-id failure reporting.
    pub fn failure_kind(&self) -> FailureKind {
        if self.is_not_found() {
            FailureKind::NotFound
        } else {
            FailureKind::Upstream
        }
    }
}

/// Why an entity could not be resolved in a cycle or correlation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Upstream,
}

/// Per-id failure marker reported alongside successful results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionFailure {
    pub entity_id: String,
    pub kind: FailureKind,
    pub message: String,
}

impl ResolutionFailure {
    pub fn new(entity_id: impl Into<String>, err: &TrackerError) -> Self {
        Self {
            entity_id: entity_id.into(),
            kind: err.failure_kind(),
            message: err.to_string(),
        }
    }
}
