//! Presence Tracker Core - player presence monitoring and session correlation.
//!
//! This crate provides:
//! - Transition detection between successive presence snapshots
//! - A poll loop that keeps a last-known presence store per tracked id
//! - Session-overlap correlation across any number of players
//! - A BattleMetrics client behind the `TrackingApi` trait
//! - Notification sinks (log, webhook, channel)
//! - A persisted, hot-reloadable watchlist of tracked ids

pub mod circuit_breaker;
pub mod clients;
pub mod correlate;
pub mod error;
pub mod models;
pub mod notifications;
pub mod poller;
pub mod presence;
pub mod providers;
pub mod sessions;
pub mod watchlist;

pub use error::{FailureKind, ResolutionFailure, Result, TrackerError};
pub use models::{OverlapGroup, SessionWindow, Snapshot, TransitionEvent, TransitionKind};
