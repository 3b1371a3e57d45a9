use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracker_core::clients::{BattleMetricsConfig, DEFAULT_BASE_URL};
use tracker_core::poller::PollerConfig;
use tracker_core::sessions::FetchOptions;
use tracker_core::TrackerError;

#[derive(Clone, Debug)]
pub struct Config {
    pub api_url: String,
    pub api_token: Option<String>,
    pub monitored_ids_file: PathBuf,
    pub poll_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub max_concurrent_fetches: usize,
    pub correlation_lookback_days: i64,
    pub shutdown_grace_secs: u64,
    pub watchlist_hot_reload: bool,
    pub webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, TrackerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TrackerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            api_url: non_empty("BATTLEMETRICS_API_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_token: non_empty("BATTLEMETRICS_TOKEN"),
            monitored_ids_file: non_empty("MONITORED_IDS_JSON_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("monitored_ids.json")),
            poll_interval_secs: parse_or(&lookup, "POLL_INTERVAL_SECS", 10)?,
            fetch_timeout_secs: parse_or(&lookup, "FETCH_TIMEOUT_SECS", 10)?,
            max_concurrent_fetches: parse_or(&lookup, "MAX_CONCURRENT_FETCHES", 4)?,
            correlation_lookback_days: parse_or(&lookup, "CORRELATION_LOOKBACK_DAYS", 30)?,
            shutdown_grace_secs: parse_or(&lookup, "SHUTDOWN_GRACE_SECS", 5)?,
            watchlist_hot_reload: parse_bool_or(&lookup, "WATCHLIST_HOT_RELOAD", true)?,
            webhook_url: non_empty("WEBHOOK_URL"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), TrackerError> {
        if self.poll_interval_secs == 0 {
            return Err(TrackerError::Configuration(
                "POLL_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(TrackerError::Configuration(
                "FETCH_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(TrackerError::Configuration(
                "MAX_CONCURRENT_FETCHES must be greater than zero".to_string(),
            ));
        }
        if self.correlation_lookback_days <= 0 {
            return Err(TrackerError::Configuration(
                "CORRELATION_LOOKBACK_DAYS must be greater than zero".to_string(),
            ));
        }
        if self.correlation_lookback_days > MAX_LOOKBACK_DAYS {
            return Err(TrackerError::Configuration(format!(
                "CORRELATION_LOOKBACK_DAYS must be at most {}",
                MAX_LOOKBACK_DAYS
            )));
        }
        Ok(())
    }

    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_concurrent_fetches: self.max_concurrent_fetches,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            hot_reload: self.watchlist_hot_reload,
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_concurrent_fetches: self.max_concurrent_fetches,
        }
    }

    pub fn battlemetrics(&self) -> BattleMetricsConfig {
        self.battlemetrics_with_token(None)
    }

    /// Client config with a per-request token taking precedence over
    /// `BATTLEMETRICS_TOKEN`.
    pub fn battlemetrics_with_token(&self, token: Option<&str>) -> BattleMetricsConfig {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| self.api_token.clone());

        BattleMetricsConfig {
            base_url: self.api_url.clone(),
            access_token: token,
            ..Default::default()
        }
    }

    pub fn lookback(&self) -> chrono::Duration {
        lookback_days(self.correlation_lookback_days.clamp(1, MAX_LOOKBACK_DAYS))
            .unwrap_or_else(|_| chrono::Duration::days(30))
    }
}

/// Upper bound for any lookback window, about a century
pub const MAX_LOOKBACK_DAYS: i64 = 36_500;

/// A lookback of `days`, rejected when outside `1..=MAX_LOOKBACK_DAYS`.
pub fn lookback_days(days: i64) -> Result<chrono::Duration, TrackerError> {
    if !(1..=MAX_LOOKBACK_DAYS).contains(&days) {
        return Err(TrackerError::InvalidRequest(format!(
            "lookback must be between 1 and {} days, got {}",
            MAX_LOOKBACK_DAYS, days
        )));
    }
    chrono::Duration::try_days(days).ok_or_else(|| {
        TrackerError::InvalidRequest(format!("lookback of {} days is out of range", days))
    })
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, TrackerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e| {
            TrackerError::Configuration(format!("{} has invalid value {:?}: {}", key, raw, e))
        }),
        _ => Ok(default),
    }
}

fn parse_bool_or<F>(lookup: &F, key: &str, default: bool) -> Result<bool, TrackerError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(TrackerError::Configuration(format!(
                "{} must be a boolean, got {:?}",
                key, v
            ))),
        },
    }
}
