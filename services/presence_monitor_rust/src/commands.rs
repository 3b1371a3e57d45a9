//! Command handlers behind the CLI
//!
//! Each handler returns the text to print so the binary stays a thin
//! dispatcher and the handlers can be driven from tests.

use crate::cli::TrackAction;
use crate::config::{lookback_days, Config};
use crate::report::{format_report, format_status};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracker_core::correlate::correlate_players;
use tracker_core::notifications::{LogSink, NotificationSink, WebhookSink};
use tracker_core::poller::PresenceMonitor;
use tracker_core::providers::TrackingApi;
use tracker_core::watchlist::{validate_entity_id, Watchlist};

/// Webhook sink when a URL is configured, log sink otherwise
pub fn build_sink(config: &Config) -> Result<Arc<dyn NotificationSink>> {
    match &config.webhook_url {
        Some(url) => {
            let sink = WebhookSink::new(url.clone()).context("Failed to build webhook sink")?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(LogSink)),
    }
}

pub async fn load_watchlist(config: &Config) -> Result<Arc<Watchlist>> {
    let watchlist = Watchlist::load(&config.monitored_ids_file)
        .await
        .with_context(|| {
            format!(
                "Failed to load tracked ids from {}",
                config.monitored_ids_file.display()
            )
        })?;
    Ok(Arc::new(watchlist))
}

/// Run the poll loop until `shutdown` is cancelled.
pub async fn run_monitor(
    config: &Config,
    api: Arc<dyn TrackingApi>,
    sink: Arc<dyn NotificationSink>,
    shutdown: CancellationToken,
) -> Result<()> {
    let watchlist = load_watchlist(config).await?;
    if watchlist.is_empty() {
        info!("No tracked ids yet; add some with `track add <id>`");
    }

    let monitor = Arc::new(PresenceMonitor::new(api, sink, watchlist, config.poller()));
    monitor.run(shutdown).await;
    Ok(())
}

/// Apply a watchlist action. A newly added id is followed by its current
/// status; a failed status lookup does not undo the add.
pub async fn track(
    config: &Config,
    api: Arc<dyn TrackingApi>,
    action: &TrackAction,
) -> Result<String> {
    let watchlist = load_watchlist(config).await?;

    let output = match action {
        TrackAction::Add { player_id } => {
            let id = player_id.trim();
            let headline = if watchlist.add(id).await? {
                format!("Now tracking {}", id)
            } else {
                format!("{} is already tracked", id)
            };
            match api.get_status(id).await {
                Ok(snapshot) => format!("{}\n{}", headline, format_status(&snapshot)),
                Err(e) => {
                    warn!("Status lookup for {} failed: {}", id, e);
                    format!("{}\n(status unavailable: {})", headline, e)
                }
            }
        }
        TrackAction::Remove { player_id } => {
            if watchlist.remove(player_id).await? {
                format!("Stopped tracking {}", player_id.trim())
            } else {
                format!("{} is not tracked", player_id.trim())
            }
        }
        TrackAction::List => {
            let ids = watchlist.list();
            if ids.is_empty() {
                "No tracked players".to_string()
            } else {
                ids.join("\n")
            }
        }
    };
    Ok(output)
}

pub async fn status(api: Arc<dyn TrackingApi>, player_id: &str) -> Result<String> {
    let id = player_id.trim();
    validate_entity_id(id)?;

    let snapshot = api
        .get_status(id)
        .await
        .with_context(|| format!("Failed to fetch status for {}", id))?;
    Ok(format_status(&snapshot))
}

pub async fn correlate(
    config: &Config,
    api: Arc<dyn TrackingApi>,
    player_ids: &[String],
    days: Option<i64>,
    json: bool,
) -> Result<String> {
    let lookback = match days {
        Some(days) => lookback_days(days)?,
        None => config.lookback(),
    };

    let ids: Vec<String> = player_ids
        .iter()
        .flat_map(|raw| raw.split(|c: char| c == ',' || c.is_whitespace()))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();

    let report = correlate_players(api, &ids, lookback, config.fetch_options()).await?;

    if json {
        Ok(serde_json::to_string_pretty(&report)?)
    } else {
        Ok(format_report(&report))
    }
}
