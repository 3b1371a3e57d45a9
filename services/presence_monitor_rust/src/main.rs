use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use presence_monitor_rust::cli::{Args, Command};
use presence_monitor_rust::commands;
use presence_monitor_rust::config::Config;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracker_core::clients::BattleMetricsClient;
use tracker_core::providers::TrackingApi;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env().context("Invalid configuration")?;
    let api: Arc<dyn TrackingApi> = Arc::new(BattleMetricsClient::new(config.battlemetrics()));

    match args.command {
        Command::Monitor => {
            info!("Starting presence monitor...");
            let sink = commands::build_sink(&config)?;
            let shutdown = CancellationToken::new();

            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
                info!("Received Ctrl+C, shutting down...");
                signal_token.cancel();
            });

            commands::run_monitor(&config, api, sink, shutdown).await?;
            info!("Presence monitor exited cleanly");
        }
        Command::Track { action } => {
            println!("{}", commands::track(&config, api, &action).await?);
        }
        Command::Status { player_id } => {
            println!("{}", commands::status(api, &player_id).await?);
        }
        Command::Correlate {
            player_ids,
            days,
            json,
            access_token,
        } => {
            let api: Arc<dyn TrackingApi> = match access_token.as_deref() {
                Some(token) => Arc::new(BattleMetricsClient::new(
                    config.battlemetrics_with_token(Some(token)),
                )),
                None => api,
            };
            let output = commands::correlate(&config, api, &player_ids, days, json).await?;
            print!("{}", output);
            if json {
                println!();
            }
        }
    }

    Ok(())
}
