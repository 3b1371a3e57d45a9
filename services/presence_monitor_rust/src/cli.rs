//! CLI argument parsing using clap.

use clap::{Parser, Subcommand};

/// Presence monitor - watch tracked players and correlate their sessions
#[derive(Parser, Debug, Clone)]
#[command(name = "presence_monitor")]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Poll tracked players until interrupted
    Monitor,

    /// Manage the tracked player list
    Track {
        #[command(subcommand)]
        action: TrackAction,
    },

    /// Fetch one player's current status
    Status {
        player_id: String,
    },

    /// Find timeframes where players shared a server
    Correlate {
        /// Player ids, comma or space separated
        #[arg(required = true, num_args = 1.., value_delimiter = ',')]
        player_ids: Vec<String>,

        /// Lookback window in days (default: CORRELATION_LOOKBACK_DAYS)
        #[arg(short = 'd', long)]
        days: Option<i64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// BattleMetrics token for this request only (overrides BATTLEMETRICS_TOKEN)
        #[arg(long)]
        access_token: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum TrackAction {
    /// Start tracking a player
    Add { player_id: String },
    /// Stop tracking a player
    Remove { player_id: String },
    /// List tracked players
    List,
}
