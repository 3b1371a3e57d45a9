//! Presence monitor service
//!
//! Wires the tracker core to the BattleMetrics API, the environment
//! configuration and the command line.

pub mod cli;
pub mod commands;
pub mod config;
pub mod report;
