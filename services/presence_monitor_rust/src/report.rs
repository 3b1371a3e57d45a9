//! Human-readable rendering of correlation results

use std::fmt::Write;
use tracker_core::correlate::CorrelationReport;
use tracker_core::{OverlapGroup, Snapshot};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

pub fn format_duration(duration: chrono::Duration) -> String {
    let total = duration.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

pub fn format_group(group: &OverlapGroup) -> String {
    let members: Vec<&str> = group.members.iter().map(String::as_str).collect();
    let end = if group.ongoing {
        "now (ongoing)".to_string()
    } else {
        group.end.format(TIME_FORMAT).to_string()
    };
    format!(
        "server {}: {} -> {} ({}) [{}]",
        group.server_id,
        group.start.format(TIME_FORMAT),
        end,
        format_duration(group.duration()),
        members.join(", ")
    )
}

pub fn format_report(report: &CorrelationReport) -> String {
    let mut out = String::new();

    if report.groups.is_empty() {
        out.push_str("No shared sessions found\n");
    } else {
        let _ = writeln!(out, "{} shared sessions (most recent first):", report.groups.len());
        for group in &report.groups {
            let _ = writeln!(out, "  {}", format_group(group));
        }
    }

    for failure in &report.unresolved {
        let _ = writeln!(out, "[unresolved: {}] {}", failure.entity_id, failure.message);
    }
    for id in &report.without_sessions {
        let _ = writeln!(out, "[no sessions: {}]", id);
    }
    out
}

pub fn format_status(snapshot: &Snapshot) -> String {
    match (snapshot.online, snapshot.server_id.as_deref()) {
        (true, Some(server)) => format!("{} is online on server {}", snapshot.entity_id, server),
        _ => format!("{} is offline", snapshot.entity_id),
    }
}
