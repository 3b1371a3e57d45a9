//! Boundary sweep over session windows.
//!
//! Windows are half-open `[start, end)`. Every boundary sharing a timestamp
//! is applied before the next segment is measured, so a window ending at T
//! and another starting at T never overlap, and zero-length overlaps are
//! never reported. Presence is tracked per entity as a count of active
//! windows, so an entity with self-overlapping windows still counts once.

use crate::models::{OverlapGroup, SessionWindow};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Edge {
    // Starts sort before ends at the same instant
    Enter,
    Leave,
}

#[derive(Debug, Clone, Copy)]
struct Boundary<'a> {
    at: DateTime<Utc>,
    edge: Edge,
    entity: &'a str,
    /// Boundary belongs to a window that was still open at `now`
    open: bool,
}

/// Compute every server-grouped overlap between two or more of `ids`.
///
/// Open windows end at `now`. Windows of entities outside `ids` are ignored.
/// Output is sorted most recent first (start descending), with server id,
/// end and member list as tie-breakers, so identical inputs always give
/// identical output.
pub fn correlate(
    ids: &BTreeSet<String>,
    windows_by_id: &BTreeMap<String, Vec<SessionWindow>>,
    now: DateTime<Utc>,
) -> Vec<OverlapGroup> {
    let mut by_server: BTreeMap<&str, Vec<Boundary<'_>>> = BTreeMap::new();

    for window in windows_by_id.values().flatten() {
        if !ids.contains(&window.entity_id) {
            continue;
        }
        let end = window.effective_end(now);
        if end <= window.start {
            continue;
        }

        let boundaries = by_server.entry(window.server_id.as_str()).or_default();
        boundaries.push(Boundary {
            at: window.start,
            edge: Edge::Enter,
            entity: window.entity_id.as_str(),
            open: window.is_open(),
        });
        boundaries.push(Boundary {
            at: end,
            edge: Edge::Leave,
            entity: window.entity_id.as_str(),
            open: window.is_open(),
        });
    }

    let mut groups: Vec<OverlapGroup> = Vec::new();
    for (server_id, mut boundaries) in by_server {
        boundaries.sort_by(|a, b| {
            a.at.cmp(&b.at)
                .then(a.edge.cmp(&b.edge))
                .then(a.entity.cmp(&b.entity))
        });
        groups.extend(sweep_server(server_id, &boundaries, now));
    }

    groups.sort_by(|a, b| {
        b.start
            .cmp(&a.start)
            .then_with(|| a.server_id.cmp(&b.server_id))
            .then_with(|| b.end.cmp(&a.end))
            .then_with(|| a.members.cmp(&b.members))
    });
    groups
}

fn sweep_server(
    server_id: &str,
    boundaries: &[Boundary<'_>],
    now: DateTime<Utc>,
) -> Vec<OverlapGroup> {
    let mut active: FxHashMap<&str, u32> = FxHashMap::default();
    let mut open_active: FxHashMap<&str, u32> = FxHashMap::default();
    let mut present: BTreeSet<&str> = BTreeSet::new();
    let mut groups: Vec<OverlapGroup> = Vec::new();

    let mut i = 0;
    while i < boundaries.len() {
        let t = boundaries[i].at;
        while i < boundaries.len() && boundaries[i].at == t {
            apply(&boundaries[i], &mut active, &mut open_active, &mut present);
            i += 1;
        }

        let Some(next) = boundaries.get(i) else {
            break;
        };
        if present.len() < 2 {
            continue;
        }

        let segment_end = next.at;
        let ongoing = segment_end == now
            && present
                .iter()
                .all(|e| open_active.get(e).copied().unwrap_or(0) > 0);

        // Extend the previous group when nothing but unrelated boundaries
        // separated it from this segment
        if let Some(last) = groups.last_mut() {
            if last.end == t && last.members.iter().map(String::as_str).eq(present.iter().copied())
            {
                last.end = segment_end;
                last.ongoing = ongoing;
                continue;
            }
        }

        groups.push(OverlapGroup {
            server_id: server_id.to_string(),
            start: t,
            end: segment_end,
            members: present.iter().map(|e| e.to_string()).collect(),
            ongoing,
        });
    }

    groups
}

fn apply<'a>(
    boundary: &Boundary<'a>,
    active: &mut FxHashMap<&'a str, u32>,
    open_active: &mut FxHashMap<&'a str, u32>,
    present: &mut BTreeSet<&'a str>,
) {
    match boundary.edge {
        Edge::Enter => {
            let count = active.entry(boundary.entity).or_insert(0);
            *count += 1;
            if *count == 1 {
                present.insert(boundary.entity);
            }
            if boundary.open {
                *open_active.entry(boundary.entity).or_insert(0) += 1;
            }
        }
        Edge::Leave => {
            if let Some(count) = active.get_mut(boundary.entity) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    active.remove(boundary.entity);
                    present.remove(boundary.entity);
                }
            }
            if boundary.open {
                if let Some(count) = open_active.get_mut(boundary.entity) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        open_active.remove(boundary.entity);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn closed(entity: &str, server: &str, start: i64, end: i64) -> SessionWindow {
        SessionWindow::closed(entity, server, at(start), at(end))
    }

    fn ids(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn by_id(windows: Vec<SessionWindow>) -> BTreeMap<String, Vec<SessionWindow>> {
        let mut map: BTreeMap<String, Vec<SessionWindow>> = BTreeMap::new();
        for w in windows {
            map.entry(w.entity_id.clone()).or_default().push(w);
        }
        map
    }

    fn members(group: &OverlapGroup) -> Vec<&str> {
        group.members.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_simple_overlap() {
        let windows = by_id(vec![closed("a", "s", 0, 10), closed("b", "s", 5, 15)]);
        let groups = correlate(&ids(&["a", "b"]), &windows, at(100));

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].server_id, "s");
        assert_eq!(groups[0].start, at(5));
        assert_eq!(groups[0].end, at(10));
        assert_eq!(members(&groups[0]), vec!["a", "b"]);
        assert!(!groups[0].ongoing);
    }

    #[test]
    fn test_different_servers_never_group() {
        let windows = by_id(vec![closed("a", "s1", 0, 10), closed("b", "s2", 0, 10)]);
        assert!(correlate(&ids(&["a", "b"]), &windows, at(100)).is_empty());
    }

    #[test]
    fn test_touching_windows_do_not_overlap() {
        let windows = by_id(vec![closed("a", "s", 0, 5), closed("b", "s", 5, 10)]);
        assert!(correlate(&ids(&["a", "b"]), &windows, at(100)).is_empty());
    }

    #[test]
    fn test_member_change_splits_groups() {
        let windows = by_id(vec![
            closed("a", "s", 0, 10),
            closed("b", "s", 0, 10),
            closed("c", "s", 3, 6),
        ]);
        let groups = correlate(&ids(&["a", "b", "c"]), &windows, at(100));

        assert_eq!(groups.len(), 3);
        // Most recent first
        assert_eq!((groups[0].start, groups[0].end), (at(6), at(10)));
        assert_eq!(members(&groups[0]), vec!["a", "b"]);
        assert_eq!((groups[1].start, groups[1].end), (at(3), at(6)));
        assert_eq!(members(&groups[1]), vec!["a", "b", "c"]);
        assert_eq!((groups[2].start, groups[2].end), (at(0), at(3)));
        assert_eq!(members(&groups[2]), vec!["a", "b"]);
    }

    #[test]
    fn test_unrelated_boundaries_do_not_fragment() {
        // c comes and goes on its own while a and b overlap
        // a reconnects mid-overlap with a back-to-back session
        let windows = by_id(vec![
            closed("a", "s", 0, 8),
            closed("a", "s", 8, 20),
            closed("b", "s", 0, 20),
            closed("c", "s", 25, 30),
            closed("d", "s", 40, 50),
        ]);

        let groups = correlate(&ids(&["a", "b", "c", "d"]), &windows, at(100));
        assert_eq!(groups.len(), 1);
        assert_eq!((groups[0].start, groups[0].end), (at(0), at(20)));
    }

    #[test]
    fn test_self_overlapping_windows_count_once() {
        let windows = by_id(vec![closed("a", "s", 0, 10), closed("a", "s", 5, 15)]);
        assert!(correlate(&ids(&["a"]), &windows, at(100)).is_empty());

        let mut windows = windows;
        windows.insert("b".to_string(), vec![closed("b", "s", 8, 12)]);
        let groups = correlate(&ids(&["a", "b"]), &windows, at(100));
        assert_eq!(groups.len(), 1);
        assert_eq!((groups[0].start, groups[0].end), (at(8), at(12)));
    }

    #[test]
    fn test_entities_outside_request_are_ignored() {
        let windows = by_id(vec![closed("a", "s", 0, 10), closed("x", "s", 0, 10)]);
        assert!(correlate(&ids(&["a", "b"]), &windows, at(100)).is_empty());
    }

    #[test]
    fn test_unsorted_input() {
        let windows = by_id(vec![
            closed("a", "s", 50, 60),
            closed("a", "s", 0, 10),
            closed("b", "s", 55, 70),
            closed("b", "s", 5, 8),
        ]);
        let groups = correlate(&ids(&["a", "b"]), &windows, at(100));
        assert_eq!(groups.len(), 2);
        assert_eq!((groups[0].start, groups[0].end), (at(55), at(60)));
        assert_eq!((groups[1].start, groups[1].end), (at(5), at(8)));
    }

    #[test]
    fn test_open_windows_run_until_now() {
        let windows = by_id(vec![
            SessionWindow::open("a", "s", at(0)),
            SessionWindow::open("b", "s", at(30)),
        ]);
        let groups = correlate(&ids(&["a", "b"]), &windows, at(100));
        assert_eq!(groups.len(), 1);
        assert_eq!((groups[0].start, groups[0].end), (at(30), at(100)));
        assert!(groups[0].ongoing);
    }

    #[test]
    fn test_closed_member_is_not_ongoing() {
        let windows = by_id(vec![
            SessionWindow::open("a", "s", at(0)),
            closed("b", "s", 30, 100),
        ]);
        let groups = correlate(&ids(&["a", "b"]), &windows, at(100));
        assert_eq!(groups.len(), 1);
        assert!(!groups[0].ongoing);
    }

    #[test]
    fn test_open_window_starting_after_now_is_skipped() {
        let windows = by_id(vec![
            SessionWindow::open("a", "s", at(200)),
            closed("b", "s", 150, 300),
        ]);
        assert!(correlate(&ids(&["a", "b"]), &windows, at(100)).is_empty());
    }

    #[test]
    fn test_groups_sorted_most_recent_first_across_servers() {
        let windows = by_id(vec![
            closed("a", "s1", 0, 10),
            closed("b", "s1", 0, 10),
            closed("a", "s2", 20, 30),
            closed("b", "s2", 20, 30),
        ]);
        let groups = correlate(&ids(&["a", "b"]), &windows, at(100));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].server_id, "s2");
        assert_eq!(groups[1].server_id, "s1");
    }

    #[test]
    fn test_correlation_is_idempotent() {
        let windows = by_id(vec![
            closed("a", "s1", 0, 40),
            closed("b", "s1", 10, 30),
            closed("c", "s1", 20, 50),
            closed("a", "s2", 60, 90),
            closed("c", "s2", 70, 80),
            SessionWindow::open("b", "s2", at(75)),
        ]);
        let request = ids(&["a", "b", "c"]);

        let first = correlate(&request, &windows, at(100));
        let second = correlate(&request, &windows, at(100));
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_members_cover_whole_interval() {
        let windows = by_id(vec![
            closed("a", "s", 0, 40),
            closed("b", "s", 10, 30),
            closed("c", "s", 20, 50),
        ]);
        let groups = correlate(&ids(&["a", "b", "c"]), &windows, at(100));

        for group in &groups {
            for member in &group.members {
                let covered = windows[member]
                    .iter()
                    .any(|w| w.start <= group.start && w.effective_end(at(100)) >= group.end);
                assert!(covered, "{} does not cover {:?}", member, group);
            }
        }
    }
}
