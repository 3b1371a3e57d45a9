//! Transition classification between consecutive snapshots.

use crate::models::{Snapshot, TransitionEvent, TransitionKind};

/// Classify the change from `previous` to `current`.
///
/// Pure and total: a missing `previous` (first observation) never yields an
/// event, and every online/offline combination maps to exactly one outcome.
pub fn detect(previous: Option<&Snapshot>, current: &Snapshot) -> Option<TransitionEvent> {
    let previous = previous?;

    let kind = match (previous.online, current.online) {
        (false, true) => TransitionKind::WentOnline,
        (true, false) => TransitionKind::WentOffline,
        (true, true) if previous.server_id != current.server_id => TransitionKind::ChangedServer,
        (true, true) | (false, false) => return None,
    };

    Some(TransitionEvent::new(kind, Some(previous.clone()), current.clone()))
}
