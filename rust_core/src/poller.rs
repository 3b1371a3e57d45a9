//! Presence poll loop
//!
//! Once per interval, for every tracked id:
//! 1. Fetch a fresh snapshot (bounded concurrency, per-id timeout)
//! 2. Classify it against the stored snapshot
//! 3. Overwrite the store entry
//! 4. Hand any transition to the notification sink
//!
//! Fetching is concurrent; steps 2 and 3 run for all ids under one store
//! lock in sorted id order, with no await while the lock is held. A failed
//! fetch leaves that id's entry untouched.

use crate::error::{ResolutionFailure, Result, TrackerError};
use crate::models::{Snapshot, TransitionEvent};
use crate::notifications::NotificationSink;
use crate::presence::{detect, PresenceStore};
use crate::providers::TrackingApi;
use crate::watchlist::Watchlist;
use futures_util::stream::{self, StreamExt};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub max_concurrent_fetches: usize,
    /// How long shutdown waits for an in-flight cycle
    pub shutdown_grace: Duration,
    /// Re-read the watchlist file before each cycle
    pub hot_reload: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(10),
            max_concurrent_fetches: 4,
            shutdown_grace: Duration::from_secs(5),
            hot_reload: true,
        }
    }
}

/// Outcome of a single poll cycle
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Ids a fetch was attempted for
    pub polled: usize,
    pub events: Vec<TransitionEvent>,
    pub failures: Vec<ResolutionFailure>,
    /// Store entries dropped because their id is no longer tracked
    pub removed: Vec<String>,
}

pub struct PresenceMonitor {
    api: Arc<dyn TrackingApi>,
    sink: Arc<dyn NotificationSink>,
    watchlist: Arc<Watchlist>,
    store: RwLock<PresenceStore>,
    config: PollerConfig,
}

impl PresenceMonitor {
    pub fn new(
        api: Arc<dyn TrackingApi>,
        sink: Arc<dyn NotificationSink>,
        watchlist: Arc<Watchlist>,
        config: PollerConfig,
    ) -> Self {
        Self {
            api,
            sink,
            watchlist,
            store: RwLock::new(PresenceStore::new()),
            config,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn watchlist(&self) -> &Arc<Watchlist> {
        &self.watchlist
    }

    /// Last known snapshot for `entity_id`
    pub fn snapshot(&self, entity_id: &str) -> Option<Snapshot> {
        self.store.read().get(entity_id).cloned()
    }

    /// All stored snapshots, sorted by id
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.store.read().snapshots()
    }

    /// Run one poll cycle. Never fails; per-id problems are in the report.
    pub async fn run_cycle(&self) -> CycleReport {
        if self.config.hot_reload {
            if let Err(e) = self.watchlist.reload().await {
                warn!("Keeping previous tracked ids, reload failed: {}", e);
            }
        }

        let ids = self.watchlist.list();
        let removed = {
            let tracked: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
            self.store.write().retain_ids(|id| tracked.contains(id))
        };
        if !removed.is_empty() {
            info!("Dropped {} untracked ids from presence store", removed.len());
        }

        let mut results: Vec<(String, Result<Snapshot>)> = stream::iter(ids.clone())
            .map(|id| async move {
                let result = self.fetch_status(&id).await;
                (id, result)
            })
            .buffer_unordered(self.config.max_concurrent_fetches.max(1))
            .collect()
            .await;
        results.sort_by(|a, b| a.0.cmp(&b.0));

        let mut report = CycleReport {
            polled: results.len(),
            removed,
            ..Default::default()
        };

        {
            let mut store = self.store.write();
            for (id, result) in results {
                match result {
                    Ok(snapshot) => {
                        if let Some(event) = detect(store.get(&id), &snapshot) {
                            report.events.push(event);
                        }
                        store.set(id, snapshot);
                    }
                    Err(e) => {
                        warn!("Status fetch for {} failed: {}", id, e);
                        report.failures.push(ResolutionFailure::new(id, &e));
                    }
                }
            }
        }

        for event in &report.events {
            info!("{}", event.summary());
            if let Err(e) = self.sink.deliver(event).await {
                warn!(
                    "Sink {} failed to deliver {}: {}",
                    self.sink.sink_name(),
                    event.event_id,
                    e
                );
            }
        }

        debug!(
            "Poll cycle done: polled={}, events={}, failures={}, removed={}",
            report.polled,
            report.events.len(),
            report.failures.len(),
            report.removed.len()
        );
        report
    }

    async fn fetch_status(&self, entity_id: &str) -> Result<Snapshot> {
        let mut snapshot =
            tokio::time::timeout(self.config.fetch_timeout, self.api.get_status(entity_id))
                .await
                .map_err(|_| TrackerError::Timeout(self.config.fetch_timeout))??;

        // Keyed by the id we asked for, whatever the upstream echoes back
        snapshot.entity_id = entity_id.to_string();
        if !snapshot.online {
            snapshot.server_id = None;
        }
        Ok(snapshot)
    }

    /// Poll until `shutdown` is cancelled. An in-flight cycle gets
    /// `shutdown_grace` to finish before it is abandoned.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Presence monitor running (interval: {:?}, tracked: {}, provider: {}, sink: {})",
            self.config.poll_interval,
            self.watchlist.len(),
            self.api.provider_name(),
            self.sink.sink_name()
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let cycle = self.run_cycle();
            tokio::pin!(cycle);

            tokio::select! {
                biased;
                _ = &mut cycle => {}
                _ = shutdown.cancelled() => {
                    info!(
                        "Shutdown requested, waiting up to {:?} for in-flight cycle",
                        self.config.shutdown_grace
                    );
                    if tokio::time::timeout(self.config.shutdown_grace, &mut cycle)
                        .await
                        .is_err()
                    {
                        warn!("Abandoning in-flight poll cycle after grace period");
                    }
                    break;
                }
            }
        }

        info!("Presence monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransitionKind;
    use crate::notifications::ChannelSink;
    use crate::providers::SessionRecord;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Clone)]
    enum Step {
        Online(&'static str),
        Offline,
        Fail,
        Hang,
        /// Online on the server after the delay in ms
        Delayed(u64, &'static str),
    }

    #[derive(Default)]
    struct ScriptedApi {
        steps: Mutex<HashMap<String, Step>>,
    }

    impl ScriptedApi {
        fn set(&self, id: &str, step: Step) {
            self.steps.lock().insert(id.to_string(), step);
        }
    }

    #[async_trait]
    impl TrackingApi for ScriptedApi {
        async fn get_status(&self, entity_id: &str) -> Result<Snapshot> {
            let step = self.steps.lock().get(entity_id).cloned();
            match step {
                Some(Step::Online(server)) => Ok(Snapshot::online(entity_id, server, Utc::now())),
                Some(Step::Offline) => Ok(Snapshot::offline(entity_id, Utc::now())),
                Some(Step::Fail) => Err(TrackerError::Upstream("503".to_string())),
                Some(Step::Hang) => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(Snapshot::offline(entity_id, Utc::now()))
                }
                Some(Step::Delayed(ms, server)) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(Snapshot::online(entity_id, server, Utc::now()))
                }
                None => Err(TrackerError::NotFound(entity_id.to_string())),
            }
        }

        async fn get_sessions(
            &self,
            _entity_id: &str,
            _since: DateTime<Utc>,
        ) -> Result<Vec<SessionRecord>> {
            Ok(vec![])
        }

        fn provider_name(&self) -> &str {
            "scripted"
        }
    }

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn deliver(&self, _event: &TransitionEvent) -> Result<()> {
            Err(TrackerError::Upstream("sink down".to_string()))
        }

        fn sink_name(&self) -> &str {
            "failing"
        }
    }

    fn fast_config() -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(10),
            fetch_timeout: Duration::from_millis(50),
            max_concurrent_fetches: 4,
            shutdown_grace: Duration::from_millis(100),
            hot_reload: true,
        }
    }

    fn monitor(
        api: Arc<ScriptedApi>,
        ids: &[&str],
    ) -> (
        PresenceMonitor,
        tokio::sync::mpsc::UnboundedReceiver<TransitionEvent>,
    ) {
        let (sink, rx) = ChannelSink::channel();
        let watchlist = Arc::new(Watchlist::from_ids(ids.iter().copied()).unwrap());
        (
            PresenceMonitor::new(api, Arc::new(sink), watchlist, fast_config()),
            rx,
        )
    }

    #[tokio::test]
    async fn test_first_observation_is_baseline_only() {
        let api = Arc::new(ScriptedApi::default());
        api.set("1", Step::Online("s1"));
        api.set("2", Step::Offline);
        let (monitor, mut rx) = monitor(api, &["1", "2"]);

        let report = monitor.run_cycle().await;
        assert_eq!(report.polled, 2);
        assert!(report.events.is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(monitor.snapshots().len(), 2);
    }

    #[tokio::test]
    async fn test_transitions_are_delivered() {
        let api = Arc::new(ScriptedApi::default());
        api.set("1", Step::Offline);
        api.set("2", Step::Online("s1"));
        let (monitor, mut rx) = monitor(api.clone(), &["1", "2"]);
        monitor.run_cycle().await;

        api.set("1", Step::Online("s9"));
        api.set("2", Step::Online("s2"));
        let report = monitor.run_cycle().await;
        assert_eq!(report.events.len(), 2);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.entity_id, "1");
        assert_eq!(first.kind, TransitionKind::WentOnline);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.entity_id, "2");
        assert_eq!(second.kind, TransitionKind::ChangedServer);

        api.set("2", Step::Offline);
        let report = monitor.run_cycle().await;
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].kind, TransitionKind::WentOffline);
    }

    #[tokio::test]
    async fn test_unchanged_status_still_refreshes_store() {
        let api = Arc::new(ScriptedApi::default());
        api.set("1", Step::Online("s1"));
        let (monitor, _rx) = monitor(api, &["1"]);

        monitor.run_cycle().await;
        let before = monitor.snapshot("1").unwrap().observed_at;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let report = monitor.run_cycle().await;

        assert!(report.events.is_empty());
        assert!(monitor.snapshot("1").unwrap().observed_at > before);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_snapshot() {
        let api = Arc::new(ScriptedApi::default());
        api.set("1", Step::Online("s1"));
        api.set("2", Step::Offline);
        let (monitor, mut rx) = monitor(api.clone(), &["1", "2"]);
        monitor.run_cycle().await;
        let stored = monitor.snapshot("1").unwrap();

        api.set("1", Step::Fail);
        api.set("2", Step::Online("s3"));
        let report = monitor.run_cycle().await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].entity_id, "1");
        assert_eq!(monitor.snapshot("1").unwrap(), stored);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.entity_id, "2");
        assert_eq!(event.kind, TransitionKind::WentOnline);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_timeout_is_a_per_id_failure() {
        let api = Arc::new(ScriptedApi::default());
        api.set("slow", Step::Hang);
        api.set("fast", Step::Offline);
        let (monitor, _rx) = monitor(api, &["fast", "slow"]);

        let report = monitor.run_cycle().await;
        assert_eq!(report.polled, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].entity_id, "slow");
        assert!(monitor.snapshot("slow").is_none());
        assert!(monitor.snapshot("fast").is_some());
    }

    #[tokio::test]
    async fn test_unknown_id_is_reported_not_found() {
        let api = Arc::new(ScriptedApi::default());
        let (monitor, _rx) = monitor(api, &["ghost"]);

        let report = monitor.run_cycle().await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0].kind,
            crate::error::FailureKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_untracked_ids_are_dropped_from_store() {
        let api = Arc::new(ScriptedApi::default());
        api.set("1", Step::Online("s1"));
        api.set("2", Step::Online("s1"));
        let (monitor, _rx) = monitor(api, &["1", "2"]);
        monitor.run_cycle().await;
        assert_eq!(monitor.snapshots().len(), 2);

        monitor.watchlist().remove("2").await.unwrap();
        let report = monitor.run_cycle().await;

        assert_eq!(report.removed, vec!["2".to_string()]);
        assert_eq!(report.polled, 1);
        assert!(monitor.snapshot("2").is_none());
    }

    #[tokio::test]
    async fn test_newly_tracked_id_has_no_synthetic_event() {
        let api = Arc::new(ScriptedApi::default());
        api.set("1", Step::Online("s1"));
        api.set("2", Step::Online("s1"));
        let (monitor, _rx) = monitor(api, &["1"]);
        monitor.run_cycle().await;

        monitor.watchlist().add("2").await.unwrap();
        let report = monitor.run_cycle().await;
        assert!(report.events.is_empty());
        assert!(monitor.snapshot("2").is_some());
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_roll_back_store() {
        let api = Arc::new(ScriptedApi::default());
        api.set("1", Step::Offline);
        let watchlist = Arc::new(Watchlist::from_ids(["1"]).unwrap());
        let monitor =
            PresenceMonitor::new(api.clone(), Arc::new(FailingSink), watchlist, fast_config());
        monitor.run_cycle().await;

        api.set("1", Step::Online("s1"));
        let report = monitor.run_cycle().await;
        assert_eq!(report.events.len(), 1);
        assert!(monitor.snapshot("1").unwrap().online);
    }

    #[tokio::test]
    async fn test_out_of_order_completions_land_on_own_ids() {
        let api = Arc::new(ScriptedApi::default());
        api.set("slow", Step::Delayed(80, "s-slow"));
        api.set("mid", Step::Delayed(40, "s-mid"));
        api.set("fast", Step::Delayed(1, "s-fast"));
        let (sink, _rx) = ChannelSink::channel();
        let watchlist = Arc::new(Watchlist::from_ids(["slow", "mid", "fast"]).unwrap());
        let config = PollerConfig {
            fetch_timeout: Duration::from_secs(2),
            ..fast_config()
        };
        let monitor = PresenceMonitor::new(api.clone(), Arc::new(sink), watchlist, config);

        let report = monitor.run_cycle().await;
        assert_eq!(report.polled, 3);
        assert!(report.failures.is_empty());
        for (id, server) in [("slow", "s-slow"), ("mid", "s-mid"), ("fast", "s-fast")] {
            let snap = monitor.snapshot(id).unwrap();
            assert_eq!(snap.entity_id, id);
            assert_eq!(snap.server_id.as_deref(), Some(server));
        }

        // Reverse the finishing order and move two of them
        api.set("slow", Step::Delayed(1, "s-slow-2"));
        api.set("fast", Step::Delayed(80, "s-fast-2"));
        let report = monitor.run_cycle().await;
        assert_eq!(report.events.len(), 2);
        for event in &report.events {
            assert_eq!(event.kind, TransitionKind::ChangedServer);
            let expected = format!("s-{}-2", event.entity_id);
            assert_eq!(event.current.entity_id, event.entity_id);
            assert_eq!(event.current.server_id.as_deref(), Some(expected.as_str()));
        }
        let server = |id: &str| monitor.snapshot(id).and_then(|s| s.server_id);
        assert_eq!(server("slow").as_deref(), Some("s-slow-2"));
        assert_eq!(server("fast").as_deref(), Some("s-fast-2"));
        assert_eq!(server("mid").as_deref(), Some("s-mid"));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let api = Arc::new(ScriptedApi::default());
        api.set("1", Step::Offline);
        let (monitor, mut rx) = monitor(api.clone(), &["1"]);
        let monitor = Arc::new(monitor);
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(monitor.clone().run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        api.set("1", Step::Online("s1"));
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, TransitionKind::WentOnline);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_abandons_hung_cycle_after_grace() {
        let api = Arc::new(ScriptedApi::default());
        api.set("1", Step::Hang);
        let (sink, _rx) = ChannelSink::channel();
        let watchlist = Arc::new(Watchlist::from_ids(["1"]).unwrap());
        let config = PollerConfig {
            fetch_timeout: Duration::from_secs(30),
            ..fast_config()
        };
        let monitor = Arc::new(PresenceMonitor::new(api, Arc::new(sink), watchlist, config));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(monitor.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();

        // Grace is 100ms; the hung fetch would take 5s
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
