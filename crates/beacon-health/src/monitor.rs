//! Heartbeat monitor — the background reaper for silent services.
//!
//! Each tick runs two store operations:
//!
//! 1. **Flag**: mark every healthy service whose last heartbeat is older
//!    than the liveness threshold as unhealthy.
//! 2. **Evict**: delete every service that was flagged by an *earlier*
//!    tick and has not heartbeat since.
//!
//! A service flagged on tick N is therefore removed on tick N+1 at the
//! earliest, leaving one tick period for a late heartbeat to revive it.
//! A failed or timed-out store call ends the tick early; the loop itself
//! never exits on error.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use beacon_state::{RegistryStore, ServiceName, StateResult, SweepOutcome};

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::ticker::Ticker;

/// The store operations the monitor needs.
pub trait LivenessStore: Clone + Send + Sync + 'static {
    fn mark_unhealthy_if_stale(&self, threshold: Duration) -> StateResult<SweepOutcome>;
    fn evict_unhealthy(&self, flagged_before: u64) -> StateResult<Vec<ServiceName>>;
}

impl LivenessStore for RegistryStore {
    fn mark_unhealthy_if_stale(&self, threshold: Duration) -> StateResult<SweepOutcome> {
        RegistryStore::mark_unhealthy_if_stale(self, threshold)
    }

    fn evict_unhealthy(&self, flagged_before: u64) -> StateResult<Vec<ServiceName>> {
        RegistryStore::evict_unhealthy(self, flagged_before)
    }
}

/// What one tick changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Services flagged unhealthy by this tick's sweep.
    pub flagged: Vec<ServiceName>,
    /// Services removed by this tick's evict phase.
    pub evicted: Vec<ServiceName>,
}

/// Periodically flags and evicts services that stopped sending heartbeats.
pub struct HeartbeatMonitor<S: LivenessStore = RegistryStore> {
    store: S,
    config: MonitorConfig,
}

impl<S: LivenessStore> HeartbeatMonitor<S> {
    /// Create a new monitor over `store`.
    pub fn new(store: S, config: MonitorConfig) -> Result<Self, MonitorError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Run a single flag-then-evict tick.
    pub async fn run_once(&self) -> Result<TickReport, MonitorError> {
        let threshold = self.config.liveness_threshold;
        let sweep = self
            .call(move |store| store.mark_unhealthy_if_stale(threshold))
            .await?;
        for name in &sweep.flagged {
            warn!(%name, threshold_secs = threshold.as_secs(), "service missed heartbeats, marked unhealthy");
        }

        let swept_at = sweep.swept_at;
        let evicted = self
            .call(move |store| store.evict_unhealthy(swept_at))
            .await?;
        for name in &evicted {
            info!(%name, "evicted unhealthy service");
        }

        Ok(TickReport {
            flagged: sweep.flagged,
            evicted,
        })
    }

    /// Run the monitor loop until `shutdown` fires or the ticker closes.
    pub async fn run<T: Ticker>(self, mut ticker: T, mut shutdown: watch::Receiver<bool>) {
        info!(
            threshold_secs = self.config.liveness_threshold.as_secs(),
            tick_secs = self.config.tick_period.as_secs(),
            "heartbeat monitor started"
        );
        if self.config.tick_period > self.config.liveness_threshold {
            warn!("tick period exceeds liveness threshold; detection will lag");
        }

        loop {
            let fired = tokio::select! {
                fired = ticker.tick() => fired,
                _ = shutdown.changed() => {
                    info!("heartbeat monitor shutting down");
                    break;
                }
            };
            if !fired {
                info!("heartbeat ticker closed, monitor stopping");
                break;
            }

            match self.run_once().await {
                Ok(report) => debug!(
                    flagged = report.flagged.len(),
                    evicted = report.evicted.len(),
                    "monitor tick complete"
                ),
                Err(e) => error!(error = %e, "monitor tick failed, retrying next tick"),
            }
        }
    }

    /// Run a blocking store call on the blocking pool, bounded by the deadline.
    async fn call<T, F>(&self, op: F) -> Result<T, MonitorError>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> StateResult<T> + Send + 'static,
    {
        let store = self.store.clone();
        let deadline = self.config.store_deadline;
        let task = tokio::task::spawn_blocking(move || op(&store));
        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join)) => Err(MonitorError::TaskFailed(join.to_string())),
            Err(_) => Err(MonitorError::DeadlineExceeded(deadline)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use beacon_state::{ManualClock, StateError};

    use crate::ticker;

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            liveness_threshold: Duration::from_secs(300),
            tick_period: Duration::from_secs(40),
            store_deadline: Duration::from_secs(5),
        }
    }

    fn test_store() -> (RegistryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = RegistryStore::open_in_memory()
            .unwrap()
            .with_clock(clock.clone());
        (store, clock)
    }

    /// Wraps a real store and injects failures or delays.
    #[derive(Clone)]
    struct FlakyStore {
        inner: RegistryStore,
        fail_sweep: Arc<AtomicBool>,
        fail_evict: Arc<AtomicBool>,
        sweep_delay: Option<Duration>,
        evict_calls: Arc<AtomicUsize>,
    }

    impl FlakyStore {
        fn new(inner: RegistryStore) -> Self {
            Self {
                inner,
                fail_sweep: Arc::new(AtomicBool::new(false)),
                fail_evict: Arc::new(AtomicBool::new(false)),
                sweep_delay: None,
                evict_calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl LivenessStore for FlakyStore {
        fn mark_unhealthy_if_stale(&self, threshold: Duration) -> StateResult<SweepOutcome> {
            if let Some(delay) = self.sweep_delay {
                std::thread::sleep(delay);
            }
            if self.fail_sweep.load(Ordering::SeqCst) {
                return Err(StateError::Transaction("database unavailable".into()));
            }
            self.inner.mark_unhealthy_if_stale(threshold)
        }

        fn evict_unhealthy(&self, flagged_before: u64) -> StateResult<Vec<ServiceName>> {
            self.evict_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_evict.load(Ordering::SeqCst) {
                return Err(StateError::Write("disk full".into()));
            }
            self.inner.evict_unhealthy(flagged_before)
        }
    }

    fn names(store: &RegistryStore) -> Vec<String> {
        store.list().unwrap().into_iter().map(|e| e.name).collect()
    }

    #[test]
    fn rejects_invalid_config() {
        let (store, _) = test_store();
        let config = MonitorConfig {
            store_deadline: Duration::ZERO,
            ..test_config()
        };
        assert!(HeartbeatMonitor::new(store, config).is_err());
    }

    #[tokio::test]
    async fn stale_service_flagged_then_evicted_next_tick() {
        let (store, clock) = test_store();
        let monitor = HeartbeatMonitor::new(store.clone(), test_config()).unwrap();
        store.register("svc-a", "127.0.0.1", 9000).unwrap();

        clock.advance(Duration::from_secs(301));
        let report = monitor.run_once().await.unwrap();
        assert_eq!(report.flagged, vec!["svc-a".to_string()]);
        assert!(report.evicted.is_empty());
        // Listing does not care about health.
        assert_eq!(names(&store), vec!["svc-a".to_string()]);

        clock.advance(Duration::from_secs(40));
        let report = monitor.run_once().await.unwrap();
        assert!(report.flagged.is_empty());
        assert_eq!(report.evicted, vec!["svc-a".to_string()]);
        assert!(names(&store).is_empty());
    }

    #[tokio::test]
    async fn heartbeat_before_threshold_resets_clock() {
        let (store, clock) = test_store();
        let monitor = HeartbeatMonitor::new(store.clone(), test_config()).unwrap();
        store.register("svc-a", "127.0.0.1", 9000).unwrap();

        clock.advance(Duration::from_secs(250));
        store.heartbeat("svc-a").unwrap();

        clock.advance(Duration::from_secs(60));
        let report = monitor.run_once().await.unwrap();
        assert_eq!(report, TickReport::default());
        assert!(store.get("svc-a").unwrap().unwrap().is_healthy);
    }

    #[tokio::test]
    async fn heartbeat_in_grace_window_prevents_eviction() {
        let (store, clock) = test_store();
        let monitor = HeartbeatMonitor::new(store.clone(), test_config()).unwrap();
        store.register("svc-a", "127.0.0.1", 9000).unwrap();

        clock.advance(Duration::from_secs(301));
        monitor.run_once().await.unwrap();

        clock.advance(Duration::from_secs(20));
        store.heartbeat("svc-a").unwrap();

        clock.advance(Duration::from_secs(20));
        let report = monitor.run_once().await.unwrap();
        assert!(report.evicted.is_empty());
        let rec = store.get("svc-a").unwrap().unwrap();
        assert!(rec.is_healthy);
        assert_eq!(rec.version, 3);
    }

    #[tokio::test]
    async fn version_increases_across_lifecycle() {
        let (store, clock) = test_store();
        let monitor = HeartbeatMonitor::new(store.clone(), test_config()).unwrap();

        let mut seen = vec![store.register("svc-a", "h", 1).unwrap().version];
        seen.push(store.heartbeat("svc-a").unwrap().version);
        clock.advance(Duration::from_secs(301));
        monitor.run_once().await.unwrap();
        seen.push(store.get("svc-a").unwrap().unwrap().version);
        seen.push(store.heartbeat("svc-a").unwrap().version);

        assert!(seen.windows(2).all(|w| w[0] < w[1]), "{seen:?}");
    }

    #[tokio::test]
    async fn failed_sweep_skips_evict_phase() {
        let (store, clock) = test_store();
        let flaky = FlakyStore::new(store.clone());
        let monitor = HeartbeatMonitor::new(flaky.clone(), test_config()).unwrap();
        store.register("svc-a", "h", 1).unwrap();

        flaky.fail_sweep.store(true, Ordering::SeqCst);
        clock.advance(Duration::from_secs(301));
        let err = monitor.run_once().await.unwrap_err();
        assert!(matches!(err, MonitorError::Store(ref e) if e.is_storage()));
        assert_eq!(flaky.evict_calls.load(Ordering::SeqCst), 0);
        assert!(store.get("svc-a").unwrap().unwrap().is_healthy);
    }

    #[tokio::test]
    async fn failed_evict_retried_next_tick() {
        let (store, clock) = test_store();
        let flaky = FlakyStore::new(store.clone());
        let monitor = HeartbeatMonitor::new(flaky.clone(), test_config()).unwrap();
        store.register("svc-a", "h", 1).unwrap();

        clock.advance(Duration::from_secs(301));
        monitor.run_once().await.unwrap();

        flaky.fail_evict.store(true, Ordering::SeqCst);
        clock.advance(Duration::from_secs(40));
        assert!(monitor.run_once().await.is_err());
        assert_eq!(names(&store), vec!["svc-a".to_string()]);

        flaky.fail_evict.store(false, Ordering::SeqCst);
        clock.advance(Duration::from_secs(40));
        let report = monitor.run_once().await.unwrap();
        assert_eq!(report.evicted, vec!["svc-a".to_string()]);
    }

    #[tokio::test]
    async fn slow_store_call_hits_deadline() {
        let (store, _) = test_store();
        let mut flaky = FlakyStore::new(store);
        flaky.sweep_delay = Some(Duration::from_millis(500));
        let config = MonitorConfig {
            store_deadline: Duration::from_millis(20),
            ..test_config()
        };
        let monitor = HeartbeatMonitor::new(flaky.clone(), config).unwrap();

        let err = monitor.run_once().await.unwrap_err();
        assert!(matches!(err, MonitorError::DeadlineExceeded(d) if d == Duration::from_millis(20)));
        assert_eq!(flaky.evict_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn loop_driven_by_manual_ticker() {
        let (store, clock) = test_store();
        let monitor = HeartbeatMonitor::new(store.clone(), test_config()).unwrap();
        let (ticker, handle) = ticker::manual();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(monitor.run(ticker, shutdown_rx));

        store.register("svc-a", "h", 1).unwrap();
        store.register("svc-b", "h", 2).unwrap();

        clock.advance(Duration::from_secs(301));
        store.heartbeat("svc-b").unwrap();
        assert!(handle.tick().await);
        assert!(!store.get("svc-a").unwrap().unwrap().is_healthy);

        clock.advance(Duration::from_secs(40));
        assert!(handle.tick().await);
        assert_eq!(names(&store), vec!["svc-b".to_string()]);

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn loop_survives_failed_tick() {
        let (store, clock) = test_store();
        let flaky = FlakyStore::new(store.clone());
        let monitor = HeartbeatMonitor::new(flaky.clone(), test_config()).unwrap();
        let (ticker, handle) = ticker::manual();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(monitor.run(ticker, shutdown_rx));

        store.register("svc-a", "h", 1).unwrap();
        clock.advance(Duration::from_secs(301));

        flaky.fail_sweep.store(true, Ordering::SeqCst);
        assert!(handle.tick().await);
        assert!(store.get("svc-a").unwrap().unwrap().is_healthy);

        flaky.fail_sweep.store(false, Ordering::SeqCst);
        assert!(handle.tick().await);
        assert!(!store.get("svc-a").unwrap().unwrap().is_healthy);

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn loop_stops_on_shutdown() {
        let (store, _) = test_store();
        let monitor = HeartbeatMonitor::new(store, test_config()).unwrap();
        let (ticker, _handle) = ticker::manual();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(monitor.run(ticker, shutdown_rx));

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
