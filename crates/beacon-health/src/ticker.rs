//! Tick sources for the monitor loop.
//!
//! Production uses [`IntervalTicker`]; tests use [`manual`] to fire ticks
//! one at a time and wait for each to finish.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::MAX_PERIOD;

/// Something the monitor waits on between ticks.
pub trait Ticker: Send {
    /// Wait for the next tick. Returns `false` once no further tick will fire.
    fn tick(&mut self) -> impl Future<Output = bool> + Send;
}

/// Fixed-period ticker. The first tick fires one period after creation.
///
/// Periods longer than [`MAX_PERIOD`] are clamped to it.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let period = period.min(MAX_PERIOD);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        // A slow tick must not cause a burst of catch-up sweeps.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Create a manually driven ticker and the handle that drives it.
pub fn manual() -> (ManualTicker, TickHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ManualTicker {
            requests: rx,
            in_flight: None,
        },
        TickHandle { requests: tx },
    )
}

/// Ticker that fires only when its [`TickHandle`] asks it to.
pub struct ManualTicker {
    requests: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
    in_flight: Option<oneshot::Sender<()>>,
}

impl Ticker for ManualTicker {
    async fn tick(&mut self) -> bool {
        // Being asked for the next tick means the previous one has finished.
        if let Some(done) = self.in_flight.take() {
            let _ = done.send(());
        }
        match self.requests.recv().await {
            Some(done) => {
                self.in_flight = Some(done);
                true
            }
            None => false,
        }
    }
}

/// Drives a [`ManualTicker`]. Dropping every handle ends the monitor loop.
#[derive(Clone)]
pub struct TickHandle {
    requests: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

impl TickHandle {
    /// Fire one tick and wait until the monitor has finished processing it.
    ///
    /// Returns `false` if the monitor loop is no longer running.
    pub async fn tick(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.requests.send(tx).is_err() {
            return false;
        }
        rx.await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn interval_ticker_waits_one_period_first() {
        let period = Duration::from_secs(40);
        let start = Instant::now();
        let mut ticker = IntervalTicker::new(period);

        assert!(ticker.tick().await);
        assert!(start.elapsed() >= period);

        assert!(ticker.tick().await);
        assert!(start.elapsed() >= period * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_ticker_clamps_huge_period() {
        let start = Instant::now();
        let mut ticker = IntervalTicker::new(Duration::MAX);

        assert!(ticker.tick().await);
        let waited = start.elapsed();
        assert!(waited >= MAX_PERIOD && waited < MAX_PERIOD + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn manual_ticker_acks_after_next_wait() {
        let (mut ticker, handle) = manual();

        let driver = tokio::spawn(async move {
            let mut fired = 0;
            while ticker.tick().await {
                fired += 1;
            }
            fired
        });

        assert!(handle.tick().await);
        assert!(handle.tick().await);
        drop(handle);

        assert_eq!(driver.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn tick_handle_reports_dead_loop() {
        let (ticker, handle) = manual();
        drop(ticker);
        assert!(!handle.tick().await);
    }
}
