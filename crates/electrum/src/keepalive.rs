//! Idle-connection heartbeat.
//!
//! Every tick the monitor checks how long ago the client last sent a request.
//! Past half the period it sends a liveness probe; if the probe fails the
//! connection is assumed dead, closed, and handed to the reconnect path.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// What the monitor keeps alive.
#[async_trait]
pub trait KeepaliveTarget: Send + Sync {
    /// Send the liveness probe and wait for its answer.
    async fn probe(&self) -> Result<()>;

    /// Close the connection after a failed probe.
    ///
    /// Returns `true` when this close is the one the reconnect belongs to.
    /// `false` means the connection was already gone and whoever saw it go
    /// decides on reconnecting.
    fn force_close(&self) -> bool;

    /// Reconnection entry point, called after the retry delay.
    async fn reconnect(&self) -> Result<()>;
}

/// Instant of the last outbound request.
#[derive(Debug, Default)]
pub struct Activity {
    last: Mutex<Option<Instant>>,
}

impl Activity {
    /// Record an outbound request now.
    pub fn record(&self) {
        *self.last.lock() = Some(Instant::now());
    }

    /// Time since the last recorded request, `None` if there never was one.
    #[must_use]
    pub fn idle_for(&self) -> Option<Duration> {
        self.last.lock().map(|last| last.elapsed())
    }
}

/// Periodic idle check with a liveness probe.
#[derive(Debug)]
pub struct KeepaliveMonitor {
    period: Duration,
    probe_timeout: Duration,
    retry_delay: Duration,
    activity: Arc<Activity>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    recovery: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl KeepaliveMonitor {
    /// Create a stopped monitor.
    #[must_use]
    pub fn new(
        period: Duration,
        probe_timeout: Duration,
        retry_delay: Duration,
        activity: Arc<Activity>,
    ) -> Self {
        Self {
            period,
            probe_timeout,
            retry_delay,
            activity,
            ticker: Mutex::new(None),
            recovery: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether the tick loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start ticking. Does nothing if already running.
    ///
    /// The first tick happens one period from now. A zero period disables
    /// the monitor.
    pub fn start(&self, target: Weak<dyn KeepaliveTarget>) {
        if self.period.is_zero() {
            debug!("Keepalive disabled");
            return;
        }

        let mut ticker = self.ticker.lock();
        if ticker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        debug!("Starting keepalive every {:?}", self.period);

        let tick = Tick {
            period: self.period,
            probe_timeout: self.probe_timeout,
            retry_delay: self.retry_delay,
            activity: Arc::clone(&self.activity),
            recovery: Arc::clone(&self.recovery),
            target,
        };
        *ticker = Some(tokio::spawn(tick.run()));
    }

    /// Stop ticking. A recovery already in progress is left to finish.
    pub fn stop(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
            debug!("Keepalive stopped");
        }
    }

    /// Stop ticking and abort any recovery in progress.
    pub fn shutdown(&self) {
        self.stop();
        if let Some(handle) = self.recovery.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for KeepaliveMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Tick {
    period: Duration,
    probe_timeout: Duration,
    retry_delay: Duration,
    activity: Arc<Activity>,
    recovery: Arc<Mutex<Option<JoinHandle<()>>>>,
    target: Weak<dyn KeepaliveTarget>,
}

impl Tick {
    async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(target) = self.target.upgrade() else {
                debug!("Keepalive target dropped");
                return;
            };

            let Some(idle) = self.activity.idle_for() else {
                continue;
            };
            if idle <= self.period / 2 {
                continue;
            }

            debug!("Idle for {:?}, sending keepalive probe", idle);

            let outcome = timeout(self.probe_timeout, target.probe())
                .await
                .unwrap_or(Err(Error::Timeout(self.probe_timeout)));

            match outcome {
                Ok(()) => debug!("Keepalive probe answered"),
                Err(e) => {
                    warn!("Keepalive probe failed: {}", e);
                    drop(target);
                    self.spawn_recovery();
                    return;
                }
            }
        }
    }

    fn spawn_recovery(&self) {
        let target = self.target.clone();
        let retry_delay = self.retry_delay;

        let handle = tokio::spawn(async move {
            let Some(closer) = target.upgrade() else {
                return;
            };
            if !closer.force_close() {
                debug!("Connection already closed, not reconnecting from keepalive");
                return;
            }
            drop(closer);

            sleep(retry_delay).await;

            let Some(target) = target.upgrade() else {
                return;
            };
            info!("Reconnecting after failed keepalive probe");
            if let Err(e) = target.reconnect().await {
                warn!("Reconnect after failed keepalive probe failed: {}", e);
            }
        });

        if let Some(previous) = self.recovery.lock().replace(handle) {
            previous.abort();
        }
    }
}
