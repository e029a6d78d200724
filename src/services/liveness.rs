use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval};
use tracing::{info, warn};

/// Timestamp of the most recent user activity.
#[derive(Clone)]
pub struct LivenessTracker {
    last_activity: Arc<Mutex<Instant>>,
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self {
            last_activity: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        self.idle_for(now) >= timeout
    }

    /// Resolves once no activity has been seen for `timeout`, checking every
    /// `check_every`.
    pub async fn wait_until_idle(&self, check_every: Duration, timeout: Duration) -> Duration {
        let mut ticker = interval(check_every);
        loop {
            ticker.tick().await;
            let now = Instant::now();
            if self.is_stale(now, timeout) {
                let idle = self.idle_for(now);
                info!(idle_ms = idle.as_millis() as u64, "No activity, shutting down");
                return idle;
            }
        }
    }

    pub fn spawn_watchdog(&self, check_every: Duration, timeout: Duration) -> JoinHandle<Duration> {
        let tracker = self.clone();
        tokio::spawn(async move { tracker.wait_until_idle(check_every, timeout).await })
    }
}

/// Round-trip to whatever keeps the session alive.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LivenessPinger: Send + Sync {
    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Degraded,
}

/// Turns ping results into a connectivity state. Failures are not retried;
/// the next scheduled check decides again.
pub struct ConnectivityMonitor {
    pinger: Arc<dyn LivenessPinger>,
    state: watch::Sender<Connectivity>,
}

impl ConnectivityMonitor {
    pub fn new(pinger: Arc<dyn LivenessPinger>) -> Self {
        let (state, _) = watch::channel(Connectivity::Online);
        Self { pinger, state }
    }

    pub fn current(&self) -> Connectivity {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    pub async fn check(&self) -> Connectivity {
        let next = match self.pinger.ping().await {
            Ok(()) => Connectivity::Online,
            Err(e) => {
                warn!(error = %e, "Keep-alive ping failed");
                Connectivity::Degraded
            }
        };
        let previous = self.state.send_replace(next);
        if previous != next && next == Connectivity::Online {
            info!("Keep-alive restored");
        }
        next
    }

    pub fn spawn_periodic(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.check().await;
            }
        })
    }
}
