//! Heartbeat
//!
//! Keeps the gateway connection honest with periodic pings. Any inbound
//! frame counts as liveness; a connection silent for longer than the
//! configured timeout is treated as lost.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::infrastructure::config::HeartbeatSettings;

/// What the I/O task should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping frame.
    SendPing,
    /// Nothing heard within the timeout; drop the connection.
    Expired,
}

/// Ping scheduler and liveness tracker, owned by the I/O task.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Interval,
    timeout: Duration,
    last_seen: Instant,
}

impl Heartbeat {
    /// Heartbeat whose first tick fires one interval from now.
    #[must_use]
    pub fn new(settings: &HeartbeatSettings) -> Self {
        let now = Instant::now();
        let mut interval = tokio::time::interval_at(now + settings.interval, settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            interval,
            timeout: settings.timeout,
            last_seen: now,
        }
    }

    /// Note that a frame arrived.
    pub fn record_activity(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_seen.elapsed()
    }

    /// Wait for the next tick. Cancel-safe.
    pub async fn tick(&mut self) -> HeartbeatAction {
        self.interval.tick().await;
        self.evaluate(Instant::now())
    }

    fn evaluate(&self, now: Instant) -> HeartbeatAction {
        if now.saturating_duration_since(self.last_seen) >= self.timeout {
            HeartbeatAction::Expired
        } else {
            HeartbeatAction::SendPing
        }
    }
}
