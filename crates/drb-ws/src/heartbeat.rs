//! Connection liveness monitoring.
//!
//! With server heartbeats enabled, something arrives at least once per
//! interval. Silence for `2 * interval + grace` means the connection is dead.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Extra allowance on top of two missed intervals.
pub const DEFAULT_LIVENESS_GRACE: Duration = Duration::from_secs(5);

/// Tracks the last inbound message time.
pub struct HeartbeatMonitor {
    /// `None` disables liveness checks.
    interval: Option<Duration>,
    grace: Duration,
    last_message: Mutex<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(interval: Option<Duration>, grace: Duration) -> Self {
        Self {
            interval: interval.filter(|i| !i.is_zero()),
            grace,
            last_message: Mutex::new(Instant::now()),
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Silence allowed before the connection is considered dead.
    pub fn timeout(&self) -> Option<Duration> {
        self.interval.map(|i| i * 2 + self.grace)
    }

    /// Reset state (called on connection).
    pub fn reset(&self) {
        *self.last_message.lock() = Instant::now();
    }

    /// Record that any message was received.
    pub fn record_message(&self) {
        *self.last_message.lock() = Instant::now();
    }

    pub fn time_since_last_message(&self) -> Duration {
        self.last_message.lock().elapsed()
    }

    pub fn is_timed_out(&self) -> bool {
        match self.timeout() {
            Some(timeout) => {
                let silent = self.time_since_last_message();
                if silent > timeout {
                    debug!(silent_ms = silent.as_millis() as u64, "Liveness timeout");
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Wait for the next liveness check. Never completes when disabled.
    pub async fn wait_for_check(&self) {
        match self.interval {
            Some(interval) => tokio::time::sleep(interval / 2).await,
            None => std::future::pending().await,
        }
    }
}
