use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Seconds since the epoch, with sub-second precision.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// One persisted section payload and the moment it was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub timestamp: f64,
    pub payload: Value,
}

impl CacheEntry {
    #[must_use]
    pub const fn new(payload: Value, timestamp: f64) -> Self {
        Self { timestamp, payload }
    }

    #[must_use]
    pub fn age(&self, now: f64) -> f64 {
        now - self.timestamp
    }

    /// Entries from the future count as expired, as do entries at least `interval` old.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn is_expired(&self, interval: u64, now: f64) -> bool {
        let age = self.age(now);
        !(0.0..interval as f64).contains(&age)
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn time_until_expiry(&self, interval: u64, now: f64) -> Option<f64> {
        if self.is_expired(interval, now) {
            None
        } else {
            Some(interval as f64 - self.age(now))
        }
    }
}
