use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::repost::feed::Quota;

/// Added to the quota reset time so the last request of a window never lands early.
pub const RESET_BUFFER: Duration = Duration::from_secs(240);

/// A jump in remaining units larger than this between readings is treated as bogus.
pub const ANOMALY_THRESHOLD: u64 = 100;

/// Quota-driven delay between poll cycles.
#[derive(Debug, Clone, Default)]
pub struct RateController {
    state: Arc<RwLock<RateState>>,
}

#[derive(Debug, Default)]
struct RateState {
    /// Remaining units at the last accepted reading
    last_remaining: Option<u64>,
    /// Reset time of the last accepted reading
    last_reset: Option<DateTime<Utc>>,
    current_delay: Duration,
}

impl RateController {
    pub fn new() -> Self {
        Self::default()
    }

    /// The delay last computed, never below `min_delay`.
    pub fn current_delay(&self, min_delay: Duration) -> Duration {
        self.state.read().current_delay.max(min_delay)
    }

    /// Fold a new quota reading in and return the delay to use until the next one.
    ///
    /// The units left are spread evenly over the time until reset (plus
    /// [`RESET_BUFFER`]). With nothing left the delay is the whole wait.
    pub fn update(&self, quota: &Quota, now: DateTime<Utc>, min_delay: Duration) -> Duration {
        let mut state = self.state.write();

        // Only a window that has really expired may refill the quota.
        let window_expired = state.last_reset.is_some_and(|reset| now >= reset);
        if let (false, Some(previous)) = (window_expired, state.last_remaining) {
            if quota.remaining > previous.saturating_add(ANOMALY_THRESHOLD) {
                warn!(
                    previous,
                    remaining = quota.remaining,
                    "Discarding anomalous quota reading"
                );
                return state.current_delay.max(min_delay);
            }
        }

        let until_reset = (quota.reset_at - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            + RESET_BUFFER;

        let delay = if quota.remaining == 0 {
            until_reset
        } else {
            until_reset / u32::try_from(quota.remaining).unwrap_or(u32::MAX)
        }
        .max(min_delay);

        state.last_remaining = Some(quota.remaining);
        state.last_reset = Some(quota.reset_at);
        state.current_delay = delay;

        debug!(remaining = quota.remaining, delay_ms = delay.as_millis() as u64, "Updated poll delay");
        delay
    }
}
