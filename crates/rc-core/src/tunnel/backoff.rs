//! Polling intervals for relay readiness checks

use std::time::Duration;

use crate::config::BackoffConfig;

/// Shortest interval handed out, so a zero setting cannot spin
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Exponentially growing poll interval with jitter, capped at `max`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    current: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max, config.multiplier, config.jitter)
    }

    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        let initial = initial.max(MIN_INTERVAL);
        Self {
            initial,
            current: initial,
            max: max.max(initial),
            // f64::max maps NaN to 1.0
            multiplier: multiplier.max(1.0),
            jitter: if jitter.is_nan() {
                0.0
            } else {
                jitter.clamp(0.0, 1.0)
            },
        }
    }

    /// The next interval, advancing the sequence
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;

        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .map_or(self.max, |grown| grown.min(self.max));

        let spread = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
        delay + Duration::from_secs_f64(spread)
    }

    /// The next interval, never sleeping past `remaining`
    pub fn next_delay_within(&mut self, remaining: Duration) -> Duration {
        self.next_delay().min(remaining)
    }

    /// Start over from the initial interval
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
