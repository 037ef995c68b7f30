//! Timing helpers shared by the workers.
//!
//! Configuration expresses every interval as fractional seconds; the
//! runtime works with [`Duration`]. Capture loops use [`RateController`]
//! to pace grabs to a camera's target frame rate.

use std::time::{Duration, Instant};

use crate::error::{PpewatchError, PpewatchResult};

/// Convert fractional seconds to a [`Duration`].
///
/// Negative, non-finite and out-of-range values are configuration errors.
pub fn secs(value: f64) -> PpewatchResult<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| {
        PpewatchError::config(format!("{value} is not a valid number of seconds: {e}"))
    })
}

/// Frame rate controller for capture pacing.
#[derive(Debug)]
pub struct RateController {
    target_interval: Duration,
    last_tick: Option<Instant>,
}

impl RateController {
    /// Create a controller targeting the given rate. A rate of zero disables pacing.
    pub fn new(target_hz: u32) -> Self {
        let target_interval = if target_hz == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(1_000_000_000 / target_hz as u64)
        };
        Self {
            target_interval,
            last_tick: None,
        }
    }

    /// Check if enough time has passed for the next tick.
    /// Returns true and updates internal state if ready.
    /// The first call always returns true.
    pub fn should_tick(&mut self, now: Instant) -> bool {
        match self.last_tick {
            None => {
                self.last_tick = Some(now);
                true
            }
            Some(last) if now.saturating_duration_since(last) >= self.target_interval => {
                self.last_tick = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Time left until the next tick is due.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last_tick {
            None => Duration::ZERO,
            Some(last) => self
                .target_interval
                .saturating_sub(now.saturating_duration_since(last)),
        }
    }

    /// Target interval between ticks.
    pub fn interval(&self) -> Duration {
        self.target_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secs_conversion() {
        assert_eq!(secs(1.5).unwrap(), Duration::from_millis(1500));
        assert_eq!(secs(0.0).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_secs_rejects_unrepresentable_values() {
        assert!(secs(-3.0).is_err());
        assert!(secs(f64::NAN).is_err());
        assert!(secs(f64::INFINITY).is_err());
        assert!(secs(1.0e30).is_err());
    }

    #[test]
    fn test_rate_controller() {
        let t0 = Instant::now();
        let mut ctrl = RateController::new(60);
        assert!(ctrl.should_tick(t0)); // first tick always fires
        assert!(!ctrl.should_tick(t0 + Duration::from_millis(1))); // too soon
        assert!(ctrl.should_tick(t0 + Duration::from_millis(17))); // ~16.67ms at 60Hz
    }

    #[test]
    fn test_rate_controller_remaining() {
        let t0 = Instant::now();
        let mut ctrl = RateController::new(10);
        assert_eq!(ctrl.remaining(t0), Duration::ZERO);
        ctrl.should_tick(t0);
        assert_eq!(ctrl.remaining(t0 + Duration::from_millis(40)), Duration::from_millis(60));
    }

    #[test]
    fn test_zero_rate_never_waits() {
        let t0 = Instant::now();
        let mut ctrl = RateController::new(0);
        assert!(ctrl.should_tick(t0));
        assert!(ctrl.should_tick(t0));
        assert_eq!(ctrl.interval(), Duration::ZERO);
    }
}
