//! Reconnection delay schedule.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a cap, symmetric jitter and a floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    pub floor: Duration,
    /// Fraction of the base delay added or removed at random (0.2 = ±20 %).
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            max: Duration::from_millis(30_000),
            floor: Duration::from_millis(250),
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base × 2^(attempt−1), max)`. Attempt 0 is treated like attempt 1.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u64 << exponent;
        let millis = (self.base.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(millis).min(self.max)
    }

    /// The jittered delay actually used for a scheduled reconnect.
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let spread = base * self.jitter.clamp(0.0, 1.0);
        let offset = if spread > 0.0 {
            rng.random_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_secs_f64((base + offset).max(0.0)).max(self.floor)
    }
}
