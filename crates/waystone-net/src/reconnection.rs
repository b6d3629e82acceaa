//! Backoff schedule for outbound peer connections.
//!
//! Attempt `n` (starting at 0) waits `base_delay * factor^n`, capped at
//! `cap`, with up to `±jitter` proportional noise so that servers restarted
//! together do not reconnect in lockstep.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub base_delay: Duration,
    pub factor: f64,
    pub cap: Duration,
    /// After this many failures the peer's queued envelopes are dropped and
    /// the schedule restarts.
    pub attempts_per_cycle: u32,
    /// Proportional noise in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(30),
            attempts_per_cycle: 20,
            jitter: 0.25,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt`, without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.factor.max(1.0).powi(exponent);
        if !secs.is_finite() || secs >= self.cap.as_secs_f64() {
            return self.cap;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Failure count for one peer.
#[derive(Debug)]
pub struct ReconnectState {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectState {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Delay before the next retry, or `None` once the cycle is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.next_delay_with(&mut rand::rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Duration> {
        if self.attempts >= self.config.attempts_per_cycle {
            return None;
        }
        let delay = self.config.delay_for(self.attempts);
        self.attempts += 1;

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return Some(delay);
        }
        let noisy = delay.mul_f64(rng.random_range((1.0 - jitter)..=(1.0 + jitter)));
        Some(noisy.min(self.config.cap))
    }

    /// Connected; the next failure starts from the base delay again.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
