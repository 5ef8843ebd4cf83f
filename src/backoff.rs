//! Reconnect delays: exponential growth, capped, with random jitter.

use std::time::Duration;

use rand::Rng;

/// Reconnect delay policy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnect.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random, 0.0 to 1.0.
    pub jitter: f64,
    /// Consecutive failures tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: 8,
        }
    }
}

impl BackoffConfig {
    /// Set the number of consecutive failures tolerated.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the jitter fraction, clamped to 0.0..=1.0.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }
}

/// Iterator of reconnect delays; yields `None` once attempts run out.
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
    current_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            config,
            attempt: 0,
        }
    }

    /// Delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether another delay is available.
    pub fn can_retry(&self) -> bool {
        self.attempt < self.config.max_attempts
    }

    /// Call after a healthy connection so the next outage starts from the initial delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.config.initial_delay;
    }

    fn delay_with_jitter(&self, base: Duration) -> Duration {
        if self.config.jitter <= 0.0 {
            return base;
        }
        let range = base.as_secs_f64() * self.config.jitter;
        let jitter = rand::thread_rng().gen_range(-range..=range);
        Duration::from_secs_f64((base.as_secs_f64() + jitter).max(0.0))
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if !self.can_retry() {
            return None;
        }

        let delay = self.delay_with_jitter(self.current_delay).min(self.config.max_delay);
        self.attempt += 1;
        self.current_delay = Duration::from_secs_f64(
            (self.current_delay.as_secs_f64() * self.config.multiplier).min(self.config.max_delay.as_secs_f64()),
        );
        Some(delay)
    }
}
