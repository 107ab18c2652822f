use serde::Deserialize;
use std::time::Duration;

/// Reconnection policy
///
/// `max_attempts` counts every connection attempt, including the first one.
/// The delay before attempt `n` (1-indexed, after the first) is
/// `initial_delay * backoff_factor^(n-1)`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: usize,
    #[serde(rename = "initial_delay_ms", with = "millis")]
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Create a new exponential backoff policy
    ///
    /// # Arguments
    /// * `max_attempts` - Total connection attempts before giving up
    /// * `initial_delay` - Delay before the first retry
    /// * `backoff_factor` - Multiplier applied after every retry
    /// * `max_delay` - Upper bound for any single delay
    pub fn new(
        max_attempts: usize,
        initial_delay: Duration,
        backoff_factor: f64,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff_factor,
            max_delay,
        }
    }

    /// Same delay between every attempt
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self::new(max_attempts, delay, 1.0, delay)
    }

    /// Single attempt, no retries
    pub fn never() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Delay to wait before the given retry (0-indexed: retry 0 precedes the
    /// second connection attempt)
    pub fn delay_for(&self, retry: usize) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }

    /// Delay before connection attempt `attempt` (0-indexed)
    ///
    /// # Returns
    /// * `Some(Duration::ZERO)` - First attempt, connect immediately
    /// * `Some(duration)` - Wait this long before attempting
    /// * `None` - Attempts exhausted
    pub fn next_delay(&self, attempt: usize) -> Option<Duration> {
        if !self.should_attempt(attempt) {
            return None;
        }
        if attempt == 0 {
            Some(Duration::ZERO)
        } else {
            Some(self.delay_for(attempt - 1))
        }
    }

    /// Whether connection attempt `attempt` (0-indexed) is allowed
    pub fn should_attempt(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }

    /// Iterator over the retry delays this policy produces
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts.saturating_sub(1)).map(move |retry| self.delay_for(retry))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(3), 2.0, Duration::from_secs(30))
    }
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
