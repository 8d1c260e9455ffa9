use std::time::Duration;

/// Default attempts per part before the upload is abandoned.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Per-part retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per part, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt. Zero retries immediately.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::ZERO,
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Retries up to `max_attempts` with no delay.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay after failed attempt `attempt` (1-based), with ±25% jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / u32::MAX as f64)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        Duration::from_secs_f64((capped + jitter * offset).max(0.0))
    }
}
