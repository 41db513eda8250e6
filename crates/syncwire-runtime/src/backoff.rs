//! Bounded exponential backoff for connector stream setup.
//!
//! A connector's pipes may not be immediately ready when the facade starts,
//! so stream construction retries under this policy. Nothing else in the
//! runtime retries; sync-level retry belongs to the orchestration layer
//! above this crate.

use std::time::Duration;

/// Retry policy: `max_attempts` tries with exponentially growing sleeps.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds or attempts are exhausted, sleeping
    /// between tries. Returns the last error on exhaustion.
    pub fn retry<T, E: std::fmt::Display>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, E>,
    ) -> Result<T, E> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::debug!(%what, attempt, ?delay, error = %err, "retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let backoff = Backoff {
            base: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            max_attempts: 5,
        };
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(350));
        assert_eq!(backoff.delay_for(10), Duration::from_millis(350));
    }

    #[test]
    fn test_retry_returns_first_success() {
        let backoff = Backoff {
            base: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            max_attempts: 4,
        };
        let mut calls = 0;
        let result: Result<u32, &str> = backoff.retry("op", || {
            calls += 1;
            if calls < 3 {
                Err("not ready")
            } else {
                Ok(42)
            }
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retry_exhausts_attempts() {
        let backoff = Backoff {
            base: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            max_attempts: 3,
        };
        let mut calls = 0;
        let result: Result<(), &str> = backoff.retry("op", || {
            calls += 1;
            Err("still not ready")
        });
        assert_eq!(result, Err("still not ready"));
        assert_eq!(calls, 3);
    }
}
