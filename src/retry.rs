//! Retry with exponential backoff at the external-call boundary.

use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::ExternalCallError;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

/// Final result of a retried call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ExternalCallError>,
    pub attempts: u32,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the given 1-based attempt fails.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exp);
        if secs.is_nan() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_backoff)
    }

    /// Calls `call` until it succeeds, fails permanently, runs out of
    /// attempts, or the next backoff would cross `deadline`.
    ///
    /// `call` receives the 1-based attempt number.
    pub fn run<T, F>(&self, deadline: Instant, mut call: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Result<T, ExternalCallError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match call(attempt) {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= max_attempts {
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                };
            }

            let delay = self.backoff(attempt);
            if Instant::now() + delay >= deadline {
                debug!(attempt, error = %err, "no time left to retry");
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                };
            }

            debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying external call");
            thread::sleep(delay);
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            backoff_multiplier: 2.0,
        }
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            backoff_multiplier: 2.0,
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(300));
        assert_eq!(p.backoff(30), Duration::from_millis(300));
    }

    #[test]
    fn transient_failures_are_retried() {
        let calls = Cell::new(0);
        let out = fast().run(far(), |attempt| {
            calls.set(calls.get() + 1);
            if attempt < 3 {
                Err(ExternalCallError::transient("503"))
            } else {
                Ok("patch")
            }
        });
        assert_eq!(out.result, Ok("patch"));
        assert_eq!(out.attempts, 3);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn permanent_failure_stops_immediately() {
        let out: RetryOutcome<()> = fast().run(far(), |_| Err(ExternalCallError::permanent("400")));
        assert_eq!(out.attempts, 1);
        assert!(out.result.is_err());
    }

    #[test]
    fn attempts_are_bounded() {
        let out: RetryOutcome<()> = fast().run(far(), |_| Err(ExternalCallError::transient("503")));
        assert_eq!(out.attempts, 3);
    }

    #[test]
    fn backoff_never_crosses_deadline() {
        let slow = RetryPolicy {
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(5),
            ..fast()
        };
        let started = Instant::now();
        let out: RetryOutcome<()> = slow.run(Instant::now() + Duration::from_millis(50), |_| {
            Err(ExternalCallError::transient("503"))
        });
        assert_eq!(out.attempts, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
