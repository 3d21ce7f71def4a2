use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};

/// Bounded retry with exponential backoff, applied to transient failures only.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Retry up to `max_attempts` with no delay between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        if secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }

    /// Run `op` until it succeeds, fails structurally, or attempts are exhausted.
    ///
    /// `op` receives the 1-based attempt number. `on_retry` is called with the failed attempt,
    /// its error and the delay before the next attempt. Returns the final result together with
    /// the number of attempts made.
    pub fn run<T>(
        &self,
        mut op: impl FnMut(u32) -> PipelineResult<T>,
        mut on_retry: impl FnMut(u32, &PipelineError, Duration),
    ) -> (PipelineResult<T>, u32) {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(v) => return (Ok(v), attempt),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    on_retry(attempt, &e, delay);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RetryPolicy;
    use crate::error::PipelineError;

    fn unavailable() -> PipelineError {
        PipelineError::StoreUnavailable {
            message: "connection reset".to_string(),
        }
    }

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(300),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
        assert_eq!(policy.delay_for(30), Duration::from_millis(300));
    }

    #[test]
    fn transient_errors_are_retried_until_success() {
        let mut retries = Vec::new();
        let (result, attempts) = RetryPolicy::immediate(3).run(
            |attempt| if attempt < 3 { Err(unavailable()) } else { Ok(attempt) },
            |attempt, _, _| retries.push(attempt),
        );
        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts, 3);
        assert_eq!(retries, vec![1, 2]);
    }

    #[test]
    fn attempts_are_bounded() {
        let (result, attempts) =
            RetryPolicy::immediate(3).run(|_| Err::<(), _>(unavailable()), |_, _, _| {});
        assert!(result.unwrap_err().is_transient());
        assert_eq!(attempts, 3);
    }

    #[test]
    fn structural_errors_are_not_retried() {
        let mut calls = 0;
        let (result, attempts) = RetryPolicy::immediate(3).run(
            |_| {
                calls += 1;
                Err::<(), _>(PipelineError::NotFound {
                    bucket: "bronze".to_string(),
                    key: "clients.csv".to_string(),
                })
            },
            |_, _, _| panic!("must not retry"),
        );
        assert!(result.is_err());
        assert_eq!((attempts, calls), (1, 1));
    }
}
