use std::{thread, time};

use crate::error::Transient;

#[derive(Copy, Clone, Debug, PartialEq)]
/// How often and how patiently a transient failure is retried.
pub struct RetryPolicy {
    /// Total number of attempts, the first one included.
    max_attempts: u32,
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: Option<time::Duration>,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: Option<time::Duration>,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_coefficient,
            initial_interval,
            maximum_interval,
        }
    }

    /// A policy that never retries.
    pub fn once() -> Self {
        Self::new(1, 1, time::Duration::ZERO, None)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sleep before retry number `attempt` (0-based).
    pub fn time_until_next_retry(&self, attempt: u32) -> time::Duration {
        let factor = self.backoff_coefficient.saturating_pow(attempt);
        let candidate = self.initial_interval.saturating_mul(factor);

        match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate, max_interval),
            None => candidate,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_millis(200),
            maximum_interval: Some(time::Duration::from_secs(5)),
        }
    }
}

/// Run `op`, retrying transient failures with backoff until the policy is spent.
pub fn retry<T, E, F>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let wait = policy.time_until_next_retry(attempt);
                attempt += 1;
                log::warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what,
                    attempt,
                    policy.max_attempts,
                    err,
                    wait
                );
                thread::sleep(wait);
            }
            Err(err) => return Err(err),
        }
    }
}
