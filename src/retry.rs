//! One place deciding whether a failed register exchange is tried again.

use log::warn;

use crate::error::{Error, Result};

/// Bounded retry of an operation on a selectable class of errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never less than 1.
    max_attempts: u32,
    retryable: fn(&Error) -> bool,
}

impl Default for RetryPolicy {
    /// Two additional attempts, on timeouts only.
    fn default() -> Self {
        Self::new(2, Error::is_retryable)
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, retryable: fn(&Error) -> bool) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            retryable,
        }
    }

    /// Retry `retries` times on timeouts, the orchestrator's policy.
    pub fn on_timeout(retries: u32) -> Self {
        Self::new(retries, Error::is_retryable)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    ///
    /// The error of the last attempt is returned unchanged.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && (self.retryable)(&err) => {
                    warn!(
                        "{what} failed (attempt {attempt}/{}): {err}, retrying",
                        self.max_attempts
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
