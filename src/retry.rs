use std::error::Error;
use std::thread;
use std::time::Duration;

use log::{info, warn};
use thiserror::Error;

/// Errors that know whether another attempt is worthwhile.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

pub trait Sleeper {
    fn sleep(&self, d: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, d: Duration) {
        thread::sleep(d);
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E: Error + 'static> {
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },
    #[error(transparent)]
    Permanent(E),
}

impl<E: Error + 'static> RetryError<E> {
    pub fn inner(&self) -> &E {
        match self {
            RetryError::Exhausted { source, .. } => source,
            RetryError::Permanent(e) => e,
        }
    }
}

/// Bounded exponential backoff: 1, 2, 4, 8, 8... units between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_unit(Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Three attempts, starting at one `unit` and capped at eight.
    pub fn with_unit(unit: Duration) -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: unit,
            max_delay: unit * 8,
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    /// `op` receives the 1-based attempt number.
    pub fn run<T, E, F>(&self, sleeper: &dyn Sleeper, label: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        E: Error + Transient + 'static,
        F: FnMut(u32) -> Result<T, E>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_transient() => return Err(RetryError::Permanent(e)),
                Err(e) if attempt >= max => {
                    warn!("{} failed on final attempt {}/{}: {}", label, attempt, max, e);
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    info!(
                        "{} failed (attempt {}/{}): {}. Waiting {:?} before retrying...",
                        label, attempt, max, e, delay
                    );
                    sleeper.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
