//! Retry loops.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::thread;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::policy::RetryPolicy;

/// Classification of a failure for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Contention that is expected to clear on retry (e.g. a sequence number
    /// taken by a concurrent writer).
    Transient,
    /// Infrastructure or downstream failure that retrying will not fix.
    Permanent,
    /// Bad input.
    Validation,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        self == ErrorClass::Transient
    }
}

/// Errors that know their own retry class.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

/// Failure reported by a raw retryable operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure<E> {
    /// Whether another attempt may succeed.
    pub retry: bool,
    pub error: E,
}

impl<E> Failure<E> {
    pub fn retry(error: E) -> Self {
        Self { retry: true, error }
    }

    pub fn stop(error: E) -> Self {
        Self {
            retry: false,
            error,
        }
    }
}

/// Successful result together with the number of attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// A non-retryable error stopped the loop.
    #[error("{error}")]
    Aborted { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    /// Number of times the operation ran.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Aborted { attempt, .. } => *attempt,
        }
    }

    pub fn error(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }

    pub fn into_error(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Run `op` until it succeeds, reports `retry: false`, or the policy's attempt
/// ceiling is reached.
///
/// `op` receives the 1-based attempt number.
pub fn retry_with<T, E, F>(policy: &RetryPolicy, mut op: F) -> Result<Attempted<T>, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Result<T, Failure<E>>,
{
    let max_attempts = policy.attempts();
    let seed = thread_seed();
    let mut attempt = 1;

    loop {
        match op(attempt) {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "operation succeeded after retry");
                }
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                });
            }
            Err(Failure {
                retry: false,
                error,
            }) => {
                return Err(RetryError::Aborted { attempt, error });
            }
            Err(Failure { error, .. }) if attempt >= max_attempts => {
                warn!(attempts = attempt, error = %error, "retry attempts exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }
            Err(Failure { error, .. }) => {
                let delay = policy.delay_with_seed(attempt, seed);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure, retrying"
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
        }
    }
}

/// Run `op` under `policy`, retrying only [`ErrorClass::Transient`] failures.
pub fn execute_with_retry<T, E, F>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<Attempted<T>, RetryError<E>>
where
    E: Classify + std::fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    retry_with(policy, |attempt| {
        op(attempt).map_err(|error| Failure {
            retry: error.class().is_retryable(),
            error,
        })
    })
}

fn thread_seed() -> u64 {
    let mut hasher = DefaultHasher::new();
    thread::current().id().hash(&mut hasher);
    hasher.finish()
}
