//! Bounded retry-on-conflict execution.
//!
//! ## Components
//!
//! - `RetryPolicy`: attempt ceiling and optional backoff between attempts
//! - `retry_with`: raw loop where the operation says whether to continue
//! - `execute_with_retry`: typed loop driven by [`Classify`]
//!
//! The retry loop is synchronous: it runs on whichever thread calls it
//! (typically a pool worker) and only blocks while sleeping between attempts.

pub mod executor;
pub mod policy;

pub use executor::{
    Attempted, Classify, ErrorClass, Failure, RetryError, execute_with_retry, retry_with,
};
pub use policy::{BackoffStrategy, RetryPolicy};
