//! Fault injection and call counting for the in-memory database.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::error::DbError;

/// Operation name used for commit faults.
pub const COMMIT: &str = "commit";

/// One injected failure.
#[derive(Debug, Clone)]
pub struct Fault {
    op: String,
    key: Option<String>,
    error: DbError,
    remaining: Option<u32>,
}

impl Fault {
    /// Fail every call to `op` with `error`.
    pub fn new(op: impl Into<String>, error: DbError) -> Self {
        Self {
            op: op.into(),
            key: None,
            error,
            remaining: None,
        }
    }

    /// Only calls made for this key (e.g. a student id) fail.
    pub fn for_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Fail only the first `n` matching calls.
    pub fn times(mut self, n: u32) -> Self {
        self.remaining = Some(n);
        self
    }

    fn matches(&self, op: &str, key: &str) -> bool {
        self.op == op && self.key.as_deref().is_none_or(|k| k == key) && self.remaining != Some(0)
    }
}

#[derive(Debug, Default)]
pub struct FaultInjector {
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&self, fault: Fault) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fault);
    }

    pub fn clear(&self) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of times `op` was invoked, failed or not.
    pub fn calls(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(op)
            .copied()
            .unwrap_or(0)
    }

    /// Record a call and return the first matching injected error.
    pub(crate) fn check(&self, op: &str, key: &str) -> Result<(), DbError> {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op.to_string())
            .or_default() += 1;

        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(fault) = faults.iter_mut().find(|f| f.matches(op, key)) {
            if let Some(n) = fault.remaining.as_mut() {
                *n -= 1;
            }
            return Err(fault.error.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limited_fault_fires_only_for_its_key_and_count() {
        let faults = FaultInjector::new();
        faults.inject(
            Fault::new("invoice.create", DbError::unique("invoice_seq"))
                .for_key("student-2")
                .times(2),
        );

        assert!(faults.check("invoice.create", "student-1").is_ok());
        assert!(faults.check("invoice.create", "student-2").is_err());
        assert!(faults.check("invoice.create", "student-2").is_err());
        assert!(faults.check("invoice.create", "student-2").is_ok());
        assert_eq!(faults.calls("invoice.create"), 4);
        assert_eq!(faults.calls("payment.create"), 0);
    }

    #[test]
    fn unlimited_fault_keeps_firing_until_cleared() {
        let faults = FaultInjector::new();
        faults.inject(Fault::new(COMMIT, DbError::ConnectionClosed));

        for _ in 0..5 {
            assert_eq!(faults.check(COMMIT, ""), Err(DbError::ConnectionClosed));
        }
        faults.clear();
        assert!(faults.check(COMMIT, "").is_ok());
    }
}
