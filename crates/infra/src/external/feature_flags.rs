use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use thiserror::Error;

use invoicemgmt_core::TenantId;

use crate::retry::{Classify, ErrorClass};

/// Feature flags consulted by the invoice workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Hold back orders and bill items tagged for review.
    ReviewOrderChecking,
    /// Pick due invoice schedules by scheduled date instead of invoice date.
    InvoiceScheduleByScheduledDate,
}

impl Flag {
    pub fn name(self) -> &'static str {
        match self {
            Flag::ReviewOrderChecking => "invoice.review_order_checking",
            Flag::InvoiceScheduleByScheduledDate => "invoice.schedule_by_scheduled_date",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlagError {
    #[error("feature flag service unavailable: {0}")]
    Unavailable(String),
}

impl Classify for FlagError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Permanent
    }
}

/// Feature-flag lookup. Workflows read each flag once per request.
pub trait FeatureFlags: Send + Sync {
    fn is_enabled(&self, flag: Flag, tenant_id: TenantId) -> Result<bool, FlagError>;
}

/// Flags held in memory, with optional per-tenant overrides.
#[derive(Debug, Default)]
pub struct StaticFeatureFlags {
    enabled: RwLock<HashSet<Flag>>,
    overrides: RwLock<HashMap<(Flag, TenantId), bool>>,
    unavailable: RwLock<Option<String>>,
    lookups: AtomicUsize,
}

impl StaticFeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(flags: impl IntoIterator<Item = Flag>) -> Self {
        let this = Self::new();
        for flag in flags {
            this.set(flag, true);
        }
        this
    }

    pub fn set(&self, flag: Flag, enabled: bool) {
        let mut set = self.enabled.write().unwrap_or_else(PoisonError::into_inner);
        if enabled {
            set.insert(flag);
        } else {
            set.remove(&flag);
        }
    }

    pub fn set_for_tenant(&self, flag: Flag, tenant_id: TenantId, enabled: bool) {
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((flag, tenant_id), enabled);
    }

    /// Make every lookup fail until cleared with `None`.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        *self.unavailable.write().unwrap_or_else(PoisonError::into_inner) =
            reason.map(str::to_string);
    }

    /// Number of lookups served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl FeatureFlags for StaticFeatureFlags {
    fn is_enabled(&self, flag: Flag, tenant_id: TenantId) -> Result<bool, FlagError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = self
            .unavailable
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Err(FlagError::Unavailable(reason.clone()));
        }

        let overridden = self
            .overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(flag, tenant_id))
            .copied();
        Ok(overridden.unwrap_or_else(|| {
            self.enabled
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&flag)
        }))
    }
}
