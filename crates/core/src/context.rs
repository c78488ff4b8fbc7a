//! Explicit request and tenant context.
//!
//! Workflows never derive tenant scope from ambient state: the tenant and the
//! acting user travel as plain values, and per-tenant fan-out builds a fresh
//! [`RequestContext`] for each organization.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::id::{TenantId, UserId};

/// Tenant context for a unit of work.
///
/// This is immutable and must be present for all tenant-scoped operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Context of one top-level request: tenant, actor and optional deadline.
///
/// Cheap to clone; handed by value to pool workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    tenant: TenantContext,
    user_id: Option<UserId>,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(tenant: TenantContext) -> Self {
        Self {
            tenant,
            user_id: None,
            deadline: None,
        }
    }

    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self::new(TenantContext::new(tenant_id))
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Same actor and deadline, different tenant.
    pub fn scoped_to(&self, tenant: TenantContext) -> Self {
        Self {
            tenant,
            user_id: self.user_id,
            deadline: self.deadline,
        }
    }

    pub fn tenant(&self) -> TenantContext {
        self.tenant
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant.tenant_id()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// An organization (tenant) known to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub tenant_id: TenantId,
    pub name: String,
}

impl Organization {
    pub fn new(tenant_id: TenantId, name: impl Into<String>) -> Self {
        Self {
            tenant_id,
            name: name.into(),
        }
    }

    pub fn context(&self) -> TenantContext {
        TenantContext::new(self.tenant_id)
    }
}
