//! `invoicemgmt-core`: shared building blocks for invoice management.
//!
//! Identifiers, the domain error model and the explicit request/tenant
//! context threaded through every workflow. No infrastructure concerns.

pub mod context;
pub mod error;
pub mod id;

pub use context::{Organization, RequestContext, TenantContext};
pub use error::{DomainError, DomainResult};
pub use id::{
    HistoryId, InvoiceId, InvoiceScheduleId, OrderId, PaymentId, StudentId, TenantId, UserId,
};
