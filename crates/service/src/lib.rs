//! Invoice workflows exposed to the transport layer.
//!
//! - `modifier`: [`InvoiceModifierService`] and one module per workflow
//! - `dto`: request/response types
//! - `errors`: the boundary error model

pub mod dto;
pub mod errors;
pub mod modifier;

pub use errors::{ServiceError, WorkflowError};
pub use modifier::{InvoiceModifierDeps, InvoiceModifierService};
