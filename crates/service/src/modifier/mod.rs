//! `InvoiceModifierService`: invoice workflows over the repositories, the
//! order service and feature flags.
//!
//! Every workflow takes an explicit [`RequestContext`]; the tenant is never
//! read from anywhere else.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use invoicemgmt_core::{DomainError, RequestContext, StudentId, TenantId};
use invoicemgmt_infra::config::ServiceConfig;
use invoicemgmt_infra::db::{Database, Executor};
use invoicemgmt_infra::external::{
    FeatureFlags, Flag, OrderService, UpdateBillItemStatusRequest,
};
use invoicemgmt_infra::repositories::Repositories;
use invoicemgmt_invoicing::{BillItem, BillingStatus, Invoice, InvoiceBillItem, InvoiceType};

use crate::errors::{ServiceError, WorkflowError};

pub mod bulk_issue;
pub mod create_from_order;
pub mod generate;
pub mod issue;
pub mod schedule_checker;

/// Collaborators the service is wired with.
#[derive(Clone)]
pub struct InvoiceModifierDeps {
    pub db: Arc<dyn Database>,
    pub repos: Repositories,
    pub order_service: Arc<dyn OrderService>,
    pub flags: Arc<dyn FeatureFlags>,
}

/// Cheap to clone; pool workers each hold a clone.
#[derive(Clone)]
pub struct InvoiceModifierService {
    db: Arc<dyn Database>,
    repos: Repositories,
    order_service: Arc<dyn OrderService>,
    flags: Arc<dyn FeatureFlags>,
    config: Arc<ServiceConfig>,
}

impl std::fmt::Debug for InvoiceModifierService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvoiceModifierService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl InvoiceModifierService {
    pub fn new(deps: InvoiceModifierDeps, config: ServiceConfig) -> Self {
        Self {
            db: deps.db,
            repos: deps.repos,
            order_service: deps.order_service,
            flags: deps.flags,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn flag(&self, flag: Flag, tenant_id: TenantId) -> Result<bool, ServiceError> {
        self.flags.is_enabled(flag, tenant_id).map_err(|e| {
            ServiceError::internal(format!("feature flag {} lookup failed: {e}", flag.name()))
        })
    }

    /// Insert one draft invoice over `items` and link them, inside `exec`.
    ///
    /// Items are assumed validated. The sequence number is read from the
    /// transaction's view, so a concurrent writer may take it first; the
    /// conflict then surfaces at insert or commit.
    fn insert_invoice(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        draft: DraftInvoice<'_>,
        now: DateTime<Utc>,
    ) -> Result<Invoice, WorkflowError> {
        let sequence_number = self.repos.invoices.next_sequence_number(exec, tenant_id)?;
        let invoice = Invoice::draft(
            tenant_id,
            draft.student_id.clone(),
            draft.invoice_type,
            draft.sub_total,
            draft.total,
            sequence_number,
            now,
        );
        self.repos.invoices.create(exec, &invoice)?;

        for item in draft.items {
            self.repos.invoice_bill_items.create(
                exec,
                &InvoiceBillItem {
                    invoice_id: invoice.id,
                    tenant_id,
                    bill_item_sequence_number: item.sequence_number,
                    past_billing_status: item.billing_status,
                    created_at: now,
                },
            )?;
        }

        debug!(
            tenant_id = %tenant_id,
            student_id = %invoice.student_id,
            invoice_id = %invoice.id,
            sequence_number,
            "invoice inserted"
        );
        Ok(invoice)
    }

    /// Move the items to invoiced inside `exec`, then tell the order service.
    /// Per-item errors in its response fail the unit of work.
    ///
    /// The local update only applies to items still billed, so two units of
    /// work claiming the same item conflict and the later one is retried.
    fn mark_invoiced(
        &self,
        exec: &dyn Executor,
        ctx: &RequestContext,
        tenant_id: TenantId,
        bill_item_sequence_numbers: Vec<i64>,
    ) -> Result<(), WorkflowError> {
        if bill_item_sequence_numbers.is_empty() {
            return Ok(());
        }

        self.repos.bill_items.update_status(
            exec,
            tenant_id,
            &bill_item_sequence_numbers,
            BillingStatus::Billed,
            BillingStatus::Invoiced,
        )?;

        let response = self.order_service.update_bill_item_status(
            ctx,
            UpdateBillItemStatusRequest {
                tenant_id,
                bill_item_sequence_numbers,
                status: BillingStatus::Invoiced,
            },
        )?;

        if !response.errors.is_empty() {
            let detail = response
                .errors
                .iter()
                .map(|e| format!("bill item {}: {}", e.bill_item_sequence_number, e.error))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(WorkflowError::BillItemStatus(detail));
        }
        Ok(())
    }
}

/// Invoice to insert for one student.
struct DraftInvoice<'a> {
    student_id: &'a StudentId,
    invoice_type: InvoiceType,
    sub_total: i64,
    total: i64,
    items: &'a [BillItem],
}

/// Reject a list that repeats any value.
fn ensure_unique<T>(values: &[T], describe: impl Fn(&T) -> String) -> Result<(), DomainError>
where
    T: Eq + std::hash::Hash,
{
    let mut seen = HashSet::with_capacity(values.len());
    for value in values {
        if !seen.insert(value) {
            return Err(DomainError::validation(describe(value)));
        }
    }
    Ok(())
}

/// Sum of what `items` contribute to an invoice.
fn billable_total(items: &[BillItem]) -> i64 {
    items.iter().map(BillItem::billable_amount).sum()
}
