use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use invoicemgmt_core::{DomainError, InvoiceId, RequestContext, StudentId};
use invoicemgmt_infra::db::{Executor, in_transaction};
use invoicemgmt_infra::external::Flag;
use invoicemgmt_infra::retry::execute_with_retry;
use invoicemgmt_invoicing::{BillItem, BillingStatus, InvoiceType, Order};

use super::{DraftInvoice, InvoiceModifierService, billable_total, ensure_unique};
use crate::dto::{CreateInvoiceFromOrderRequest, CreateInvoiceFromOrderResponse};
use crate::errors::{ServiceError, WorkflowError};

impl InvoiceModifierService {
    /// Invoice the billed items of submitted orders, one manual invoice per
    /// student.
    ///
    /// Items billed after the earliest pending schedule's invoice date are
    /// left for that schedule. All orders are invoiced in one transaction.
    pub fn create_invoice_from_order(
        &self,
        ctx: &RequestContext,
        request: CreateInvoiceFromOrderRequest,
    ) -> Result<CreateInvoiceFromOrderResponse, ServiceError> {
        if request.order_ids.is_empty() {
            return Err(ServiceError::invalid_argument(
                "the order details should not be empty",
            ));
        }
        if request.order_ids.iter().any(|id| id.is_blank()) {
            return Err(ServiceError::invalid_argument("the order ID cannot be empty"));
        }
        ensure_unique(&request.order_ids, |id| format!("duplicate order ID {id}"))?;

        let tenant_id = ctx.tenant_id();
        let review_check = self.flag(Flag::ReviewOrderChecking, tenant_id)?;

        let mut orders = Vec::with_capacity(request.order_ids.len());
        for order_id in &request.order_ids {
            let order = self.repos.orders.find(self.db.executor(), tenant_id, order_id)?;
            order.ensure_invoiceable(review_check)?;
            orders.push(order);
        }

        let cutoff = self
            .repos
            .schedules
            .find_earliest_pending(self.db.executor(), tenant_id)?
            .map(|schedule| schedule.invoice_date);

        let attempted = execute_with_retry(&self.config.generation_retry, |_| {
            in_transaction(self.db.as_ref(), ctx, |exec| {
                self.invoice_orders(exec, ctx, &orders, cutoff)
            })
        })?;

        info!(
            tenant_id = %tenant_id,
            orders = orders.len(),
            invoices = attempted.value.len(),
            attempts = attempted.attempts,
            "invoices created from orders"
        );

        Ok(CreateInvoiceFromOrderResponse {
            successful: true,
            invoice_ids: attempted.value,
        })
    }

    fn invoice_orders(
        &self,
        exec: &dyn Executor,
        ctx: &RequestContext,
        orders: &[Order],
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<InvoiceId>, WorkflowError> {
        let tenant_id = ctx.tenant_id();
        let mut by_student: BTreeMap<StudentId, Vec<BillItem>> = BTreeMap::new();

        for order in orders {
            let items = self.repos.bill_items.find_by_order(exec, tenant_id, &order.id)?;
            if items.is_empty() {
                return Err(WorkflowError::internal(format!(
                    "order with ID {} has no associated billing item",
                    order.id
                )));
            }

            for item in items {
                if cutoff.is_some_and(|cutoff| item.bill_date > cutoff) {
                    debug!(
                        order_id = %order.id,
                        bill_item = item.sequence_number,
                        "bill item left for the invoice schedule"
                    );
                    continue;
                }
                if item.billing_status != BillingStatus::Billed {
                    return Err(DomainError::validation(format!(
                        "the bill item {} of order with ID {} has invalid status {}",
                        item.sequence_number, order.id, item.billing_status
                    ))
                    .into());
                }
                item.validate_price()?;
                by_student
                    .entry(order.student_id.clone())
                    .or_default()
                    .push(item);
            }
        }

        let now = Utc::now();
        let mut invoice_ids = Vec::with_capacity(by_student.len());
        let mut invoiced = Vec::new();
        for (student_id, items) in &by_student {
            let total = billable_total(items);
            let invoice = self.insert_invoice(
                exec,
                tenant_id,
                DraftInvoice {
                    student_id,
                    invoice_type: InvoiceType::Manual,
                    sub_total: total,
                    total,
                    items,
                },
                now,
            )?;
            invoice_ids.push(invoice.id);
            invoiced.extend(items.iter().map(|item| item.sequence_number));
        }

        self.mark_invoiced(exec, ctx, tenant_id, invoiced)?;
        Ok(invoice_ids)
    }
}
