//! Invoice generation: validate each detail, then create the valid ones in
//! parallel, one retry-wrapped transaction per invoice.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, info};

use invoicemgmt_core::{DomainError, RequestContext};
use invoicemgmt_infra::db::{Executor, in_transaction};
use invoicemgmt_infra::external::Flag;
use invoicemgmt_infra::retry::{Classify, ErrorClass, RetryError, execute_with_retry};
use invoicemgmt_infra::workers::{TaskError, TaskOutcome, fan_out};
use invoicemgmt_invoicing::Invoice;

use super::{DraftInvoice, InvoiceModifierService, ensure_unique};
use crate::dto::{
    GenerateInvoiceDetail, GenerateInvoicesRequest, GenerateInvoicesResponse, GeneratedInvoice,
    InvoiceGenerationError,
};
use crate::errors::{ServiceError, WorkflowError};

const POOL_NAME: &str = "invoice-generation";

impl InvoiceModifierService {
    /// Create one invoice per detail.
    ///
    /// Never aborts the batch for a single detail: failures are listed in the
    /// response and `successful` is `false` when there is any. An `Err` means
    /// the request could not be processed at all.
    pub fn generate_invoices(
        &self,
        ctx: &RequestContext,
        request: GenerateInvoicesRequest,
    ) -> Result<GenerateInvoicesResponse, ServiceError> {
        let review_check = self.flag(Flag::ReviewOrderChecking, ctx.tenant_id())?;
        self.run_generation(ctx, request.invoice_details, review_check)
    }

    pub(crate) fn run_generation(
        &self,
        ctx: &RequestContext,
        details: Vec<GenerateInvoiceDetail>,
        review_check: bool,
    ) -> Result<GenerateInvoicesResponse, ServiceError> {
        let requested = details.len();
        let mut errors = Vec::new();
        let mut valid = Vec::with_capacity(requested);

        let mut claimed = HashSet::new();
        for detail in details {
            let checked =
                validate_detail(&detail).and_then(|()| claim_items(&mut claimed, &detail));
            match checked {
                Ok(()) => valid.push(detail),
                Err(err) => errors.push(InvoiceGenerationError {
                    invoice_detail: detail,
                    class: ErrorClass::Validation,
                    message: err.to_string(),
                    attempts: 0,
                }),
            }
        }

        let worker = self.clone();
        let task_ctx = ctx.clone();
        let outcomes = fan_out(
            POOL_NAME,
            self.config.worker_count,
            valid,
            move |detail: &GenerateInvoiceDetail| {
                worker.generate_one(&task_ctx, detail, review_check)
            },
        )?;

        let mut invoices = Vec::with_capacity(outcomes.len());
        for TaskOutcome { task, result } in outcomes {
            match result {
                Ok(generated) => invoices.push(generated),
                Err(TaskError::Failed(err)) => errors.push(InvoiceGenerationError {
                    class: err.error().class(),
                    message: err.to_string(),
                    attempts: err.attempts(),
                    invoice_detail: task,
                }),
                Err(TaskError::Panicked(msg)) => errors.push(InvoiceGenerationError {
                    invoice_detail: task,
                    class: ErrorClass::Permanent,
                    message: format!("invoice generation panicked: {msg}"),
                    attempts: 1,
                }),
            }
        }

        info!(
            tenant_id = %ctx.tenant_id(),
            requested,
            generated = invoices.len(),
            failed = errors.len(),
            "invoice generation finished"
        );

        Ok(GenerateInvoicesResponse {
            successful: errors.is_empty(),
            invoices,
            errors,
        })
    }

    fn generate_one(
        &self,
        ctx: &RequestContext,
        detail: &GenerateInvoiceDetail,
        review_check: bool,
    ) -> Result<GeneratedInvoice, RetryError<WorkflowError>> {
        let attempted = execute_with_retry(&self.config.generation_retry, |attempt| {
            debug!(
                tenant_id = %ctx.tenant_id(),
                student_id = %detail.student_id,
                attempt,
                "generating invoice"
            );
            in_transaction(self.db.as_ref(), ctx, |exec| {
                self.generate_in_tx(exec, ctx, detail, review_check)
            })
        })?;

        let invoice = attempted.value;
        Ok(GeneratedInvoice {
            invoice_id: invoice.id,
            student_id: invoice.student_id,
            sequence_number: invoice.sequence_number,
            attempts: attempted.attempts,
        })
    }

    fn generate_in_tx(
        &self,
        exec: &dyn Executor,
        ctx: &RequestContext,
        detail: &GenerateInvoiceDetail,
        review_check: bool,
    ) -> Result<Invoice, WorkflowError> {
        let tenant_id = ctx.tenant_id();
        let items = self.repos.bill_items.find_by_sequence_numbers(
            exec,
            tenant_id,
            &detail.bill_item_sequence_numbers,
        )?;

        for seq in &detail.bill_item_sequence_numbers {
            let Some(item) = items.iter().find(|i| i.sequence_number == *seq) else {
                return Err(
                    DomainError::validation(format!("bill item {seq} does not exist")).into(),
                );
            };
            if item.student_id != detail.student_id {
                return Err(DomainError::validation(format!(
                    "bill item {seq} does not belong to student {}",
                    detail.student_id
                ))
                .into());
            }
            item.ensure_invoiceable(review_check)?;
        }

        let invoice = self.insert_invoice(
            exec,
            tenant_id,
            DraftInvoice {
                student_id: &detail.student_id,
                invoice_type: detail.invoice_type,
                sub_total: detail.sub_total,
                total: detail.total,
                items: &items,
            },
            Utc::now(),
        )?;
        self.mark_invoiced(exec, ctx, tenant_id, detail.bill_item_sequence_numbers.clone())?;
        Ok(invoice)
    }
}

/// Checks that need no datastore access.
fn validate_detail(detail: &GenerateInvoiceDetail) -> Result<(), DomainError> {
    if detail.student_id.is_blank() {
        return Err(DomainError::validation("student id cannot be empty"));
    }
    if detail.bill_item_sequence_numbers.is_empty() {
        return Err(DomainError::validation(format!(
            "student {} has no bill items to invoice",
            detail.student_id
        )));
    }
    ensure_unique(&detail.bill_item_sequence_numbers, |seq| {
        format!("duplicate bill item sequence number {seq}")
    })
}

/// Claim the detail's items for this batch. Workers run on separate
/// snapshots, so an item in two details would be invoiced twice.
fn claim_items(
    claimed: &mut HashSet<i64>,
    detail: &GenerateInvoiceDetail,
) -> Result<(), DomainError> {
    if let Some(seq) = detail
        .bill_item_sequence_numbers
        .iter()
        .find(|seq| claimed.contains(*seq))
    {
        return Err(DomainError::validation(format!(
            "bill item {seq} is already included in another invoice detail"
        )));
    }
    claimed.extend(detail.bill_item_sequence_numbers.iter().copied());
    Ok(())
}
