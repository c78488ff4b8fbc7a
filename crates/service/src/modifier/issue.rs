use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;

use invoicemgmt_core::{DomainError, InvoiceId, PaymentId, RequestContext};
use invoicemgmt_infra::db::{Executor, in_transaction};
use invoicemgmt_infra::retry::execute_with_retry;
use invoicemgmt_invoicing::{
    InvoiceAction, InvoiceActionLog, Payment, PaymentMethod, ValidPaymentDates,
};

use super::InvoiceModifierService;
use crate::dto::{IssueInvoiceRequest, IssueInvoiceResponse};
use crate::errors::{ServiceError, WorkflowError};

impl InvoiceModifierService {
    /// Issue one draft or failed invoice and create its pending payment.
    pub fn issue_invoice(
        &self,
        ctx: &RequestContext,
        request: IssueInvoiceRequest,
    ) -> Result<IssueInvoiceResponse, ServiceError> {
        let Some(invoice_id) = request.invoice_id else {
            return Err(ServiceError::invalid_argument("invoice ID cannot be empty"));
        };
        let now = Utc::now();
        let dates = request.dates.validate(now)?;

        let attempted = execute_with_retry(&self.config.payment_sequence_retry, |_| {
            in_transaction(self.db.as_ref(), ctx, |exec| {
                self.issue_in_tx(exec, ctx, invoice_id, &request, dates, now)
            })
        })?;

        info!(
            tenant_id = %ctx.tenant_id(),
            invoice_id = %invoice_id,
            payment_method = ?request.payment_method,
            attempts = attempted.attempts,
            "invoice issued"
        );

        Ok(IssueInvoiceResponse {
            successful: true,
            payment_id: attempted.value,
        })
    }

    fn issue_in_tx(
        &self,
        exec: &dyn Executor,
        ctx: &RequestContext,
        invoice_id: InvoiceId,
        request: &IssueInvoiceRequest,
        dates: ValidPaymentDates,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentId>, WorkflowError> {
        let tenant_id = ctx.tenant_id();
        let mut invoice = self.repos.invoices.find(exec, tenant_id, invoice_id)?;
        invoice.ensure_issuable()?;

        if request.payment_method == PaymentMethod::DirectDebit {
            let detail = self
                .repos
                .payment_details
                .find_many(exec, tenant_id, std::slice::from_ref(&invoice.student_id))?
                .into_iter()
                .next()
                .ok_or_else(|| DomainError::validation("student has no bank account registered"))?;
            detail.ensure_direct_debit_ready()?;
        }

        invoice.issue(now)?;
        self.repos.invoices.update(exec, &invoice)?;

        let payment_id = if invoice.requires_payment() {
            let sequence_number = self.repos.payments.next_sequence_number(exec, tenant_id)?;
            let payment =
                Payment::pending(&invoice, request.payment_method, dates, sequence_number, now);
            self.repos
                .payments
                .create_many(exec, std::slice::from_ref(&payment))?;
            Some(payment.id)
        } else {
            None
        };

        self.repos.action_logs.create_many(
            exec,
            &[InvoiceActionLog {
                invoice_id,
                tenant_id,
                user_id: ctx.user_id(),
                action: InvoiceAction::Issued,
                detail: json!({
                    "payment_method": request.payment_method,
                    "payment_id": payment_id,
                    "remarks": request.remarks,
                }),
                created_at: now,
            }],
        )?;

        Ok(payment_id)
    }
}
