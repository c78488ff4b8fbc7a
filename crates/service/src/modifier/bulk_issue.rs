//! Bulk issuance: issue many invoices at once and give each a pending payment
//! with a consecutive payment sequence number.
//!
//! Concurrent bulk issuers race for the same sequence numbers; the loser's
//! commit hits the unique constraint and the whole transaction is retried.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;

use invoicemgmt_core::{DomainError, InvoiceId, PaymentId, RequestContext, StudentId, TenantId};
use invoicemgmt_infra::db::{Executor, in_transaction};
use invoicemgmt_infra::retry::execute_with_retry;
use invoicemgmt_invoicing::{
    BulkIssuePaymentMethod, Invoice, InvoiceAction, InvoiceActionLog, Payment, PaymentDates,
    PaymentMethod, ValidPaymentDates,
};

use super::InvoiceModifierService;
use crate::dto::{BulkIssueInvoiceRequest, BulkIssueInvoiceResponse};
use crate::errors::{ServiceError, WorkflowError};

/// Validated dates per payment method.
#[derive(Debug, Clone, Copy, Default)]
struct BulkIssueDates {
    convenience_store: Option<ValidPaymentDates>,
    direct_debit: Option<ValidPaymentDates>,
}

impl BulkIssueDates {
    fn resolve(
        request: &BulkIssueInvoiceRequest,
        now: DateTime<Utc>,
    ) -> Result<Self, ServiceError> {
        let method = request.payment_method;
        let convenience_store = if method.needs_convenience_store_dates() {
            Some(required(
                request.convenience_store_dates,
                "convenience store dates cannot be empty",
                now,
            )?)
        } else {
            None
        };
        let direct_debit = if method.needs_direct_debit_dates() {
            Some(required(
                request.direct_debit_dates,
                "direct debit dates cannot be empty",
                now,
            )?)
        } else {
            None
        };
        Ok(Self {
            convenience_store,
            direct_debit,
        })
    }

    fn for_method(&self, method: PaymentMethod) -> Option<ValidPaymentDates> {
        match method {
            PaymentMethod::ConvenienceStore => self.convenience_store,
            PaymentMethod::DirectDebit => self.direct_debit,
            PaymentMethod::Cash | PaymentMethod::BankTransfer => None,
        }
    }
}

fn required(
    dates: Option<PaymentDates>,
    missing: &str,
    now: DateTime<Utc>,
) -> Result<ValidPaymentDates, ServiceError> {
    let dates = dates.ok_or_else(|| ServiceError::invalid_argument(missing))?;
    Ok(dates.validate(now)?)
}

impl InvoiceModifierService {
    pub fn bulk_issue_invoice(
        &self,
        ctx: &RequestContext,
        request: BulkIssueInvoiceRequest,
    ) -> Result<BulkIssueInvoiceResponse, ServiceError> {
        if request.invoice_ids.is_empty() {
            return Err(ServiceError::invalid_argument("invoice ids cannot be empty"));
        }
        let now = Utc::now();
        let dates = BulkIssueDates::resolve(&request, now)?;

        let mut seen = HashSet::with_capacity(request.invoice_ids.len());
        let invoice_ids: Vec<InvoiceId> = request
            .invoice_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        let attempted = execute_with_retry(&self.config.payment_sequence_retry, |_| {
            in_transaction(self.db.as_ref(), ctx, |exec| {
                self.bulk_issue_in_tx(exec, ctx, &invoice_ids, request.payment_method, &dates, now)
            })
        })?;

        info!(
            tenant_id = %ctx.tenant_id(),
            invoices = invoice_ids.len(),
            payments = attempted.value.len(),
            attempts = attempted.attempts,
            "invoices bulk issued"
        );

        Ok(BulkIssueInvoiceResponse {
            successful: true,
            payment_ids: attempted.value,
            attempts: attempted.attempts,
        })
    }

    fn bulk_issue_in_tx(
        &self,
        exec: &dyn Executor,
        ctx: &RequestContext,
        invoice_ids: &[InvoiceId],
        method: BulkIssuePaymentMethod,
        dates: &BulkIssueDates,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentId>, WorkflowError> {
        let tenant_id = ctx.tenant_id();
        let mut invoices = self.repos.invoices.find_many(exec, tenant_id, invoice_ids)?;
        let missing = invoice_ids.len() - invoices.len();
        if missing > 0 {
            return Err(DomainError::validation(format!(
                "there are {missing} invoices that does not exist"
            ))
            .into());
        }

        for invoice in &invoices {
            if !invoice.status.is_issuable() {
                return Err(DomainError::validation(format!(
                    "error invalid invoice status: {}",
                    invoice.status
                ))
                .into());
            }
            invoice.ensure_positive_total()?;
        }

        let methods = match method.fixed() {
            Some(fixed) => vec![fixed; invoices.len()],
            None => self.default_payment_methods(exec, tenant_id, &invoices)?,
        };

        let mut sequence_number = self.repos.payments.next_sequence_number(exec, tenant_id)?;
        let mut payments = Vec::with_capacity(invoices.len());
        let mut logs = Vec::with_capacity(invoices.len());

        for (invoice, method) in invoices.iter_mut().zip(methods) {
            let dates = dates.for_method(method).ok_or_else(|| {
                WorkflowError::internal(format!(
                    "bulk issue student: {} payment method {method:?} cannot be bulk issued",
                    invoice.student_id
                ))
            })?;

            invoice.issue(now)?;
            self.repos.invoices.update(exec, invoice)?;

            let payment = Payment::pending(invoice, method, dates, sequence_number, now);
            sequence_number += 1;
            logs.push(InvoiceActionLog {
                invoice_id: invoice.id,
                tenant_id,
                user_id: ctx.user_id(),
                action: InvoiceAction::Issued,
                detail: json!({
                    "payment_method": method,
                    "payment_id": payment.id,
                    "bulk": true,
                }),
                created_at: now,
            });
            payments.push(payment);
        }

        let created = self.repos.payments.create_many(exec, &payments)?;
        if created != payments.len() {
            return Err(WorkflowError::internal(format!(
                "there are {} payments that were not created",
                payments.len() - created
            )));
        }
        self.repos.action_logs.create_many(exec, &logs)?;

        Ok(payments.iter().map(|p| p.id).collect())
    }

    /// Each invoice's method from its student's payment detail.
    fn default_payment_methods(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        invoices: &[Invoice],
    ) -> Result<Vec<PaymentMethod>, WorkflowError> {
        let mut student_ids: Vec<StudentId> =
            invoices.iter().map(|i| i.student_id.clone()).collect();
        student_ids.sort();
        student_ids.dedup();

        let details = self
            .repos
            .payment_details
            .find_many(exec, tenant_id, &student_ids)?;
        let by_student: HashMap<&StudentId, Option<PaymentMethod>> = details
            .iter()
            .map(|d| (&d.student_id, d.payment_method))
            .collect();

        let missing = student_ids
            .iter()
            .filter(|id| !by_student.contains_key(id))
            .count();
        if missing > 0 {
            return Err(DomainError::validation(format!(
                "there are {missing} students that does not have student payment detail"
            ))
            .into());
        }

        invoices
            .iter()
            .map(|invoice| {
                by_student
                    .get(&invoice.student_id)
                    .copied()
                    .flatten()
                    .ok_or_else(|| {
                        WorkflowError::internal(format!(
                            "bulk issue student: {} payment method in student payment detail is empty",
                            invoice.student_id
                        ))
                    })
            })
            .collect()
    }
}
