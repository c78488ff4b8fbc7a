//! Invoice schedule checker: for every organization, run the schedule due on
//! the requested date.
//!
//! Tenants are processed in parallel and independently; one tenant failing
//! never stops the others.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use invoicemgmt_core::{Organization, RequestContext, StudentId};
use invoicemgmt_infra::db::{DbError, in_transaction};
use invoicemgmt_infra::external::Flag;
use invoicemgmt_infra::retry::execute_with_retry;
use invoicemgmt_infra::workers::{TaskError, TaskOutcome, fan_out};
use invoicemgmt_invoicing::{
    BillItem, BillingStatus, InvoiceSchedule, InvoiceScheduleHistory, InvoiceScheduleStatus,
    InvoiceScheduleStudent, InvoiceType,
};

use super::{InvoiceModifierService, billable_total};
use crate::dto::{
    GenerateInvoiceDetail, GenerateInvoicesResponse, InvoiceScheduleCheckerRequest,
    InvoiceScheduleCheckerResponse, TenantScheduleRun,
};
use crate::errors::{ServiceError, WorkflowError};

const POOL_NAME: &str = "invoice-schedule";

impl InvoiceModifierService {
    pub fn invoice_schedule_checker(
        &self,
        ctx: &RequestContext,
        request: InvoiceScheduleCheckerRequest,
    ) -> Result<InvoiceScheduleCheckerResponse, ServiceError> {
        let Some(invoice_date) = request.invoice_date else {
            return Err(ServiceError::invalid_argument("invalid InvoiceDate value"));
        };

        let organizations = self
            .repos
            .organizations
            .list(self.db.executor())
            .map_err(|e| ServiceError::internal(format!("failed to list organizations: {e}")))?;

        let worker = self.clone();
        let parent = ctx.clone();
        let outcomes = fan_out(
            POOL_NAME,
            self.config.tenant_parallelism,
            organizations,
            move |organization: &Organization| {
                let tenant_ctx = parent.scoped_to(organization.context());
                worker.check_tenant(&tenant_ctx, invoice_date)
            },
        )?;

        let mut tenants = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for TaskOutcome { task, result } in outcomes {
            match result {
                Ok(run) => tenants.push(run),
                Err(TaskError::Failed(err)) => {
                    error!(
                        tenant_id = %task.tenant_id,
                        error = %err,
                        "invoice schedule check failed"
                    );
                    failures.push((task.tenant_id, err.to_string()));
                }
                Err(TaskError::Panicked(msg)) => {
                    error!(
                        tenant_id = %task.tenant_id,
                        panic = %msg,
                        "invoice schedule check panicked"
                    );
                    failures.push((task.tenant_id, format!("panicked: {msg}")));
                }
            }
        }

        if !failures.is_empty() {
            // Stable message regardless of completion order.
            failures.sort();
            let message = failures
                .iter()
                .map(|(tenant_id, err)| format!("tenant {tenant_id}: {err}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ServiceError::Internal(message));
        }

        tenants.sort_by_key(|run| run.tenant_id);
        Ok(InvoiceScheduleCheckerResponse {
            successful: true,
            tenants,
        })
    }

    /// Run the tenant's schedule due on `invoice_date`, if any.
    fn check_tenant(
        &self,
        ctx: &RequestContext,
        invoice_date: DateTime<Utc>,
    ) -> Result<TenantScheduleRun, ServiceError> {
        let tenant_id = ctx.tenant_id();
        let by_scheduled_date = self.flag(Flag::InvoiceScheduleByScheduledDate, tenant_id)?;
        let review_check = self.flag(Flag::ReviewOrderChecking, tenant_id)?;
        let exec = self.db.executor();

        let Some(schedule) = self.repos.schedules.find_pending_on(
            exec,
            tenant_id,
            invoice_date.date_naive(),
            by_scheduled_date,
        )?
        else {
            info!(tenant_id = %tenant_id, "no invoice schedule due");
            return Ok(TenantScheduleRun {
                tenant_id,
                schedule_id: None,
                total_students: 0,
                failed_invoices: 0,
            });
        };

        let history = InvoiceScheduleHistory::start(&schedule, Utc::now());
        self.repos
            .schedule_histories
            .create(exec, &history)
            .map_err(|err| match err {
                DbError::UniqueViolation { .. } => ServiceError::internal(format!(
                    "invoice schedule {} history already exists or another process is currently running",
                    schedule.id
                )),
                other => other.into(),
            })?;

        match self.run_schedule(ctx, &schedule, history.clone(), review_check) {
            Ok(run) => Ok(run),
            Err(err) => {
                self.abandon_schedule(ctx, &schedule, history);
                Err(err)
            }
        }
    }

    /// Generate the schedule's invoices and record the run as completed.
    fn run_schedule(
        &self,
        ctx: &RequestContext,
        schedule: &InvoiceSchedule,
        mut history: InvoiceScheduleHistory,
        review_check: bool,
    ) -> Result<TenantScheduleRun, ServiceError> {
        let tenant_id = ctx.tenant_id();
        let items = self.repos.bill_items.find_by_statuses(
            self.db.executor(),
            tenant_id,
            &[BillingStatus::Billed],
        )?;
        let details = schedule_details(schedule, items, review_check);
        let total_students = details.len() as u32;

        let response = self.run_generation(ctx, details, review_check)?;
        let failed_invoices = response.errors.len() as u32;
        if failed_invoices > 0 {
            warn!(
                tenant_id = %tenant_id,
                schedule_id = %schedule.id,
                failed_invoices,
                "invoice schedule run had failures"
            );
        }

        history.finish(total_students, failed_invoices, Utc::now());
        let student_failures = failed_students(&history, &response);
        let mut completed = schedule.clone();
        completed.status = InvoiceScheduleStatus::Completed;

        execute_with_retry(&self.config.schedule_retry, |_| {
            in_transaction(self.db.as_ref(), ctx, |exec| {
                self.repos.schedule_histories.update(exec, &history)?;
                if !student_failures.is_empty() {
                    self.repos
                        .schedule_students
                        .create_many(exec, &student_failures)?;
                }
                self.repos.schedules.update(exec, &completed)?;
                Ok::<_, WorkflowError>(())
            })
        })?;

        info!(
            tenant_id = %tenant_id,
            schedule_id = %schedule.id,
            total_students,
            failed_invoices,
            "invoice schedule completed"
        );

        Ok(TenantScheduleRun {
            tenant_id,
            schedule_id: Some(schedule.id),
            total_students,
            failed_invoices,
        })
    }

    /// Close a run that failed after its history was written, so the
    /// schedule is left `Incomplete` instead of looking like it is still
    /// running.
    fn abandon_schedule(
        &self,
        ctx: &RequestContext,
        schedule: &InvoiceSchedule,
        mut history: InvoiceScheduleHistory,
    ) {
        history.finish(0, 0, Utc::now());
        let mut incomplete = schedule.clone();
        incomplete.status = InvoiceScheduleStatus::Incomplete;

        let closed = execute_with_retry(&self.config.schedule_retry, |_| {
            in_transaction(self.db.as_ref(), ctx, |exec| {
                self.repos.schedule_histories.update(exec, &history)?;
                self.repos.schedules.update(exec, &incomplete)?;
                Ok::<_, WorkflowError>(())
            })
        });
        match closed {
            Ok(_) => warn!(
                tenant_id = %ctx.tenant_id(),
                schedule_id = %schedule.id,
                "invoice schedule marked incomplete"
            ),
            Err(err) => error!(
                tenant_id = %ctx.tenant_id(),
                schedule_id = %schedule.id,
                error = %err,
                "failed to mark invoice schedule incomplete"
            ),
        }
    }
}

/// One scheduled-invoice detail per student over the items the run covers.
///
/// Items created after the schedule's invoice date belong to the next run;
/// unreviewed items are held back when review checking is on.
fn schedule_details(
    schedule: &InvoiceSchedule,
    items: Vec<BillItem>,
    review_check: bool,
) -> Vec<GenerateInvoiceDetail> {
    let mut by_student: BTreeMap<StudentId, Vec<BillItem>> = BTreeMap::new();
    for item in items {
        if review_check && !item.is_reviewed {
            continue;
        }
        if item.created_at > schedule.invoice_date {
            continue;
        }
        by_student.entry(item.student_id.clone()).or_default().push(item);
    }

    by_student
        .into_iter()
        .map(|(student_id, items)| {
            let total = billable_total(&items);
            GenerateInvoiceDetail {
                student_id,
                bill_item_sequence_numbers: items.iter().map(|i| i.sequence_number).collect(),
                invoice_type: InvoiceType::Scheduled,
                sub_total: total,
                total,
            }
        })
        .collect()
}

fn failed_students(
    history: &InvoiceScheduleHistory,
    response: &GenerateInvoicesResponse,
) -> Vec<InvoiceScheduleStudent> {
    let now = Utc::now();
    response
        .errors
        .iter()
        .map(|err| InvoiceScheduleStudent {
            history_id: history.id,
            tenant_id: history.tenant_id,
            student_id: err.invoice_detail.student_id.clone(),
            error_details: err.message.clone(),
            created_at: now,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use invoicemgmt_core::{InvoiceScheduleId, OrderId, TenantId, UserId};
    use invoicemgmt_invoicing::BillingType;

    fn schedule(tenant_id: TenantId, invoice_date: DateTime<Utc>) -> InvoiceSchedule {
        InvoiceSchedule {
            id: InvoiceScheduleId::new(),
            tenant_id,
            invoice_date,
            scheduled_date: invoice_date,
            status: InvoiceScheduleStatus::Scheduled,
            user_id: UserId::new(),
            created_at: invoice_date - Duration::days(30),
        }
    }

    fn item(
        tenant_id: TenantId,
        seq: i64,
        student: &str,
        price: i64,
        created_at: DateTime<Utc>,
        is_reviewed: bool,
    ) -> BillItem {
        BillItem {
            tenant_id,
            sequence_number: seq,
            order_id: OrderId::new(format!("order-{seq}")),
            student_id: StudentId::new(student),
            billing_status: BillingStatus::Billed,
            billing_type: BillingType::Normal,
            final_price: price,
            adjustment_price: None,
            bill_date: created_at,
            created_at,
            is_reviewed,
        }
    }

    #[test]
    fn details_group_by_student_and_skip_late_or_unreviewed_items() {
        let tenant_id = TenantId::new();
        let invoice_date = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        let before = invoice_date - Duration::days(1);
        let schedule = schedule(tenant_id, invoice_date);

        let items = vec![
            item(tenant_id, 1, "student-a", 100, before, true),
            item(tenant_id, 2, "student-a", 50, before, true),
            item(tenant_id, 3, "student-b", 70, before, false),
            item(tenant_id, 4, "student-c", 30, invoice_date + Duration::hours(1), true),
        ];

        let details = schedule_details(&schedule, items.clone(), true);
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].student_id, StudentId::new("student-a"));
        assert_eq!(details[0].bill_item_sequence_numbers, vec![1, 2]);
        assert_eq!(details[0].total, 150);
        assert_eq!(details[0].invoice_type, InvoiceType::Scheduled);

        let details = schedule_details(&schedule, items, false);
        let students: Vec<_> = details.iter().map(|d| d.student_id.as_str()).collect();
        assert_eq!(students, vec!["student-a", "student-b"]);
    }
}
