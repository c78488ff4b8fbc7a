use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use invoicemgmt_core::{HistoryId, InvoiceScheduleId, StudentId, TenantId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceScheduleStatus {
    Scheduled,
    Completed,
    Cancelled,
    Incomplete,
}

/// A planned invoice run for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSchedule {
    pub id: InvoiceScheduleId,
    pub tenant_id: TenantId,
    /// Bill items created after this instant are left for the next run.
    pub invoice_date: DateTime<Utc>,
    pub scheduled_date: DateTime<Utc>,
    pub status: InvoiceScheduleStatus,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl InvoiceSchedule {
    pub fn is_pending(&self) -> bool {
        self.status == InvoiceScheduleStatus::Scheduled
    }

    /// Whether this schedule runs on `date`, keyed by scheduled date or by
    /// invoice date.
    pub fn runs_on(&self, date: NaiveDate, by_scheduled_date: bool) -> bool {
        let key = if by_scheduled_date {
            self.scheduled_date
        } else {
            self.invoice_date
        };
        key.date_naive() == date
    }
}

/// One execution of an invoice schedule. At most one exists per schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceScheduleHistory {
    pub id: HistoryId,
    pub tenant_id: TenantId,
    pub schedule_id: InvoiceScheduleId,
    pub total_students: u32,
    pub failed_invoices: u32,
    pub execution_start: DateTime<Utc>,
    pub execution_end: Option<DateTime<Utc>>,
}

impl InvoiceScheduleHistory {
    pub fn start(schedule: &InvoiceSchedule, now: DateTime<Utc>) -> Self {
        Self {
            id: HistoryId::new(),
            tenant_id: schedule.tenant_id,
            schedule_id: schedule.id,
            total_students: 0,
            failed_invoices: 0,
            execution_start: now,
            execution_end: None,
        }
    }

    pub fn finish(&mut self, total_students: u32, failed_invoices: u32, now: DateTime<Utc>) {
        self.total_students = total_students;
        self.failed_invoices = failed_invoices;
        self.execution_end = Some(now);
    }
}

/// A student whose invoice failed during a schedule run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceScheduleStudent {
    pub history_id: HistoryId,
    pub tenant_id: TenantId,
    pub student_id: StudentId,
    pub error_details: String,
    pub created_at: DateTime<Utc>,
}
