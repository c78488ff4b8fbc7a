//! Repository contracts used by the invoice workflows.
//!
//! Every call takes the executor to run against and, for tenant-owned data,
//! the tenant explicitly. Implementations must not derive the tenant from
//! anywhere else.

use std::sync::Arc;

use chrono::NaiveDate;

use invoicemgmt_core::{
    HistoryId, InvoiceId, InvoiceScheduleId, OrderId, Organization, StudentId, TenantId,
};
use invoicemgmt_invoicing::{
    BillItem, BillingStatus, Invoice, InvoiceActionLog, InvoiceBillItem, InvoiceSchedule,
    InvoiceScheduleHistory, InvoiceScheduleStudent, Order, Payment, StudentPaymentDetail,
};

use crate::db::{DbError, Executor};

pub mod in_memory;

pub use in_memory::*;

/// Operation names reported to the fault injector.
pub mod ops {
    pub const INVOICE_CREATE: &str = "invoice.create";
    pub const INVOICE_UPDATE: &str = "invoice.update";
    pub const INVOICE_FIND: &str = "invoice.find";
    pub const INVOICE_NEXT_SEQUENCE: &str = "invoice.next_sequence_number";
    pub const BILL_ITEM_FIND: &str = "bill_item.find";
    pub const BILL_ITEM_UPDATE: &str = "bill_item.update_status";
    pub const INVOICE_BILL_ITEM_CREATE: &str = "invoice_bill_item.create";
    pub const ORDER_FIND: &str = "order.find";
    pub const SCHEDULE_FIND: &str = "invoice_schedule.find";
    pub const SCHEDULE_UPDATE: &str = "invoice_schedule.update";
    pub const HISTORY_CREATE: &str = "invoice_schedule_history.create";
    pub const HISTORY_UPDATE: &str = "invoice_schedule_history.update";
    pub const SCHEDULE_STUDENT_CREATE: &str = "invoice_schedule_student.create";
    pub const ORGANIZATION_LIST: &str = "organization.list";
    pub const PAYMENT_CREATE: &str = "payment.create";
    pub const PAYMENT_FIND: &str = "payment.find";
    pub const PAYMENT_NEXT_SEQUENCE: &str = "payment.next_sequence_number";
    pub const PAYMENT_DETAIL_FIND: &str = "student_payment_detail.find";
    pub const ACTION_LOG_CREATE: &str = "invoice_action_log.create";
    pub const ACTION_LOG_FIND: &str = "invoice_action_log.find";
}

pub trait InvoiceRepo: Send + Sync {
    fn create(&self, exec: &dyn Executor, invoice: &Invoice) -> Result<(), DbError>;

    fn update(&self, exec: &dyn Executor, invoice: &Invoice) -> Result<(), DbError>;

    fn find(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<Invoice, DbError>;

    /// Returns only the invoices that exist; callers compare counts.
    fn find_many(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        invoice_ids: &[InvoiceId],
    ) -> Result<Vec<Invoice>, DbError>;

    fn list(&self, exec: &dyn Executor, tenant_id: TenantId) -> Result<Vec<Invoice>, DbError>;

    /// Next free invoice sequence number as seen by `exec`. Concurrent
    /// callers may get the same value.
    fn next_sequence_number(&self, exec: &dyn Executor, tenant_id: TenantId)
    -> Result<i64, DbError>;
}

pub trait BillItemRepo: Send + Sync {
    fn find_by_sequence_numbers(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        sequence_numbers: &[i64],
    ) -> Result<Vec<BillItem>, DbError>;

    fn find_by_order(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        order_id: &OrderId,
    ) -> Result<Vec<BillItem>, DbError>;

    fn find_by_statuses(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        statuses: &[BillingStatus],
    ) -> Result<Vec<BillItem>, DbError>;

    /// Move every listed item from `from` to `to`. An item found in any other
    /// status fails the call with [`DbError::LockHeld`], at the latest on
    /// commit.
    fn update_status(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        sequence_numbers: &[i64],
        from: BillingStatus,
        to: BillingStatus,
    ) -> Result<(), DbError>;
}

pub trait InvoiceBillItemRepo: Send + Sync {
    fn create(&self, exec: &dyn Executor, link: &InvoiceBillItem) -> Result<(), DbError>;

    fn find_by_invoice(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<Vec<InvoiceBillItem>, DbError>;
}

pub trait OrderRepo: Send + Sync {
    fn find(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        order_id: &OrderId,
    ) -> Result<Order, DbError>;
}

pub trait InvoiceScheduleRepo: Send + Sync {
    fn find(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        schedule_id: InvoiceScheduleId,
    ) -> Result<InvoiceSchedule, DbError>;

    /// Pending schedule running on `date`, keyed by scheduled date when
    /// `by_scheduled_date` is set and by invoice date otherwise.
    fn find_pending_on(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        date: NaiveDate,
        by_scheduled_date: bool,
    ) -> Result<Option<InvoiceSchedule>, DbError>;

    /// Pending schedule with the earliest invoice date.
    fn find_earliest_pending(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
    ) -> Result<Option<InvoiceSchedule>, DbError>;

    fn update(&self, exec: &dyn Executor, schedule: &InvoiceSchedule) -> Result<(), DbError>;
}

pub trait InvoiceScheduleHistoryRepo: Send + Sync {
    /// Fails with a unique violation when the schedule already has a run.
    fn create(&self, exec: &dyn Executor, history: &InvoiceScheduleHistory) -> Result<(), DbError>;

    fn update(&self, exec: &dyn Executor, history: &InvoiceScheduleHistory) -> Result<(), DbError>;

    fn find_by_schedule(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        schedule_id: InvoiceScheduleId,
    ) -> Result<Option<InvoiceScheduleHistory>, DbError>;
}

pub trait InvoiceScheduleStudentRepo: Send + Sync {
    fn create_many(
        &self,
        exec: &dyn Executor,
        students: &[InvoiceScheduleStudent],
    ) -> Result<(), DbError>;

    fn find_by_history(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        history_id: HistoryId,
    ) -> Result<Vec<InvoiceScheduleStudent>, DbError>;
}

pub trait OrganizationRepo: Send + Sync {
    fn list(&self, exec: &dyn Executor) -> Result<Vec<Organization>, DbError>;
}

pub trait PaymentRepo: Send + Sync {
    /// Returns how many payments were created.
    fn create_many(&self, exec: &dyn Executor, payments: &[Payment]) -> Result<usize, DbError>;

    fn find_by_invoice(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<Vec<Payment>, DbError>;

    fn next_sequence_number(&self, exec: &dyn Executor, tenant_id: TenantId)
    -> Result<i64, DbError>;
}

pub trait StudentPaymentDetailRepo: Send + Sync {
    fn find_many(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        student_ids: &[StudentId],
    ) -> Result<Vec<StudentPaymentDetail>, DbError>;
}

pub trait InvoiceActionLogRepo: Send + Sync {
    fn create_many(&self, exec: &dyn Executor, logs: &[InvoiceActionLog]) -> Result<(), DbError>;

    fn find_by_invoice(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<Vec<InvoiceActionLog>, DbError>;
}

/// The full set of repositories the workflows depend on.
#[derive(Clone)]
pub struct Repositories {
    pub invoices: Arc<dyn InvoiceRepo>,
    pub bill_items: Arc<dyn BillItemRepo>,
    pub invoice_bill_items: Arc<dyn InvoiceBillItemRepo>,
    pub orders: Arc<dyn OrderRepo>,
    pub schedules: Arc<dyn InvoiceScheduleRepo>,
    pub schedule_histories: Arc<dyn InvoiceScheduleHistoryRepo>,
    pub schedule_students: Arc<dyn InvoiceScheduleStudentRepo>,
    pub organizations: Arc<dyn OrganizationRepo>,
    pub payments: Arc<dyn PaymentRepo>,
    pub payment_details: Arc<dyn StudentPaymentDetailRepo>,
    pub action_logs: Arc<dyn InvoiceActionLogRepo>,
}

impl Repositories {
    /// Repositories backed by [`crate::db::InMemoryDatabase`] executors.
    pub fn in_memory() -> Self {
        Self {
            invoices: Arc::new(InMemoryInvoiceRepo),
            bill_items: Arc::new(InMemoryBillItemRepo),
            invoice_bill_items: Arc::new(InMemoryInvoiceBillItemRepo),
            orders: Arc::new(InMemoryOrderRepo),
            schedules: Arc::new(InMemoryInvoiceScheduleRepo),
            schedule_histories: Arc::new(InMemoryInvoiceScheduleHistoryRepo),
            schedule_students: Arc::new(InMemoryInvoiceScheduleStudentRepo),
            organizations: Arc::new(InMemoryOrganizationRepo),
            payments: Arc::new(InMemoryPaymentRepo),
            payment_details: Arc::new(InMemoryStudentPaymentDetailRepo),
            action_logs: Arc::new(InMemoryInvoiceActionLogRepo),
        }
    }
}

impl std::fmt::Debug for Repositories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repositories").finish_non_exhaustive()
    }
}
