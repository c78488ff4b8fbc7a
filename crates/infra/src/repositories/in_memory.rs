//! Repositories over [`crate::db::InMemoryDatabase`].
//!
//! These hold no state: data lives behind the executor handed to each call,
//! so the same repository works against a transaction or autocommit.

use chrono::NaiveDate;

use invoicemgmt_core::{
    HistoryId, InvoiceId, InvoiceScheduleId, OrderId, Organization, StudentId, TenantId,
};
use invoicemgmt_invoicing::{
    BillItem, BillingStatus, Invoice, InvoiceActionLog, InvoiceBillItem, InvoiceSchedule,
    InvoiceScheduleHistory, InvoiceScheduleStudent, Order, Payment, StudentPaymentDetail,
};

use super::ops;
use super::{
    BillItemRepo, InvoiceActionLogRepo, InvoiceBillItemRepo, InvoiceRepo,
    InvoiceScheduleHistoryRepo, InvoiceScheduleRepo, InvoiceScheduleStudentRepo, OrderRepo,
    OrganizationRepo, PaymentRepo, StudentPaymentDetailRepo,
};
use crate::db::in_memory::{Write, session};
use crate::db::{DbError, Executor};

#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryInvoiceRepo;

impl InvoiceRepo for InMemoryInvoiceRepo {
    fn create(&self, exec: &dyn Executor, invoice: &Invoice) -> Result<(), DbError> {
        session(exec)?.write(
            ops::INVOICE_CREATE,
            invoice.student_id.as_str(),
            Write::InsertInvoice(invoice.clone()),
        )
    }

    fn update(&self, exec: &dyn Executor, invoice: &Invoice) -> Result<(), DbError> {
        session(exec)?.write(
            ops::INVOICE_UPDATE,
            &invoice.id.to_string(),
            Write::UpdateInvoice(invoice.clone()),
        )
    }

    fn find(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<Invoice, DbError> {
        session(exec)?
            .read(ops::INVOICE_FIND, &invoice_id.to_string(), |t| {
                t.invoices
                    .get(&invoice_id)
                    .filter(|i| i.tenant_id == tenant_id)
                    .cloned()
            })?
            .ok_or_else(|| DbError::not_found(format!("invoice {invoice_id}")))
    }

    fn find_many(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        invoice_ids: &[InvoiceId],
    ) -> Result<Vec<Invoice>, DbError> {
        session(exec)?.read(ops::INVOICE_FIND, &tenant_id.to_string(), |t| {
            invoice_ids
                .iter()
                .filter_map(|id| t.invoices.get(id))
                .filter(|i| i.tenant_id == tenant_id)
                .cloned()
                .collect()
        })
    }

    fn list(&self, exec: &dyn Executor, tenant_id: TenantId) -> Result<Vec<Invoice>, DbError> {
        session(exec)?.read(ops::INVOICE_FIND, &tenant_id.to_string(), |t| {
            t.invoices
                .values()
                .filter(|i| i.tenant_id == tenant_id)
                .cloned()
                .collect()
        })
    }

    fn next_sequence_number(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
    ) -> Result<i64, DbError> {
        session(exec)?.read(ops::INVOICE_NEXT_SEQUENCE, &tenant_id.to_string(), |t| {
            t.invoices
                .values()
                .filter(|i| i.tenant_id == tenant_id)
                .map(|i| i.sequence_number)
                .max()
                .unwrap_or(0)
                + 1
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryBillItemRepo;

impl BillItemRepo for InMemoryBillItemRepo {
    fn find_by_sequence_numbers(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        sequence_numbers: &[i64],
    ) -> Result<Vec<BillItem>, DbError> {
        session(exec)?.read(ops::BILL_ITEM_FIND, &tenant_id.to_string(), |t| {
            sequence_numbers
                .iter()
                .filter_map(|seq| t.bill_items.get(&(tenant_id, *seq)))
                .cloned()
                .collect()
        })
    }

    fn find_by_order(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        order_id: &OrderId,
    ) -> Result<Vec<BillItem>, DbError> {
        session(exec)?.read(ops::BILL_ITEM_FIND, &tenant_id.to_string(), |t| {
            t.bill_items
                .values()
                .filter(|b| b.tenant_id == tenant_id && &b.order_id == order_id)
                .cloned()
                .collect()
        })
    }

    fn find_by_statuses(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        statuses: &[BillingStatus],
    ) -> Result<Vec<BillItem>, DbError> {
        session(exec)?.read(ops::BILL_ITEM_FIND, &tenant_id.to_string(), |t| {
            t.bill_items
                .values()
                .filter(|b| b.tenant_id == tenant_id && statuses.contains(&b.billing_status))
                .cloned()
                .collect()
        })
    }

    fn update_status(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        sequence_numbers: &[i64],
        from: BillingStatus,
        to: BillingStatus,
    ) -> Result<(), DbError> {
        session(exec)?.write(
            ops::BILL_ITEM_UPDATE,
            &tenant_id.to_string(),
            Write::UpdateBillItemStatus {
                tenant_id,
                sequence_numbers: sequence_numbers.to_vec(),
                from,
                to,
            },
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryInvoiceBillItemRepo;

impl InvoiceBillItemRepo for InMemoryInvoiceBillItemRepo {
    fn create(&self, exec: &dyn Executor, link: &InvoiceBillItem) -> Result<(), DbError> {
        session(exec)?.write(
            ops::INVOICE_BILL_ITEM_CREATE,
            &link.invoice_id.to_string(),
            Write::InsertInvoiceBillItem(link.clone()),
        )
    }

    fn find_by_invoice(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<Vec<InvoiceBillItem>, DbError> {
        session(exec)?.read(ops::BILL_ITEM_FIND, &invoice_id.to_string(), |t| {
            t.invoice_bill_items
                .iter()
                .filter(|l| l.tenant_id == tenant_id && l.invoice_id == invoice_id)
                .cloned()
                .collect()
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryOrderRepo;

impl OrderRepo for InMemoryOrderRepo {
    fn find(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        order_id: &OrderId,
    ) -> Result<Order, DbError> {
        session(exec)?
            .read(ops::ORDER_FIND, order_id.as_str(), |t| {
                t.orders.get(&(tenant_id, order_id.clone())).cloned()
            })?
            .ok_or_else(|| DbError::not_found(format!("order {order_id}")))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryInvoiceScheduleRepo;

impl InvoiceScheduleRepo for InMemoryInvoiceScheduleRepo {
    fn find(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        schedule_id: InvoiceScheduleId,
    ) -> Result<InvoiceSchedule, DbError> {
        session(exec)?
            .read(ops::SCHEDULE_FIND, &tenant_id.to_string(), |t| {
                t.schedules
                    .get(&schedule_id)
                    .filter(|s| s.tenant_id == tenant_id)
                    .cloned()
            })?
            .ok_or_else(|| DbError::not_found(format!("invoice schedule {schedule_id}")))
    }

    fn find_pending_on(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        date: NaiveDate,
        by_scheduled_date: bool,
    ) -> Result<Option<InvoiceSchedule>, DbError> {
        session(exec)?.read(ops::SCHEDULE_FIND, &tenant_id.to_string(), |t| {
            t.schedules
                .values()
                .filter(|s| s.tenant_id == tenant_id && s.is_pending())
                .filter(|s| s.runs_on(date, by_scheduled_date))
                .min_by_key(|s| s.created_at)
                .cloned()
        })
    }

    fn find_earliest_pending(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
    ) -> Result<Option<InvoiceSchedule>, DbError> {
        session(exec)?.read(ops::SCHEDULE_FIND, &tenant_id.to_string(), |t| {
            t.schedules
                .values()
                .filter(|s| s.tenant_id == tenant_id && s.is_pending())
                .min_by_key(|s| s.invoice_date)
                .cloned()
        })
    }

    fn update(&self, exec: &dyn Executor, schedule: &InvoiceSchedule) -> Result<(), DbError> {
        session(exec)?.write(
            ops::SCHEDULE_UPDATE,
            &schedule.id.to_string(),
            Write::UpdateSchedule(schedule.clone()),
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryInvoiceScheduleHistoryRepo;

impl InvoiceScheduleHistoryRepo for InMemoryInvoiceScheduleHistoryRepo {
    fn create(&self, exec: &dyn Executor, history: &InvoiceScheduleHistory) -> Result<(), DbError> {
        session(exec)?.write(
            ops::HISTORY_CREATE,
            &history.schedule_id.to_string(),
            Write::InsertHistory(history.clone()),
        )
    }

    fn update(&self, exec: &dyn Executor, history: &InvoiceScheduleHistory) -> Result<(), DbError> {
        session(exec)?.write(
            ops::HISTORY_UPDATE,
            &history.schedule_id.to_string(),
            Write::UpdateHistory(history.clone()),
        )
    }

    fn find_by_schedule(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        schedule_id: InvoiceScheduleId,
    ) -> Result<Option<InvoiceScheduleHistory>, DbError> {
        session(exec)?.read(ops::SCHEDULE_FIND, &schedule_id.to_string(), |t| {
            t.histories
                .values()
                .find(|h| h.tenant_id == tenant_id && h.schedule_id == schedule_id)
                .cloned()
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryInvoiceScheduleStudentRepo;

impl InvoiceScheduleStudentRepo for InMemoryInvoiceScheduleStudentRepo {
    fn create_many(
        &self,
        exec: &dyn Executor,
        students: &[InvoiceScheduleStudent],
    ) -> Result<(), DbError> {
        let session = session(exec)?;
        for student in students {
            session.write(
                ops::SCHEDULE_STUDENT_CREATE,
                &student.history_id.to_string(),
                Write::InsertScheduleStudent(student.clone()),
            )?;
        }
        Ok(())
    }

    fn find_by_history(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        history_id: HistoryId,
    ) -> Result<Vec<InvoiceScheduleStudent>, DbError> {
        session(exec)?.read(ops::SCHEDULE_FIND, &history_id.to_string(), |t| {
            t.schedule_students
                .iter()
                .filter(|s| s.tenant_id == tenant_id && s.history_id == history_id)
                .cloned()
                .collect()
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryOrganizationRepo;

impl OrganizationRepo for InMemoryOrganizationRepo {
    fn list(&self, exec: &dyn Executor) -> Result<Vec<Organization>, DbError> {
        session(exec)?.read(ops::ORGANIZATION_LIST, "", |t| t.organizations.clone())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryPaymentRepo;

impl PaymentRepo for InMemoryPaymentRepo {
    fn create_many(&self, exec: &dyn Executor, payments: &[Payment]) -> Result<usize, DbError> {
        let session = session(exec)?;
        for payment in payments {
            session.write(
                ops::PAYMENT_CREATE,
                &payment.tenant_id.to_string(),
                Write::InsertPayment(payment.clone()),
            )?;
        }
        Ok(payments.len())
    }

    fn find_by_invoice(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<Vec<Payment>, DbError> {
        session(exec)?.read(ops::PAYMENT_FIND, &invoice_id.to_string(), |t| {
            t.payments
                .values()
                .filter(|p| p.tenant_id == tenant_id && p.invoice_id == invoice_id)
                .cloned()
                .collect()
        })
    }

    fn next_sequence_number(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
    ) -> Result<i64, DbError> {
        session(exec)?.read(ops::PAYMENT_NEXT_SEQUENCE, &tenant_id.to_string(), |t| {
            t.payments
                .values()
                .filter(|p| p.tenant_id == tenant_id)
                .map(|p| p.sequence_number)
                .max()
                .unwrap_or(0)
                + 1
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryStudentPaymentDetailRepo;

impl StudentPaymentDetailRepo for InMemoryStudentPaymentDetailRepo {
    fn find_many(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        student_ids: &[StudentId],
    ) -> Result<Vec<StudentPaymentDetail>, DbError> {
        session(exec)?.read(ops::PAYMENT_DETAIL_FIND, &tenant_id.to_string(), |t| {
            student_ids
                .iter()
                .filter_map(|s| t.payment_details.get(&(tenant_id, s.clone())))
                .cloned()
                .collect()
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryInvoiceActionLogRepo;

impl InvoiceActionLogRepo for InMemoryInvoiceActionLogRepo {
    fn create_many(&self, exec: &dyn Executor, logs: &[InvoiceActionLog]) -> Result<(), DbError> {
        let session = session(exec)?;
        for log in logs {
            session.write(
                ops::ACTION_LOG_CREATE,
                &log.tenant_id.to_string(),
                Write::InsertActionLog(log.clone()),
            )?;
        }
        Ok(())
    }

    fn find_by_invoice(
        &self,
        exec: &dyn Executor,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<Vec<InvoiceActionLog>, DbError> {
        session(exec)?.read(ops::ACTION_LOG_FIND, &invoice_id.to_string(), |t| {
            t.action_logs
                .iter()
                .filter(|l| l.tenant_id == tenant_id && l.invoice_id == invoice_id)
                .cloned()
                .collect()
        })
    }
}
