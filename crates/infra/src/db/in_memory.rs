//! In-memory implementation of the database contract.
//!
//! Each transaction works on a snapshot of the committed tables taken at
//! `begin` and records its writes in a log. Commit replays the log against the
//! current committed state, so two transactions that picked the same sequence
//! number both succeed locally and the later commit fails with
//! [`DbError::UniqueViolation`], the same way concurrent writers collide on a
//! real unique index.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use tracing::debug;

use invoicemgmt_core::{
    HistoryId, InvoiceId, InvoiceScheduleId, OrderId, Organization, PaymentId, RequestContext,
    StudentId, TenantId,
};
use invoicemgmt_invoicing::{
    BillItem, BillingStatus, Invoice, InvoiceActionLog, InvoiceBillItem, InvoiceSchedule,
    InvoiceScheduleHistory, InvoiceScheduleStudent, Order, Payment, StudentPaymentDetail,
};

use super::error::DbError;
use super::faults::{COMMIT, FaultInjector};
use super::{Database, Executor, Transaction, TxId};

pub const INVOICE_SEQUENCE_CONSTRAINT: &str = "invoice_sequence_number_tenant_unique";
pub const PAYMENT_SEQUENCE_CONSTRAINT: &str = "payment_sequence_number_tenant_unique";
pub const HISTORY_SCHEDULE_CONSTRAINT: &str = "invoice_schedule_history_schedule_id_unique";

#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub(crate) organizations: Vec<Organization>,
    pub(crate) invoices: BTreeMap<InvoiceId, Invoice>,
    pub(crate) invoice_bill_items: Vec<InvoiceBillItem>,
    pub(crate) bill_items: BTreeMap<(TenantId, i64), BillItem>,
    pub(crate) orders: HashMap<(TenantId, OrderId), Order>,
    pub(crate) schedules: BTreeMap<InvoiceScheduleId, InvoiceSchedule>,
    pub(crate) histories: BTreeMap<HistoryId, InvoiceScheduleHistory>,
    pub(crate) schedule_students: Vec<InvoiceScheduleStudent>,
    pub(crate) payments: BTreeMap<PaymentId, Payment>,
    pub(crate) payment_details: HashMap<(TenantId, StudentId), StudentPaymentDetail>,
    pub(crate) action_logs: Vec<InvoiceActionLog>,
}

/// A single write, replayable against any version of the tables.
#[derive(Debug, Clone)]
pub(crate) enum Write {
    InsertInvoice(Invoice),
    UpdateInvoice(Invoice),
    InsertInvoiceBillItem(InvoiceBillItem),
    /// Compare-and-set: every item must still be in `from`.
    UpdateBillItemStatus {
        tenant_id: TenantId,
        sequence_numbers: Vec<i64>,
        from: BillingStatus,
        to: BillingStatus,
    },
    UpdateSchedule(InvoiceSchedule),
    InsertHistory(InvoiceScheduleHistory),
    UpdateHistory(InvoiceScheduleHistory),
    InsertScheduleStudent(InvoiceScheduleStudent),
    InsertPayment(Payment),
    InsertActionLog(InvoiceActionLog),
}

impl Tables {
    pub(crate) fn apply(&mut self, write: Write) -> Result<(), DbError> {
        match write {
            Write::InsertInvoice(invoice) => {
                if self.invoices.contains_key(&invoice.id) {
                    return Err(DbError::unique("invoices_pk"));
                }
                let taken = self.invoices.values().any(|i| {
                    i.tenant_id == invoice.tenant_id && i.sequence_number == invoice.sequence_number
                });
                if taken {
                    return Err(DbError::unique(INVOICE_SEQUENCE_CONSTRAINT));
                }
                self.invoices.insert(invoice.id, invoice);
            }
            Write::UpdateInvoice(invoice) => {
                let slot = self
                    .invoices
                    .get_mut(&invoice.id)
                    .ok_or_else(|| DbError::not_found(format!("invoice {}", invoice.id)))?;
                *slot = invoice;
            }
            Write::InsertInvoiceBillItem(link) => self.invoice_bill_items.push(link),
            Write::UpdateBillItemStatus {
                tenant_id,
                sequence_numbers,
                from,
                to,
            } => {
                for seq in &sequence_numbers {
                    let item = self
                        .bill_items
                        .get(&(tenant_id, *seq))
                        .ok_or_else(|| DbError::not_found(format!("bill item {seq}")))?;
                    if item.billing_status != from {
                        return Err(DbError::LockHeld(format!(
                            "bill item {seq} moved to {} by another writer",
                            item.billing_status
                        )));
                    }
                }
                for seq in &sequence_numbers {
                    if let Some(item) = self.bill_items.get_mut(&(tenant_id, *seq)) {
                        item.billing_status = to;
                    }
                }
            }
            Write::UpdateSchedule(schedule) => {
                let slot = self
                    .schedules
                    .get_mut(&schedule.id)
                    .ok_or_else(|| {
                        DbError::not_found(format!("invoice schedule {}", schedule.id))
                    })?;
                *slot = schedule;
            }
            Write::InsertHistory(history) => {
                if self
                    .histories
                    .values()
                    .any(|h| h.schedule_id == history.schedule_id)
                {
                    return Err(DbError::unique(HISTORY_SCHEDULE_CONSTRAINT));
                }
                self.histories.insert(history.id, history);
            }
            Write::UpdateHistory(history) => {
                let slot = self.histories.get_mut(&history.id).ok_or_else(|| {
                    DbError::not_found(format!("invoice schedule history {}", history.id))
                })?;
                *slot = history;
            }
            Write::InsertScheduleStudent(student) => self.schedule_students.push(student),
            Write::InsertPayment(payment) => {
                if self.payments.contains_key(&payment.id) {
                    return Err(DbError::unique("payments_pk"));
                }
                let taken = self.payments.values().any(|p| {
                    p.tenant_id == payment.tenant_id && p.sequence_number == payment.sequence_number
                });
                if taken {
                    return Err(DbError::unique(PAYMENT_SEQUENCE_CONSTRAINT));
                }
                self.payments.insert(payment.id, payment);
            }
            Write::InsertActionLog(log) => self.action_logs.push(log),
        }
        Ok(())
    }
}

/// Counters for transaction lifecycle events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DbStats {
    pub begun: usize,
    pub committed: usize,
    pub rolled_back: usize,
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<Tables>,
    faults: FaultInjector,
    next_tx: AtomicU64,
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
}

impl Shared {
    fn read_tables(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tables(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory database for tests and local wiring.
#[derive(Debug, Clone)]
pub struct InMemoryDatabase {
    shared: Arc<Shared>,
    autocommit: Autocommit,
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        let shared = Arc::new(Shared::default());
        Self {
            autocommit: Autocommit {
                shared: Arc::clone(&shared),
            },
            shared,
        }
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.shared.faults
    }

    pub fn stats(&self) -> DbStats {
        DbStats {
            begun: self.shared.begun.load(Ordering::SeqCst),
            committed: self.shared.committed.load(Ordering::SeqCst),
            rolled_back: self.shared.rolled_back.load(Ordering::SeqCst),
        }
    }

    pub fn add_organization(&self, organization: Organization) {
        self.shared.write_tables().organizations.push(organization);
    }

    pub fn add_order(&self, order: Order) {
        self.shared
            .write_tables()
            .orders
            .insert((order.tenant_id, order.id.clone()), order);
    }

    pub fn add_bill_item(&self, item: BillItem) {
        self.shared
            .write_tables()
            .bill_items
            .insert((item.tenant_id, item.sequence_number), item);
    }

    pub fn add_schedule(&self, schedule: InvoiceSchedule) {
        self.shared
            .write_tables()
            .schedules
            .insert(schedule.id, schedule);
    }

    pub fn add_invoice(&self, invoice: Invoice) {
        self.shared.write_tables().invoices.insert(invoice.id, invoice);
    }

    pub fn add_payment_detail(&self, detail: StudentPaymentDetail) {
        self.shared
            .write_tables()
            .payment_details
            .insert((detail.tenant_id, detail.student_id.clone()), detail);
    }
}

impl Database for InMemoryDatabase {
    fn begin(&self, ctx: &RequestContext) -> Result<Box<dyn Transaction>, DbError> {
        if ctx.is_expired() {
            return Err(DbError::DeadlineExceeded);
        }

        let id = TxId(self.shared.next_tx.fetch_add(1, Ordering::SeqCst) + 1);
        let snapshot = self.shared.read_tables().clone();
        self.shared.begun.fetch_add(1, Ordering::SeqCst);
        debug!(tx = %id, tenant_id = %ctx.tenant_id(), "transaction started");

        Ok(Box::new(InMemoryTransaction {
            id,
            shared: Arc::clone(&self.shared),
            deadline: ctx.deadline(),
            state: Mutex::new(TxState {
                snapshot,
                log: Vec::new(),
            }),
        }))
    }

    fn executor(&self) -> &dyn Executor {
        &self.autocommit
    }
}

/// Autocommit executor: reads committed state, writes apply immediately.
#[derive(Debug, Clone)]
pub struct Autocommit {
    shared: Arc<Shared>,
}

impl Executor for Autocommit {
    fn transaction_id(&self) -> Option<TxId> {
        None
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct TxState {
    snapshot: Tables,
    log: Vec<Write>,
}

#[derive(Debug)]
pub struct InMemoryTransaction {
    id: TxId,
    shared: Arc<Shared>,
    deadline: Option<Instant>,
    state: Mutex<TxState>,
}

impl InMemoryTransaction {
    fn ensure_open(&self) -> Result<(), DbError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(DbError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    fn discard(&self) {
        self.shared.rolled_back.fetch_add(1, Ordering::SeqCst);
        debug!(tx = %self.id, "transaction rolled back");
    }
}

impl Executor for InMemoryTransaction {
    fn transaction_id(&self) -> Option<TxId> {
        Some(self.id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Transaction for InMemoryTransaction {
    fn commit(self: Box<Self>) -> Result<(), DbError> {
        if let Err(err) = self
            .ensure_open()
            .and_then(|()| self.shared.faults.check(COMMIT, ""))
        {
            self.discard();
            return Err(err);
        }

        let this = *self;
        let state = this.state.into_inner().unwrap_or_else(PoisonError::into_inner);

        let mut tables = this.shared.write_tables();
        let mut next = tables.clone();
        for write in state.log {
            if let Err(err) = next.apply(write) {
                drop(tables);
                this.shared.rolled_back.fetch_add(1, Ordering::SeqCst);
                debug!(tx = %this.id, error = %err, "commit rejected");
                return Err(err);
            }
        }
        *tables = next;
        drop(tables);

        this.shared.committed.fetch_add(1, Ordering::SeqCst);
        debug!(tx = %this.id, "transaction committed");
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.discard();
        Ok(())
    }

    fn as_executor(&self) -> &dyn Executor {
        self
    }
}

/// Access to the tables behind an executor, for the in-memory repositories.
pub(crate) struct Session<'a> {
    shared: &'a Shared,
    tx: Option<&'a InMemoryTransaction>,
}

pub(crate) fn session(executor: &dyn Executor) -> Result<Session<'_>, DbError> {
    let any = executor.as_any();
    if let Some(tx) = any.downcast_ref::<InMemoryTransaction>() {
        return Ok(Session {
            shared: &tx.shared,
            tx: Some(tx),
        });
    }
    if let Some(auto) = any.downcast_ref::<Autocommit>() {
        return Ok(Session {
            shared: &auto.shared,
            tx: None,
        });
    }
    Err(DbError::other(
        "executor is not backed by the in-memory database",
    ))
}

impl Session<'_> {
    /// Run a read against the transaction's snapshot or the committed state.
    pub(crate) fn read<R>(
        &self,
        op: &str,
        key: &str,
        f: impl FnOnce(&Tables) -> R,
    ) -> Result<R, DbError> {
        self.enter(op, key)?;
        match self.tx {
            Some(tx) => {
                let state = tx.state.lock().unwrap_or_else(PoisonError::into_inner);
                Ok(f(&state.snapshot))
            }
            None => Ok(f(&self.shared.read_tables())),
        }
    }

    pub(crate) fn write(&self, op: &str, key: &str, write: Write) -> Result<(), DbError> {
        self.enter(op, key)?;
        match self.tx {
            Some(tx) => {
                let mut state = tx.state.lock().unwrap_or_else(PoisonError::into_inner);
                state.snapshot.apply(write.clone())?;
                state.log.push(write);
                Ok(())
            }
            None => self.shared.write_tables().apply(write),
        }
    }

    fn enter(&self, op: &str, key: &str) -> Result<(), DbError> {
        if let Some(tx) = self.tx {
            tx.ensure_open()?;
        }
        self.shared.faults.check(op, key)
    }
}
