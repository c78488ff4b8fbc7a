//! Shared fixtures for the service integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use invoicemgmt_core::{
    InvoiceScheduleId, OrderId, Organization, RequestContext, StudentId, TenantId, UserId,
};
use invoicemgmt_infra::config::ServiceConfig;
use invoicemgmt_infra::db::{Database, InMemoryDatabase};
use invoicemgmt_infra::external::{InMemoryOrderService, StaticFeatureFlags};
use invoicemgmt_infra::repositories::Repositories;
use invoicemgmt_infra::retry::RetryPolicy;
use invoicemgmt_invoicing::{
    BankAccount, BillItem, BillingStatus, BillingType, Invoice, InvoiceSchedule,
    InvoiceScheduleStatus, InvoiceType, Order, OrderStatus, PaymentDates, PaymentMethod,
    StudentPaymentDetail,
};
use invoicemgmt_service::dto::GenerateInvoiceDetail;
use invoicemgmt_service::{InvoiceModifierDeps, InvoiceModifierService};

/// Small pool, no sleeps between retries.
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        worker_count: 4,
        tenant_parallelism: 2,
        ..ServiceConfig::default()
    }
    .without_backoff()
}

/// One worker so that retries happen in a predictable order.
pub fn sequential_config() -> ServiceConfig {
    ServiceConfig {
        worker_count: 1,
        ..test_config()
    }
}

/// Enough attempts to absorb heavy sequence-number contention.
pub fn contended_config(workers: usize) -> ServiceConfig {
    ServiceConfig {
        worker_count: workers,
        generation_retry: RetryPolicy::immediate(200),
        payment_sequence_retry: RetryPolicy::immediate(200),
        ..test_config()
    }
}

pub struct Harness {
    pub db: Arc<InMemoryDatabase>,
    pub repos: Repositories,
    pub order_service: Arc<InMemoryOrderService>,
    pub flags: Arc<StaticFeatureFlags>,
    pub service: InvoiceModifierService,
    pub tenant_id: TenantId,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ServiceConfig) -> Self {
        let db = Arc::new(InMemoryDatabase::new());
        let repos = Repositories::in_memory();
        let order_service = Arc::new(InMemoryOrderService::new());
        let flags = Arc::new(StaticFeatureFlags::new());
        let service = InvoiceModifierService::new(
            InvoiceModifierDeps {
                db: db.clone(),
                repos: repos.clone(),
                order_service: order_service.clone(),
                flags: flags.clone(),
            },
            config,
        );
        let tenant_id = TenantId::new();
        db.add_organization(Organization::new(tenant_id, "Test School"));

        Self {
            db,
            repos,
            order_service,
            flags,
            service,
            tenant_id,
        }
    }

    pub fn ctx(&self) -> RequestContext {
        RequestContext::for_tenant(self.tenant_id).with_user(UserId::new())
    }

    /// A second organization sharing the same database.
    pub fn add_tenant(&self, name: &str) -> TenantId {
        let tenant_id = TenantId::new();
        self.db.add_organization(Organization::new(tenant_id, name));
        tenant_id
    }

    pub fn add_bill_item(&self, seq: i64, student: &str, price: i64) -> BillItem {
        let item = bill_item(self.tenant_id, seq, student, price);
        self.db.add_bill_item(item.clone());
        item
    }

    pub fn add_order(&self, order_id: &str, student: &str, status: OrderStatus, is_reviewed: bool) {
        self.db.add_order(Order {
            id: OrderId::new(order_id),
            tenant_id: self.tenant_id,
            student_id: StudentId::new(student),
            status,
            is_reviewed,
        });
    }

    /// A billed item belonging to `order_id`, billed at `bill_date`.
    pub fn add_order_item(
        &self,
        seq: i64,
        order_id: &str,
        student: &str,
        price: i64,
        bill_date: DateTime<Utc>,
    ) -> BillItem {
        let mut item = bill_item(self.tenant_id, seq, student, price);
        item.order_id = OrderId::new(order_id);
        item.bill_date = bill_date;
        self.db.add_bill_item(item.clone());
        item
    }

    pub fn add_draft_invoice(&self, student: &str, total: i64, seq: i64) -> Invoice {
        let invoice = draft_invoice(self.tenant_id, student, total, seq);
        self.db.add_invoice(invoice.clone());
        invoice
    }

    pub fn add_payment_detail(
        &self,
        student: &str,
        method: Option<PaymentMethod>,
        bank_account: Option<BankAccount>,
    ) {
        self.db.add_payment_detail(StudentPaymentDetail {
            tenant_id: self.tenant_id,
            student_id: StudentId::new(student),
            payment_method: method,
            bank_account,
        });
    }

    pub fn invoices(&self) -> Vec<Invoice> {
        self.invoices_of(self.tenant_id)
    }

    pub fn invoices_of(&self, tenant_id: TenantId) -> Vec<Invoice> {
        self.repos
            .invoices
            .list(self.db.executor(), tenant_id)
            .unwrap()
    }

    pub fn bill_item_status(&self, tenant_id: TenantId, seq: i64) -> BillingStatus {
        self.repos
            .bill_items
            .find_by_sequence_numbers(self.db.executor(), tenant_id, &[seq])
            .unwrap()[0]
            .billing_status
    }

    pub fn invoice(&self, invoice: &Invoice) -> Invoice {
        self.repos
            .invoices
            .find(self.db.executor(), self.tenant_id, invoice.id)
            .unwrap()
    }
}

pub fn bill_item(tenant_id: TenantId, seq: i64, student: &str, price: i64) -> BillItem {
    let billed_at = Utc::now() - Duration::days(1);
    BillItem {
        tenant_id,
        sequence_number: seq,
        order_id: OrderId::new(format!("order-{seq}")),
        student_id: StudentId::new(student),
        billing_status: BillingStatus::Billed,
        billing_type: BillingType::Normal,
        final_price: price,
        adjustment_price: None,
        bill_date: billed_at,
        created_at: billed_at,
        is_reviewed: true,
    }
}

pub fn detail(student: &str, seqs: Vec<i64>, total: i64) -> GenerateInvoiceDetail {
    GenerateInvoiceDetail {
        student_id: StudentId::new(student),
        bill_item_sequence_numbers: seqs,
        invoice_type: InvoiceType::Manual,
        sub_total: total,
        total,
    }
}

pub fn draft_invoice(tenant_id: TenantId, student: &str, total: i64, seq: i64) -> Invoice {
    Invoice::draft(
        tenant_id,
        StudentId::new(student),
        InvoiceType::Manual,
        total,
        total,
        seq,
        Utc::now(),
    )
}

pub fn schedule(tenant_id: TenantId, invoice_date: DateTime<Utc>) -> InvoiceSchedule {
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

/// Due tomorrow, expires in a week.
pub fn payment_dates() -> PaymentDates {
    let now = Utc::now();
    PaymentDates::new(now + Duration::days(1), now + Duration::days(7))
}
