use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use invoicemgmt_core::{
    InvoiceScheduleId, OrderId, Organization, RequestContext, StudentId, TenantId, UserId,
};
use invoicemgmt_infra::config::ServiceConfig;
use invoicemgmt_infra::db::InMemoryDatabase;
use invoicemgmt_infra::external::{InMemoryOrderService, StaticFeatureFlags};
use invoicemgmt_infra::repositories::Repositories;
use invoicemgmt_invoicing::{
    BillItem, BillingStatus, BillingType, InvoiceSchedule, InvoiceScheduleStatus,
};
use invoicemgmt_service::dto::InvoiceScheduleCheckerRequest;
use invoicemgmt_service::{InvoiceModifierDeps, InvoiceModifierService};

fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env().context("invalid configuration")?;
    invoicemgmt_observability::init_with(config.log_format);

    let now = Utc::now();
    let db = Arc::new(InMemoryDatabase::new());
    let tenant_id = seed_demo_tenant(&db, now);
    tracing::info!(tenant_id = %tenant_id, "seeded demo tenant");

    let service = InvoiceModifierService::new(
        InvoiceModifierDeps {
            db: db.clone(),
            repos: Repositories::in_memory(),
            order_service: Arc::new(InMemoryOrderService::new()),
            flags: Arc::new(StaticFeatureFlags::new()),
        },
        config,
    );

    let ctx = RequestContext::for_tenant(tenant_id).with_timeout(Duration::from_secs(30));
    let response = service.invoice_schedule_checker(
        &ctx,
        InvoiceScheduleCheckerRequest {
            invoice_date: Some(now),
        },
    )?;

    let summary = serde_json::json!({
        "response": response,
        "db": {
            "transactions_begun": db.stats().begun,
            "transactions_committed": db.stats().committed,
            "transactions_rolled_back": db.stats().rolled_back,
        },
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// One organization with a schedule due today and a few billed items.
fn seed_demo_tenant(db: &InMemoryDatabase, now: DateTime<Utc>) -> TenantId {
    let tenant_id = TenantId::new();
    db.add_organization(Organization::new(tenant_id, "Demo School"));
    db.add_schedule(InvoiceSchedule {
        id: InvoiceScheduleId::new(),
        tenant_id,
        invoice_date: now,
        scheduled_date: now,
        status: InvoiceScheduleStatus::Scheduled,
        user_id: UserId::new(),
        created_at: now - ChronoDuration::days(30),
    });

    let billed_at = now - ChronoDuration::days(1);
    for (seq, student, price) in [
        (1, "student-1", 12_000),
        (2, "student-1", 3_500),
        (3, "student-2", 8_000),
        (4, "student-3", 15_000),
    ] {
        db.add_bill_item(BillItem {
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
        });
    }
    tenant_id
}
