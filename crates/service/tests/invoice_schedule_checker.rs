mod common;

use chrono::{DateTime, Duration, Utc};

use invoicemgmt_core::{StudentId, TenantId};
use invoicemgmt_infra::db::{Database, DbError, Fault};
use invoicemgmt_infra::external::Flag;
use invoicemgmt_infra::repositories::ops;
use invoicemgmt_invoicing::{
    BillingStatus, InvoiceSchedule, InvoiceScheduleHistory, InvoiceScheduleStatus, InvoiceType,
};
use invoicemgmt_service::ServiceError;
use invoicemgmt_service::dto::InvoiceScheduleCheckerRequest;

use common::{Harness, bill_item, schedule};

fn on(date: DateTime<Utc>) -> InvoiceScheduleCheckerRequest {
    InvoiceScheduleCheckerRequest {
        invoice_date: Some(date),
    }
}

fn seed_schedule(h: &Harness, tenant_id: TenantId, invoice_date: DateTime<Utc>) -> InvoiceSchedule {
    let schedule = schedule(tenant_id, invoice_date);
    h.db.add_schedule(schedule.clone());
    schedule
}

fn seed_items(h: &Harness, tenant_id: TenantId, items: &[(i64, &str, i64)]) {
    for (seq, student, price) in items {
        h.db.add_bill_item(bill_item(tenant_id, *seq, student, *price));
    }
}

fn history(h: &Harness, schedule: &InvoiceSchedule) -> Option<InvoiceScheduleHistory> {
    h.repos
        .schedule_histories
        .find_by_schedule(h.db.executor(), schedule.tenant_id, schedule.id)
        .unwrap()
}

fn status(h: &Harness, schedule: &InvoiceSchedule) -> InvoiceScheduleStatus {
    h.repos
        .schedules
        .find(h.db.executor(), schedule.tenant_id, schedule.id)
        .unwrap()
        .status
}

#[test]
fn missing_invoice_date_is_rejected() {
    let h = Harness::new();
    let err = h
        .service
        .invoice_schedule_checker(&h.ctx(), InvoiceScheduleCheckerRequest::default())
        .unwrap_err();
    assert_eq!(err, ServiceError::InvalidArgument("invalid InvoiceDate value".into()));
}

#[test]
fn every_tenant_runs_its_due_schedule() {
    let h = Harness::new();
    let now = Utc::now();
    let tenant_b = h.add_tenant("Second School");

    let schedule_a = seed_schedule(&h, h.tenant_id, now);
    let schedule_b = seed_schedule(&h, tenant_b, now);
    seed_items(
        &h,
        h.tenant_id,
        &[(1, "student-1", 100), (2, "student-1", 50), (3, "student-2", 70)],
    );
    seed_items(&h, tenant_b, &[(1, "student-9", 500)]);

    let response = h.service.invoice_schedule_checker(&h.ctx(), on(now)).unwrap();
    assert!(response.successful);
    assert_eq!(response.tenants.len(), 2);

    let run_a = response.tenants.iter().find(|r| r.tenant_id == h.tenant_id).unwrap();
    assert_eq!(run_a.schedule_id, Some(schedule_a.id));
    assert_eq!(run_a.total_students, 2);
    assert_eq!(run_a.failed_invoices, 0);

    let run_b = response.tenants.iter().find(|r| r.tenant_id == tenant_b).unwrap();
    assert_eq!(run_b.schedule_id, Some(schedule_b.id));
    assert_eq!(run_b.total_students, 1);

    for schedule in [&schedule_a, &schedule_b] {
        assert_eq!(status(&h, schedule), InvoiceScheduleStatus::Completed);
        let history = history(&h, schedule).unwrap();
        assert!(history.execution_end.is_some());
    }

    let invoices_a = h.invoices_of(h.tenant_id);
    assert_eq!(invoices_a.len(), 2);
    assert!(invoices_a.iter().all(|i| i.invoice_type == InvoiceType::Scheduled));
    let student_1 = invoices_a
        .iter()
        .find(|i| i.student_id == StudentId::new("student-1"))
        .unwrap();
    assert_eq!(student_1.total, 150);

    let invoices_b = h.invoices_of(tenant_b);
    assert_eq!(invoices_b.len(), 1);
    assert_eq!(invoices_b[0].sequence_number, 1);
}

#[test]
fn a_failing_tenant_does_not_stop_the_others() {
    let h = Harness::new();
    let now = Utc::now();
    let tenant_b = h.add_tenant("Broken School");

    let schedule_a = seed_schedule(&h, h.tenant_id, now);
    let schedule_b = seed_schedule(&h, tenant_b, now);
    seed_items(&h, h.tenant_id, &[(1, "student-1", 100)]);
    seed_items(&h, tenant_b, &[(1, "student-2", 100)]);
    h.db.faults().inject(
        Fault::new(ops::HISTORY_CREATE, DbError::ConnectionClosed)
            .for_key(schedule_b.id.to_string()),
    );

    let err = h.service.invoice_schedule_checker(&h.ctx(), on(now)).unwrap_err();
    assert_eq!(err, ServiceError::Internal(format!("tenant {tenant_b}: connection closed")));

    assert_eq!(status(&h, &schedule_a), InvoiceScheduleStatus::Completed);
    assert_eq!(h.invoices_of(h.tenant_id).len(), 1);

    assert_eq!(status(&h, &schedule_b), InvoiceScheduleStatus::Scheduled);
    assert!(history(&h, &schedule_b).is_none());
    assert!(h.invoices_of(tenant_b).is_empty());
}

#[test]
fn next_schedule_skips_items_invoiced_by_the_previous_run() {
    let h = Harness::new();
    let now = Utc::now();
    let tomorrow = now + Duration::days(1);
    seed_schedule(&h, h.tenant_id, now);
    let next = seed_schedule(&h, h.tenant_id, tomorrow);
    seed_items(&h, h.tenant_id, &[(1, "student-1", 100)]);

    let first = h.service.invoice_schedule_checker(&h.ctx(), on(now)).unwrap();
    assert_eq!(first.tenants[0].total_students, 1);
    assert_eq!(h.bill_item_status(h.tenant_id, 1), BillingStatus::Invoiced);

    let second = h
        .service
        .invoice_schedule_checker(&h.ctx(), on(tomorrow))
        .unwrap();
    assert_eq!(second.tenants[0].schedule_id, Some(next.id));
    assert_eq!(second.tenants[0].total_students, 0);
    assert_eq!(status(&h, &next), InvoiceScheduleStatus::Completed);
    assert_eq!(h.invoices().len(), 1);
}

#[test]
fn run_failing_after_history_leaves_schedule_incomplete() {
    let h = Harness::new();
    let now = Utc::now();
    let schedule = seed_schedule(&h, h.tenant_id, now);
    seed_items(&h, h.tenant_id, &[(1, "student-1", 100)]);
    h.db.faults().inject(
        Fault::new(ops::BILL_ITEM_FIND, DbError::ConnectionClosed)
            .for_key(h.tenant_id.to_string())
            .times(1),
    );

    let err = h.service.invoice_schedule_checker(&h.ctx(), on(now)).unwrap_err();
    assert_eq!(
        err,
        ServiceError::Internal(format!("tenant {}: connection closed", h.tenant_id))
    );
    assert_eq!(status(&h, &schedule), InvoiceScheduleStatus::Incomplete);
    let history = history(&h, &schedule).unwrap();
    assert!(history.execution_end.is_some());
    assert_eq!(history.total_students, 0);

    // The schedule is no longer pending, so a rerun does not report it as running.
    let rerun = h.service.invoice_schedule_checker(&h.ctx(), on(now)).unwrap();
    assert_eq!(rerun.tenants[0].schedule_id, None);
    assert!(h.invoices().is_empty());
    assert_eq!(h.bill_item_status(h.tenant_id, 1), BillingStatus::Billed);
}

#[test]
fn schedule_already_running_is_reported() {
    let h = Harness::new();
    let now = Utc::now();
    let schedule = seed_schedule(&h, h.tenant_id, now);
    seed_items(&h, h.tenant_id, &[(1, "student-1", 100)]);
    h.repos
        .schedule_histories
        .create(h.db.executor(), &InvoiceScheduleHistory::start(&schedule, now))
        .unwrap();

    let err = h.service.invoice_schedule_checker(&h.ctx(), on(now)).unwrap_err();
    assert_eq!(
        err,
        ServiceError::Internal(format!(
            "tenant {}: invoice schedule {} history already exists or another process is currently running",
            h.tenant_id, schedule.id
        ))
    );
    assert!(h.invoices().is_empty());
}

#[test]
fn tenant_without_due_schedule_is_skipped() {
    let h = Harness::new();
    let now = Utc::now();
    let later = seed_schedule(&h, h.tenant_id, now + Duration::days(10));
    seed_items(&h, h.tenant_id, &[(1, "student-1", 100)]);

    let response = h.service.invoice_schedule_checker(&h.ctx(), on(now)).unwrap();
    assert!(response.successful);
    assert_eq!(response.tenants.len(), 1);
    assert_eq!(response.tenants[0].schedule_id, None);
    assert_eq!(response.tenants[0].total_students, 0);

    assert!(history(&h, &later).is_none());
    assert_eq!(status(&h, &later), InvoiceScheduleStatus::Scheduled);
    assert_eq!(h.db.stats().begun, 0);
}

#[test]
fn scheduled_date_flag_changes_which_schedule_is_due() {
    let h = Harness::new();
    let now = Utc::now();
    let mut schedule = schedule(h.tenant_id, now + Duration::days(3));
    schedule.scheduled_date = now;
    h.db.add_schedule(schedule.clone());
    seed_items(&h, h.tenant_id, &[(1, "student-1", 100)]);

    let response = h.service.invoice_schedule_checker(&h.ctx(), on(now)).unwrap();
    assert_eq!(response.tenants[0].schedule_id, None);

    h.flags
        .set_for_tenant(Flag::InvoiceScheduleByScheduledDate, h.tenant_id, true);
    let response = h.service.invoice_schedule_checker(&h.ctx(), on(now)).unwrap();
    assert_eq!(response.tenants[0].schedule_id, Some(schedule.id));
    assert_eq!(response.tenants[0].total_students, 1);
    assert_eq!(status(&h, &schedule), InvoiceScheduleStatus::Completed);
}

#[test]
fn per_student_failures_are_recorded_on_the_history() {
    let h = Harness::new();
    let now = Utc::now();
    let schedule = seed_schedule(&h, h.tenant_id, now);
    seed_items(&h, h.tenant_id, &[(1, "student-1", 100), (2, "student-2", 200)]);
    h.order_service.fail_item(2, "bill item is locked");

    let response = h.service.invoice_schedule_checker(&h.ctx(), on(now)).unwrap();
    assert!(response.successful);
    assert_eq!(response.tenants[0].total_students, 2);
    assert_eq!(response.tenants[0].failed_invoices, 1);

    let history = history(&h, &schedule).unwrap();
    assert_eq!(history.total_students, 2);
    assert_eq!(history.failed_invoices, 1);

    let failures = h
        .repos
        .schedule_students
        .find_by_history(h.db.executor(), h.tenant_id, history.id)
        .unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].student_id, StudentId::new("student-2"));
    assert_eq!(
        failures[0].error_details,
        "failed to update bill item status: bill item 2: bill item is locked"
    );
    assert_eq!(status(&h, &schedule), InvoiceScheduleStatus::Completed);
}

#[test]
fn review_checking_leaves_tagged_items_out_of_the_run() {
    let h = Harness::new();
    let now = Utc::now();
    seed_schedule(&h, h.tenant_id, now);
    seed_items(&h, h.tenant_id, &[(1, "student-1", 100)]);
    let mut tagged = bill_item(h.tenant_id, 2, "student-2", 200);
    tagged.is_reviewed = false;
    h.db.add_bill_item(tagged);
    h.flags.set(Flag::ReviewOrderChecking, true);

    let response = h.service.invoice_schedule_checker(&h.ctx(), on(now)).unwrap();
    assert_eq!(response.tenants[0].total_students, 1);
    assert_eq!(response.tenants[0].failed_invoices, 0);
    assert_eq!(h.invoices().len(), 1);
}

#[test]
fn unavailable_flags_fail_every_tenant() {
    let h = Harness::new();
    let now = Utc::now();
    seed_schedule(&h, h.tenant_id, now);
    h.flags.set_unavailable(Some("down"));

    let err = h.service.invoice_schedule_checker(&h.ctx(), on(now)).unwrap_err();
    assert_eq!(
        err,
        ServiceError::Internal(format!(
            "tenant {}: feature flag invoice.schedule_by_scheduled_date lookup failed: feature flag service unavailable: down",
            h.tenant_id
        ))
    );
}
