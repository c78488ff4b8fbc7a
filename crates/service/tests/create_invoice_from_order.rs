mod common;

use chrono::{Duration, Utc};

use invoicemgmt_core::{OrderId, StudentId};
use invoicemgmt_infra::db::Database;
use invoicemgmt_infra::external::Flag;
use invoicemgmt_invoicing::{BillingStatus, BillingType, InvoiceType, OrderStatus};
use invoicemgmt_service::ServiceError;
use invoicemgmt_service::dto::CreateInvoiceFromOrderRequest;

use common::{Harness, schedule};

fn request(order_ids: &[&str]) -> CreateInvoiceFromOrderRequest {
    CreateInvoiceFromOrderRequest {
        order_ids: order_ids.iter().map(|id| OrderId::new(*id)).collect(),
    }
}

fn invalid(msg: &str) -> ServiceError {
    ServiceError::InvalidArgument(msg.to_string())
}

#[test]
fn request_shape_is_validated_first() {
    let h = Harness::new();
    let ctx = h.ctx();

    assert_eq!(
        h.service.create_invoice_from_order(&ctx, request(&[])).unwrap_err(),
        invalid("the order details should not be empty")
    );
    assert_eq!(
        h.service
            .create_invoice_from_order(&ctx, request(&["order-1", "  "]))
            .unwrap_err(),
        invalid("the order ID cannot be empty")
    );
    assert_eq!(
        h.service
            .create_invoice_from_order(&ctx, request(&["order-1", "order-2", "order-1"]))
            .unwrap_err(),
        invalid("duplicate order ID order-1")
    );
    assert_eq!(h.db.stats().begun, 0);
}

#[test]
fn unknown_order_is_not_found() {
    let h = Harness::new();
    let err = h
        .service
        .create_invoice_from_order(&h.ctx(), request(&["order-404"]))
        .unwrap_err();
    assert_eq!(err.code(), "NotFound");
    assert_eq!(err.message(), "record not found: order order-404");
}

#[test]
fn only_submitted_orders_are_invoiced() {
    let h = Harness::new();
    h.add_order("order-1", "student-1", OrderStatus::Pending, true);

    let err = h
        .service
        .create_invoice_from_order(&h.ctx(), request(&["order-1"]))
        .unwrap_err();
    assert_eq!(err, invalid("order status should be SUBMITTED"));
}

#[test]
fn review_tag_blocks_only_with_review_checking() {
    let h = Harness::new();
    h.add_order("order-1", "student-1", OrderStatus::Submitted, false);
    h.add_order_item(1, "order-1", "student-1", 1_200, Utc::now() - Duration::days(1));

    h.flags.set(Flag::ReviewOrderChecking, true);
    let err = h
        .service
        .create_invoice_from_order(&h.ctx(), request(&["order-1"]))
        .unwrap_err();
    assert_eq!(err, invalid("order should not contain review required tag"));

    h.flags.set(Flag::ReviewOrderChecking, false);
    let response = h
        .service
        .create_invoice_from_order(&h.ctx(), request(&["order-1"]))
        .unwrap();
    assert!(response.successful);
    assert_eq!(response.invoice_ids.len(), 1);
}

#[test]
fn orders_of_the_same_student_share_one_invoice() {
    let h = Harness::new();
    let billed = Utc::now() - Duration::days(1);
    h.add_order("order-a", "student-1", OrderStatus::Submitted, true);
    h.add_order("order-b", "student-1", OrderStatus::Submitted, true);
    h.add_order("order-c", "student-2", OrderStatus::Submitted, true);
    h.add_order_item(1, "order-a", "student-1", 1_000, billed);
    h.add_order_item(2, "order-a", "student-1", 250, billed);
    h.add_order_item(3, "order-b", "student-1", 500, billed);
    h.add_order_item(4, "order-c", "student-2", 800, billed);

    let response = h
        .service
        .create_invoice_from_order(&h.ctx(), request(&["order-a", "order-b", "order-c"]))
        .unwrap();
    assert_eq!(response.invoice_ids.len(), 2);

    let mut invoices = h.invoices();
    invoices.sort_by_key(|i| i.sequence_number);
    assert_eq!(invoices[0].student_id, StudentId::new("student-1"));
    assert_eq!(invoices[0].total, 1_750);
    assert_eq!(invoices[1].student_id, StudentId::new("student-2"));
    assert_eq!(invoices[1].total, 800);
    assert!(invoices.iter().all(|i| i.invoice_type == InvoiceType::Manual));

    let links = h
        .repos
        .invoice_bill_items
        .find_by_invoice(h.db.executor(), h.tenant_id, invoices[0].id)
        .unwrap();
    assert_eq!(links.len(), 3);

    // One status update for every item across all orders.
    let requests = h.order_service.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].bill_item_sequence_numbers, vec![1, 2, 3, 4]);
    assert_eq!(requests[0].status, BillingStatus::Invoiced);
}

#[test]
fn invoiced_order_cannot_be_invoiced_again() {
    let h = Harness::new();
    h.add_order("order-1", "student-1", OrderStatus::Submitted, true);
    h.add_order_item(1, "order-1", "student-1", 1_000, Utc::now() - Duration::days(1));

    h.service
        .create_invoice_from_order(&h.ctx(), request(&["order-1"]))
        .unwrap();
    assert_eq!(h.bill_item_status(h.tenant_id, 1), BillingStatus::Invoiced);

    let err = h
        .service
        .create_invoice_from_order(&h.ctx(), request(&["order-1"]))
        .unwrap_err();
    assert_eq!(
        err,
        invalid("the bill item 1 of order with ID order-1 has invalid status BILLING_STATUS_INVOICED")
    );
    assert_eq!(h.invoices().len(), 1);
}

#[test]
fn items_billed_after_the_next_schedule_are_left_for_it() {
    let h = Harness::new();
    let now = Utc::now();
    h.db.add_schedule(schedule(h.tenant_id, now - Duration::days(2)));
    h.add_order("order-1", "student-1", OrderStatus::Submitted, true);
    h.add_order_item(1, "order-1", "student-1", 900, now - Duration::days(3));
    h.add_order_item(2, "order-1", "student-1", 400, now - Duration::days(1));

    let response = h
        .service
        .create_invoice_from_order(&h.ctx(), request(&["order-1"]))
        .unwrap();
    assert_eq!(response.invoice_ids.len(), 1);

    let invoices = h.invoices();
    assert_eq!(invoices[0].total, 900);
    assert_eq!(
        h.order_service.requests()[0].bill_item_sequence_numbers,
        vec![1]
    );
}

#[test]
fn order_without_items_is_an_internal_error() {
    let h = Harness::new();
    h.add_order("order-1", "student-1", OrderStatus::Submitted, true);

    let err = h
        .service
        .create_invoice_from_order(&h.ctx(), request(&["order-1"]))
        .unwrap_err();
    assert_eq!(
        err,
        ServiceError::Internal("order with ID order-1 has no associated billing item".into())
    );
    assert_eq!(h.db.stats().rolled_back, 1);
}

#[test]
fn item_not_billed_rejects_the_whole_request() {
    let h = Harness::new();
    let billed = Utc::now() - Duration::days(1);
    h.add_order("order-1", "student-1", OrderStatus::Submitted, true);
    h.add_order("order-2", "student-2", OrderStatus::Submitted, true);
    h.add_order_item(1, "order-1", "student-1", 100, billed);
    let mut pending = h.add_order_item(2, "order-2", "student-2", 100, billed);
    pending.billing_status = BillingStatus::Pending;
    h.db.add_bill_item(pending);

    let err = h
        .service
        .create_invoice_from_order(&h.ctx(), request(&["order-1", "order-2"]))
        .unwrap_err();
    assert_eq!(
        err,
        invalid("the bill item 2 of order with ID order-2 has invalid status BILLING_STATUS_PENDING")
    );
    assert!(h.invoices().is_empty());
    assert!(h.order_service.requests().is_empty());
}

#[test]
fn adjustment_item_without_price_is_an_internal_error() {
    let h = Harness::new();
    h.add_order("order-1", "student-1", OrderStatus::Submitted, true);
    let mut item = h.add_order_item(1, "order-1", "student-1", 100, Utc::now() - Duration::days(1));
    item.billing_type = BillingType::Adjustment;
    h.db.add_bill_item(item);

    let err = h
        .service
        .create_invoice_from_order(&h.ctx(), request(&["order-1"]))
        .unwrap_err();
    assert_eq!(err.code(), "Internal");
    assert_eq!(
        err.message(),
        "The bill item 1 with type BILLING_TYPE_ADJUSTMENT_BILLING has no present adjustment price"
    );
}

#[test]
fn adjustment_items_contribute_their_adjustment_price() {
    let h = Harness::new();
    let billed = Utc::now() - Duration::days(1);
    h.add_order("order-1", "student-1", OrderStatus::Submitted, true);
    h.add_order_item(1, "order-1", "student-1", 1_000, billed);
    let mut refund = h.add_order_item(2, "order-1", "student-1", 0, billed);
    refund.billing_type = BillingType::Adjustment;
    refund.adjustment_price = Some(-300);
    h.db.add_bill_item(refund);

    h.service
        .create_invoice_from_order(&h.ctx(), request(&["order-1"]))
        .unwrap();

    let invoices = h.invoices();
    assert_eq!(invoices[0].sub_total, 700);
    assert_eq!(invoices[0].total, 700);
}
