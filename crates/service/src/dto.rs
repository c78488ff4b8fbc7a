use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use invoicemgmt_core::{InvoiceId, InvoiceScheduleId, OrderId, PaymentId, StudentId, TenantId};
use invoicemgmt_infra::retry::ErrorClass;
use invoicemgmt_invoicing::{BulkIssuePaymentMethod, InvoiceType, PaymentDates, PaymentMethod};

// -------------------------
// Invoice generation
// -------------------------

/// One invoice to create from a student's bill items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateInvoiceDetail {
    pub student_id: StudentId,
    pub bill_item_sequence_numbers: Vec<i64>,
    pub invoice_type: InvoiceType,
    pub sub_total: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateInvoicesRequest {
    pub invoice_details: Vec<GenerateInvoiceDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedInvoice {
    pub invoice_id: InvoiceId,
    pub student_id: StudentId,
    pub sequence_number: i64,
    /// Transaction attempts it took, 1 when there was no conflict.
    pub attempts: u32,
}

/// Failure of one detail, tagged with the detail it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceGenerationError {
    pub invoice_detail: GenerateInvoiceDetail,
    pub class: ErrorClass,
    pub message: String,
    /// Transaction attempts made before giving up, 0 when the detail was
    /// rejected before any.
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateInvoicesResponse {
    /// `true` only when no detail failed.
    pub successful: bool,
    pub invoices: Vec<GeneratedInvoice>,
    pub errors: Vec<InvoiceGenerationError>,
}

// -------------------------
// Create invoice from order
// -------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvoiceFromOrderRequest {
    pub order_ids: Vec<OrderId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvoiceFromOrderResponse {
    pub successful: bool,
    pub invoice_ids: Vec<InvoiceId>,
}

// -------------------------
// Invoice schedule checker
// -------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceScheduleCheckerRequest {
    pub invoice_date: Option<DateTime<Utc>>,
}

/// What the checker did for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantScheduleRun {
    pub tenant_id: TenantId,
    /// `None` when the tenant had nothing scheduled for the date.
    pub schedule_id: Option<InvoiceScheduleId>,
    pub total_students: u32,
    pub failed_invoices: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceScheduleCheckerResponse {
    pub successful: bool,
    pub tenants: Vec<TenantScheduleRun>,
}

// -------------------------
// Issue / bulk issue
// -------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInvoiceRequest {
    pub invoice_id: Option<InvoiceId>,
    pub payment_method: PaymentMethod,
    pub dates: PaymentDates,
    pub remarks: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInvoiceResponse {
    pub successful: bool,
    /// Absent when the invoice total needs no payment.
    pub payment_id: Option<PaymentId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkIssueInvoiceRequest {
    pub invoice_ids: Vec<InvoiceId>,
    pub payment_method: BulkIssuePaymentMethod,
    pub convenience_store_dates: Option<PaymentDates>,
    pub direct_debit_dates: Option<PaymentDates>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkIssueInvoiceResponse {
    pub successful: bool,
    pub payment_ids: Vec<PaymentId>,
    pub attempts: u32,
}
