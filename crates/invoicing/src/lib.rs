//! Invoice-management domain rules.
//!
//! Records and the checks the workflows apply to them, implemented as
//! deterministic domain logic (no IO, no storage, no threads).

pub mod bill_item;
pub mod invoice;
pub mod order;
pub mod payment;
pub mod schedule;

pub use bill_item::{BillItem, BillingStatus, BillingType};
pub use invoice::{
    Invoice, InvoiceAction, InvoiceActionLog, InvoiceBillItem, InvoiceStatus, InvoiceType,
};
pub use order::{Order, OrderStatus};
pub use payment::{
    BankAccount, BulkIssuePaymentMethod, Payment, PaymentDates, PaymentMethod, PaymentStatus,
    StudentPaymentDetail, ValidPaymentDates,
};
pub use schedule::{
    InvoiceSchedule, InvoiceScheduleHistory, InvoiceScheduleStatus, InvoiceScheduleStudent,
};
