use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use invoicemgmt_core::{DomainError, InvoiceId, StudentId, TenantId, UserId};

use crate::bill_item::BillingStatus;

/// Invoice status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    Void,
    Paid,
    Refunded,
    Failed,
}

impl InvoiceStatus {
    /// Only draft and failed invoices may be issued.
    pub fn is_issuable(self) -> bool {
        matches!(self, InvoiceStatus::Draft | InvoiceStatus::Failed)
    }
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Issued => "ISSUED",
            InvoiceStatus::Void => "VOID",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Refunded => "REFUNDED",
            InvoiceStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Scheduled invoices come from an invoice schedule run; manual ones from a
/// direct request (generation request or order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceType {
    Scheduled,
    Manual,
}

/// Invoice record.
///
/// Amounts are integer minor units and may be negative (adjustments).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub tenant_id: TenantId,
    pub student_id: StudentId,
    pub status: InvoiceStatus,
    pub invoice_type: InvoiceType,
    pub sub_total: i64,
    pub total: i64,
    pub outstanding_balance: i64,
    pub amount_paid: i64,
    /// Unique per tenant; assigned optimistically, so concurrent writers may
    /// collide on it.
    pub sequence_number: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// A new draft invoice with nothing paid yet.
    pub fn draft(
        tenant_id: TenantId,
        student_id: StudentId,
        invoice_type: InvoiceType,
        sub_total: i64,
        total: i64,
        sequence_number: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: InvoiceId::new(),
            tenant_id,
            student_id,
            status: InvoiceStatus::Draft,
            invoice_type,
            sub_total,
            total,
            outstanding_balance: total,
            amount_paid: 0,
            sequence_number,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn ensure_issuable(&self) -> Result<(), DomainError> {
        if !self.status.is_issuable() {
            return Err(DomainError::validation("invalid invoice status"));
        }
        Ok(())
    }

    /// Bulk issuance only accepts invoices that will produce a payment.
    pub fn ensure_positive_total(&self) -> Result<(), DomainError> {
        match self.total {
            t if t < 0 => Err(DomainError::validation(
                "error Should have positive total, negative total found",
            )),
            0 => Err(DomainError::validation(
                "error Should have positive total, zero total amount found",
            )),
            _ => Ok(()),
        }
    }

    pub fn issue(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_issuable()?;
        self.status = InvoiceStatus::Issued;
        self.updated_at = now;
        Ok(())
    }

    pub fn requires_payment(&self) -> bool {
        self.total > 0
    }
}

/// Link between an invoice and one of the bill items it consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceBillItem {
    pub invoice_id: InvoiceId,
    pub tenant_id: TenantId,
    pub bill_item_sequence_number: i64,
    /// Billing status of the item before it was invoiced.
    pub past_billing_status: BillingStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceAction {
    Issued,
}

/// Audit record written alongside invoice state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceActionLog {
    pub invoice_id: InvoiceId,
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
    pub action: InvoiceAction,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
