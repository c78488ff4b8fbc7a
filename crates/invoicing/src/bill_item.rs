use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use invoicemgmt_core::{DomainError, OrderId, StudentId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingStatus {
    Pending,
    Billed,
    Invoiced,
    Cancelled,
    Waiting,
}

impl core::fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            BillingStatus::Pending => "BILLING_STATUS_PENDING",
            BillingStatus::Billed => "BILLING_STATUS_BILLED",
            BillingStatus::Invoiced => "BILLING_STATUS_INVOICED",
            BillingStatus::Cancelled => "BILLING_STATUS_CANCELLED",
            BillingStatus::Waiting => "BILLING_STATUS_WAITING_APPROVAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingType {
    Normal,
    Adjustment,
}

/// A billing item produced by the order service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillItem {
    pub tenant_id: TenantId,
    /// Unique per tenant.
    pub sequence_number: i64,
    pub order_id: OrderId,
    pub student_id: StudentId,
    pub billing_status: BillingStatus,
    pub billing_type: BillingType,
    pub final_price: i64,
    pub adjustment_price: Option<i64>,
    pub bill_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// `false` means the item carries the review-required tag.
    pub is_reviewed: bool,
}

impl BillItem {
    /// Amount this item contributes to an invoice.
    ///
    /// Adjustment items contribute their adjustment price; callers validate
    /// with [`BillItem::validate_price`] first.
    pub fn billable_amount(&self) -> i64 {
        match self.billing_type {
            BillingType::Adjustment => self.adjustment_price.unwrap_or_default(),
            BillingType::Normal => self.final_price,
        }
    }

    /// Adjustment price and billing type must agree.
    pub fn validate_price(&self) -> Result<(), DomainError> {
        match (self.billing_type, self.adjustment_price) {
            (BillingType::Adjustment, None) => Err(DomainError::invariant(format!(
                "The bill item {} with type BILLING_TYPE_ADJUSTMENT_BILLING has no present adjustment price",
                self.sequence_number
            ))),
            (BillingType::Normal, Some(_)) => Err(DomainError::invariant(format!(
                "The bill item {} has present adjustment price but has no BILLING_TYPE_ADJUSTMENT_BILLING type",
                self.sequence_number
            ))),
            _ => Ok(()),
        }
    }

    pub fn ensure_billed(&self) -> Result<(), DomainError> {
        if self.billing_status != BillingStatus::Billed {
            return Err(DomainError::validation(format!(
                "bill item {} has invalid billing status {}",
                self.sequence_number, self.billing_status
            )));
        }
        Ok(())
    }

    /// With review checking enabled, items tagged for review are rejected.
    pub fn ensure_reviewed(&self, review_check: bool) -> Result<(), DomainError> {
        if review_check && !self.is_reviewed {
            return Err(DomainError::validation(format!(
                "bill item {} should not contain review required tag",
                self.sequence_number
            )));
        }
        Ok(())
    }

    /// Full check applied before an item is put on an invoice.
    pub fn ensure_invoiceable(&self, review_check: bool) -> Result<(), DomainError> {
        self.ensure_billed()?;
        self.ensure_reviewed(review_check)?;
        self.validate_price()
    }
}
