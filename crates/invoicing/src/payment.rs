//! Payments, student payment details and payment-date rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use invoicemgmt_core::{DomainError, InvoiceId, PaymentId, StudentId, TenantId};

use crate::invoice::Invoice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    ConvenienceStore,
    DirectDebit,
    Cash,
    BankTransfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Successful,
    Failed,
    Refunded,
}

/// Payment record created when an invoice is issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub tenant_id: TenantId,
    pub invoice_id: InvoiceId,
    pub student_id: StudentId,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub due_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub amount: i64,
    /// Unique per tenant.
    pub sequence_number: i64,
    pub is_exported: bool,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// A pending payment for the full invoice total.
    pub fn pending(
        invoice: &Invoice,
        method: PaymentMethod,
        dates: ValidPaymentDates,
        sequence_number: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            tenant_id: invoice.tenant_id,
            invoice_id: invoice.id,
            student_id: invoice.student_id.clone(),
            method,
            status: PaymentStatus::Pending,
            due_date: dates.due_date,
            expiry_date: dates.expiry_date,
            amount: invoice.total,
            sequence_number,
            is_exported: false,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub is_verified: bool,
}

/// Per-student payment preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentPaymentDetail {
    pub tenant_id: TenantId,
    pub student_id: StudentId,
    pub payment_method: Option<PaymentMethod>,
    pub bank_account: Option<BankAccount>,
}

impl StudentPaymentDetail {
    /// Direct debit needs a registered and verified bank account.
    pub fn ensure_direct_debit_ready(&self) -> Result<(), DomainError> {
        match self.bank_account {
            None => Err(DomainError::validation(
                "student has no bank account registered",
            )),
            Some(account) if !account.is_verified => Err(DomainError::validation(
                "student bank account is not verified",
            )),
            Some(_) => Ok(()),
        }
    }
}

/// Payment dates as supplied by a caller; both are required.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDates {
    pub due_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
}

/// Payment dates that passed [`PaymentDates::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidPaymentDates {
    pub due_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
}

impl PaymentDates {
    pub fn new(due_date: DateTime<Utc>, expiry_date: DateTime<Utc>) -> Self {
        Self {
            due_date: Some(due_date),
            expiry_date: Some(expiry_date),
        }
    }

    /// "Today or after" compares calendar days; the ordering check compares
    /// instants.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<ValidPaymentDates, DomainError> {
        let due_date = self
            .due_date
            .ok_or_else(|| DomainError::validation("invalid DueDate value"))?;
        let expiry_date = self
            .expiry_date
            .ok_or_else(|| DomainError::validation("invalid ExpiryDate value"))?;

        let today = now.date_naive();
        if due_date.date_naive() < today {
            return Err(DomainError::validation(
                "invalid date: DueDate must be today or after",
            ));
        }
        if expiry_date.date_naive() < today {
            return Err(DomainError::validation(
                "invalid date: ExpiryDate must be today or after",
            ));
        }
        if due_date > expiry_date {
            return Err(DomainError::validation(
                "invalid date: DueDate must be before ExpiryDate",
            ));
        }

        Ok(ValidPaymentDates {
            due_date,
            expiry_date,
        })
    }
}

/// How a bulk issuance picks each invoice's payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkIssuePaymentMethod {
    /// Use each student's default method from their payment detail.
    Default,
    ConvenienceStore,
    DirectDebit,
}

impl BulkIssuePaymentMethod {
    pub fn needs_convenience_store_dates(self) -> bool {
        matches!(self, Self::Default | Self::ConvenienceStore)
    }

    pub fn needs_direct_debit_dates(self) -> bool {
        matches!(self, Self::Default | Self::DirectDebit)
    }

    /// The fixed method, if any.
    pub fn fixed(self) -> Option<PaymentMethod> {
        match self {
            Self::Default => None,
            Self::ConvenienceStore => Some(PaymentMethod::ConvenienceStore),
            Self::DirectDebit => Some(PaymentMethod::DirectDebit),
        }
    }
}
