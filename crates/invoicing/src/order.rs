use serde::{Deserialize, Serialize};

use invoicemgmt_core::{DomainError, OrderId, StudentId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Submitted,
    Pending,
    Rejected,
    Voided,
    Invalid,
}

/// An order as seen by invoicing (owned by the order service).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub tenant_id: TenantId,
    pub student_id: StudentId,
    pub status: OrderStatus,
    pub is_reviewed: bool,
}

impl Order {
    /// Only submitted orders are invoiced; unreviewed ones are held back when
    /// review checking is on.
    pub fn ensure_invoiceable(&self, review_check: bool) -> Result<(), DomainError> {
        if self.status != OrderStatus::Submitted {
            return Err(DomainError::validation("order status should be SUBMITTED"));
        }
        if review_check && !self.is_reviewed {
            return Err(DomainError::validation(
                "order should not contain review required tag",
            ));
        }
        Ok(())
    }
}
