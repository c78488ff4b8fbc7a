use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use invoicemgmt_core::{RequestContext, TenantId};
use invoicemgmt_invoicing::BillingStatus;

use crate::retry::{Classify, ErrorClass};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBillItemStatusRequest {
    pub tenant_id: TenantId,
    pub bill_item_sequence_numbers: Vec<i64>,
    pub status: BillingStatus,
}

/// Per-item failure reported by the order service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillItemStatusError {
    pub bill_item_sequence_number: i64,
    pub error: String,
}

/// A successful call may still carry per-item errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBillItemStatusResponse {
    pub errors: Vec<BillItemStatusError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderServiceError {
    #[error("order service unavailable: {0}")]
    Unavailable(String),

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl Classify for OrderServiceError {
    fn class(&self) -> ErrorClass {
        ErrorClass::Permanent
    }
}

/// Client for the order/payment service that owns bill items.
pub trait OrderService: Send + Sync {
    fn update_bill_item_status(
        &self,
        ctx: &RequestContext,
        request: UpdateBillItemStatusRequest,
    ) -> Result<UpdateBillItemStatusResponse, OrderServiceError>;
}

/// Records every request; failures are configured per bill item.
#[derive(Debug, Default)]
pub struct InMemoryOrderService {
    requests: Mutex<Vec<UpdateBillItemStatusRequest>>,
    item_errors: Mutex<HashMap<i64, String>>,
    unavailable: Mutex<Option<String>>,
}

impl InMemoryOrderService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `error` for this bill item on every call that includes it.
    pub fn fail_item(&self, bill_item_sequence_number: i64, error: impl Into<String>) {
        self.item_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(bill_item_sequence_number, error.into());
    }

    pub fn set_unavailable(&self, reason: Option<&str>) {
        *self.unavailable.lock().unwrap_or_else(PoisonError::into_inner) =
            reason.map(str::to_string);
    }

    pub fn requests(&self) -> Vec<UpdateBillItemStatusRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl OrderService for InMemoryOrderService {
    fn update_bill_item_status(
        &self,
        ctx: &RequestContext,
        request: UpdateBillItemStatusRequest,
    ) -> Result<UpdateBillItemStatusResponse, OrderServiceError> {
        if ctx.is_expired() {
            return Err(OrderServiceError::DeadlineExceeded);
        }
        if let Some(reason) = self
            .unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(OrderServiceError::Unavailable(reason));
        }

        let errors = {
            let item_errors = self.item_errors.lock().unwrap_or_else(PoisonError::into_inner);
            request
                .bill_item_sequence_numbers
                .iter()
                .filter_map(|seq| {
                    item_errors.get(seq).map(|error| BillItemStatusError {
                        bill_item_sequence_number: *seq,
                        error: error.clone(),
                    })
                })
                .collect()
        };

        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        Ok(UpdateBillItemStatusResponse { errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn request(tenant_id: TenantId, seqs: Vec<i64>) -> UpdateBillItemStatusRequest {
        UpdateBillItemStatusRequest {
            tenant_id,
            bill_item_sequence_numbers: seqs,
            status: BillingStatus::Invoiced,
        }
    }

    #[test]
    fn per_item_errors_are_returned_in_response() {
        let service = InMemoryOrderService::new();
        service.fail_item(2, "bill item locked");
        let tenant_id = TenantId::new();

        let response = service
            .update_bill_item_status(
                &RequestContext::for_tenant(tenant_id),
                request(tenant_id, vec![1, 2, 3]),
            )
            .unwrap();

        assert_eq!(
            response.errors,
            vec![BillItemStatusError {
                bill_item_sequence_number: 2,
                error: "bill item locked".into()
            }]
        );
        assert_eq!(service.requests().len(), 1);
    }

    #[test]
    fn expired_context_is_rejected_without_recording() {
        let service = InMemoryOrderService::new();
        let tenant_id = TenantId::new();
        let ctx = RequestContext::for_tenant(tenant_id).with_deadline(Instant::now());

        assert_eq!(
            service.update_bill_item_status(&ctx, request(tenant_id, vec![1])),
            Err(OrderServiceError::DeadlineExceeded)
        );
        assert!(service.requests().is_empty());
    }
}
