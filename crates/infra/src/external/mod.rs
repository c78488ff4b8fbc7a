//! External service contracts and in-memory stand-ins.

pub mod feature_flags;
pub mod order_service;

pub use feature_flags::{FeatureFlags, Flag, FlagError, StaticFeatureFlags};
pub use order_service::{
    BillItemStatusError, InMemoryOrderService, OrderService, OrderServiceError,
    UpdateBillItemStatusRequest, UpdateBillItemStatusResponse,
};
