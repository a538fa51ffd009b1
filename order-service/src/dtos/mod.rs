//! Wire types for the HTTP surface. Field names are camelCase.

mod orders;
mod payments;

pub use orders::{
    CreateOrderRequest, CreateOrderResponse, ListOrdersQuery, OrderDetailResponse,
    OrderItemInput, OrderItemResponse, OrderResponse, OrdersPage, Pagination, ProfileResponse,
    UpdateOrderResponse, UpdateStatusRequest,
};
pub use payments::{CleanupQuery, CleanupResponse, PaymentIntentRequest, PaymentIntentResponse, WebhookAck};
