//! Persistence for orders and the rows they touch.
//!
//! Every method that writes more than one row runs as a single unit: either
//! all of its writes land or none do.

mod memory;
mod postgres;

pub use memory::InMemoryOrderStore;
pub use postgres::PgOrderStore;

use crate::models::{NewOrder, Order, OrderStatus, PaymentStatus, Profile, TransitionOrigin};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use uuid::Uuid;

/// Gateway event that caused a transition, recorded so redelivery is a no-op.
#[derive(Debug, Clone)]
pub struct WebhookEventRef {
    pub event_id: String,
    pub event_type: String,
}

#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub order_id: Uuid,
    pub to: OrderStatus,
    pub origin: TransitionOrigin,
    pub event: Option<WebhookEventRef>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_intent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// Status written; `restocked_units` is the stock returned to products.
    Applied {
        order: Order,
        previous: OrderStatus,
        restocked_units: i64,
    },
    /// Already in the requested status. Nothing written.
    Unchanged(Order),
    /// Not allowed from `current`. Nothing written.
    Rejected { current: OrderStatus },
    /// The event id was processed before. Nothing written.
    Duplicate,
    NotFound,
}

#[derive(Debug, Clone, Default)]
pub struct OrderListFilter {
    /// `None` lists every user's orders.
    pub user_id: Option<String>,
    pub status: Option<OrderStatus>,
    pub limit: i64,
    pub offset: i64,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    /// Insert the order and all of its items.
    async fn create_order(&self, order: NewOrder) -> Result<Order, AppError>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, AppError>;

    /// Newest first, with the total number of matching orders.
    async fn list_orders(&self, filter: OrderListFilter) -> Result<(Vec<Order>, i64), AppError>;

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, AppError>;

    /// Move an order to a new status, returning stock when it enters
    /// `cancelled`.
    ///
    /// When `transition.event` is set its id is recorded in the same unit of
    /// work, even if the order is missing or the move is rejected, so a
    /// redelivered event always comes back as `Duplicate`.
    async fn apply_transition(
        &self,
        transition: StatusTransition,
    ) -> Result<TransitionOutcome, AppError>;

    /// Delete `pending` orders created before `cutoff`. Items go with them.
    async fn delete_stale_pending_orders(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;

    /// Record an event that does not touch any order. `false` if seen before.
    async fn record_webhook_event(&self, event: &WebhookEventRef) -> Result<bool, AppError>;
}
