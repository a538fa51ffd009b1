//! Order lifecycle: checkout, payment reconciliation, admin status changes
//! and purging of abandoned checkouts.

use crate::config::MAX_PENDING_RETENTION_DAYS;
use crate::dtos::{
    CreateOrderRequest, ListOrdersQuery, Pagination, PaymentIntentRequest,
    PaymentIntentResponse, UpdateStatusRequest,
};
use crate::middleware::AuthUser;
use crate::models::{
    NewOrder, NewOrderItem, Order, OrderStatus, PaymentStatus, Profile, TransitionOrigin,
};
use crate::services::metrics;
use crate::services::store::{
    OrderListFilter, OrderStore, StatusTransition, TransitionOutcome, WebhookEventRef,
};
use crate::services::stripe::{self, PaymentEventKind, StripeClient, WebhookEvent};
use crate::utils::generate_order_number;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// What happened to an accepted webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    Duplicate,
    Ignored,
    Recorded,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Recorded => "recorded",
        }
    }
}

/// Whether an admin update must carry a payment intent id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdateMode {
    /// `PATCH`: status and payment intent id.
    WithPaymentIntent,
    /// `PUT`: status only.
    StatusOnly,
}

#[derive(Clone)]
pub struct OrderWorkflow {
    store: Arc<dyn OrderStore>,
    stripe: StripeClient,
    pending_retention: Duration,
}

fn parse_order_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound(anyhow::anyhow!("Order not found")))
}

fn parse_page_param(raw: Option<&str>, name: &str, default: i64) -> Result<i64, AppError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(v) => v
            .parse::<i64>()
            .map_err(|_| AppError::BadRequest(anyhow::anyhow!("{} must be an integer", name))),
    }
}

fn ensure_non_negative(value: Decimal, name: &str) -> Result<(), AppError> {
    if value < Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "{} must not be negative",
            name
        )));
    }
    Ok(())
}

impl OrderWorkflow {
    pub fn new(store: Arc<dyn OrderStore>, stripe: StripeClient, pending_retention_days: i64) -> Self {
        Self {
            store,
            stripe,
            pending_retention: Duration::days(
                pending_retention_days.clamp(0, MAX_PENDING_RETENTION_DAYS),
            ),
        }
    }

    /// Absent profile means customer.
    pub async fn is_admin(&self, actor: &AuthUser) -> Result<bool, AppError> {
        Ok(self
            .store
            .get_profile(&actor.user_id)
            .await?
            .map(|p| p.is_admin())
            .unwrap_or(false))
    }

    async fn require_admin(&self, actor: &AuthUser) -> Result<(), AppError> {
        if !self.is_admin(actor).await? {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "User {} is not an admin",
                actor.user_id
            )));
        }
        Ok(())
    }

    /// Place a `pending` order for `actor`. Prices and totals are taken as
    /// sent: they reflect what the shopper saw in their cart.
    #[instrument(skip(self, actor, request), fields(user_id = %actor.user_id))]
    pub async fn create_order(
        &self,
        actor: &AuthUser,
        request: CreateOrderRequest,
    ) -> Result<Order, AppError> {
        let shipping_address = request.shipping_address.filter(|v| !v.is_null());
        let (Some(shipping_address), Some(subtotal), Some(total)) =
            (shipping_address, request.subtotal, request.total)
        else {
            return Err(AppError::BadRequest(anyhow::anyhow!("Missing required fields")));
        };
        if request.items.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!("Missing required fields")));
        }

        let tax = request.tax.unwrap_or(Decimal::ZERO);
        let shipping = request.shipping.unwrap_or(Decimal::ZERO);
        ensure_non_negative(subtotal, "subtotal")?;
        ensure_non_negative(tax, "tax")?;
        ensure_non_negative(shipping, "shipping")?;
        ensure_non_negative(total, "total")?;

        let item_count = request.items.len();
        let new_order = NewOrder {
            user_id: actor.user_id.clone(),
            order_number: generate_order_number(Utc::now()),
            subtotal,
            tax,
            shipping,
            total,
            shipping_address,
            items: request
                .items
                .into_iter()
                .map(|item| NewOrderItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    size: item.size,
                    color: item.color,
                    price: item.price,
                })
                .collect(),
        };

        let order = self.store.create_order(new_order).await?;

        metrics::record_order_created(item_count);
        tracing::info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total,
            items = item_count,
            "Order created"
        );

        Ok(order)
    }

    /// Caller's own orders, or everyone's for admins.
    #[instrument(skip(self, actor, query), fields(user_id = %actor.user_id))]
    pub async fn list_orders(
        &self,
        actor: &AuthUser,
        query: ListOrdersQuery,
    ) -> Result<(Vec<Order>, Pagination), AppError> {
        let page = parse_page_param(query.page.as_deref(), "page", 1)?.max(1);
        let limit = parse_page_param(query.limit.as_deref(), "limit", DEFAULT_PAGE_SIZE)?
            .clamp(1, MAX_PAGE_SIZE);

        let status = query
            .status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "all")
            .map(|s| s.parse::<OrderStatus>())
            .transpose()
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?;

        let user_id = if self.is_admin(actor).await? {
            None
        } else {
            Some(actor.user_id.clone())
        };

        let (orders, total) = self
            .store
            .list_orders(OrderListFilter {
                user_id,
                status,
                limit,
                offset: (page - 1).saturating_mul(limit),
            })
            .await?;

        Ok((orders, Pagination::new(page, limit, total)))
    }

    /// Order plus its owner's profile. Visible to the owner and admins.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn get_order(
        &self,
        actor: &AuthUser,
        order_id: &str,
    ) -> Result<(Order, Option<Profile>), AppError> {
        let id = parse_order_id(order_id)?;
        let order = self
            .store
            .get_order(id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order not found")))?;

        if order.user_id != actor.user_id && !self.is_admin(actor).await? {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "User {} may not read order {}",
                actor.user_id,
                order.id
            )));
        }

        let profile = self.store.get_profile(&order.user_id).await?;
        Ok((order, profile))
    }

    /// Ask the gateway for a payment intent. The order is not touched; it
    /// stays `pending` until the gateway reports back.
    #[instrument(skip(self, actor, request), fields(user_id = %actor.user_id))]
    pub async fn create_payment_intent(
        &self,
        actor: &AuthUser,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntentResponse, AppError> {
        let (Some(amount), Some(order_id)) = (request.amount, request.order_id) else {
            return Err(AppError::BadRequest(anyhow::anyhow!("Missing required fields")));
        };
        if amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "amount must be greater than zero"
            )));
        }

        let id = parse_order_id(&order_id)?;
        let order = self
            .store
            .get_order(id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Order not found")))?;
        if order.user_id != actor.user_id {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "User {} does not own order {}",
                actor.user_id,
                order.id
            )));
        }

        if !self.stripe.is_configured() {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "Stripe is not configured for this environment"
            )));
        }

        let amount_minor =
            stripe::to_minor_units(amount).map_err(AppError::BadRequest)?;

        let intent = self
            .stripe
            .create_payment_intent(
                amount_minor,
                self.stripe.currency(),
                &actor.user_id,
                &order.id.to_string(),
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, order_id = %order.id, "Failed to create payment intent");
                AppError::InternalError(e.context("Failed to create payment intent"))
            })?;

        let client_secret = intent.client_secret.ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Payment intent {} has no client secret",
                intent.id
            ))
        })?;

        Ok(PaymentIntentResponse {
            client_secret,
            payment_intent_id: intent.id,
        })
    }

    /// Verify and apply a gateway event.
    ///
    /// Signature problems are the sender's fault (400). Anything accepted is
    /// acknowledged even if it changes nothing, so the gateway stops
    /// redelivering it; store failures surface as errors so it tries again.
    #[instrument(skip(self, payload, signature))]
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, AppError> {
        let signature = signature
            .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Missing signature")))?;

        if !self.stripe.webhook_configured() {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "Stripe webhook secret not configured"
            )));
        }

        match self.stripe.verify_webhook_signature(payload, signature) {
            Ok(true) => {}
            Ok(false) => {
                return Err(AppError::BadRequest(anyhow::anyhow!("Invalid signature")));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Unusable webhook signature header");
                return Err(AppError::BadRequest(anyhow::anyhow!("Invalid signature")));
            }
        }

        let event = self.stripe.parse_webhook_event(payload).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse webhook event");
            AppError::BadRequest(anyhow::anyhow!("Invalid event payload"))
        })?;

        let outcome = self.apply_webhook_event(&event).await?;
        metrics::record_webhook_event(&event.event_type, outcome.as_str());
        Ok(outcome)
    }

    async fn apply_webhook_event(&self, event: &WebhookEvent) -> Result<WebhookOutcome, AppError> {
        let event_ref = WebhookEventRef {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
        };
        let intent = &event.data.object;

        let (to, payment_status) = match event.kind() {
            PaymentEventKind::Created => {
                tracing::info!(event_id = %event.id, payment_intent_id = %intent.id, "Payment intent created");
                return Ok(if self.store.record_webhook_event(&event_ref).await? {
                    WebhookOutcome::Recorded
                } else {
                    WebhookOutcome::Duplicate
                });
            }
            PaymentEventKind::Other => {
                tracing::info!(event_id = %event.id, event_type = %event.event_type, "Unhandled event type");
                return Ok(WebhookOutcome::Ignored);
            }
            PaymentEventKind::Succeeded => (OrderStatus::Processing, PaymentStatus::Paid),
            PaymentEventKind::PaymentFailed => (OrderStatus::Cancelled, PaymentStatus::Failed),
            PaymentEventKind::Canceled => (OrderStatus::Cancelled, PaymentStatus::Cancelled),
        };

        let Some(order_id) = intent.order_id().and_then(|id| Uuid::parse_str(id).ok()) else {
            tracing::warn!(
                event_id = %event.id,
                payment_intent_id = %intent.id,
                "Event carries no usable orderId metadata"
            );
            self.store.record_webhook_event(&event_ref).await?;
            return Ok(WebhookOutcome::Ignored);
        };

        let outcome = self
            .store
            .apply_transition(StatusTransition {
                order_id,
                to,
                origin: TransitionOrigin::Payment,
                event: Some(event_ref),
                payment_status: Some(payment_status),
                payment_intent_id: Some(intent.id.clone()),
            })
            .await?;

        Ok(match outcome {
            TransitionOutcome::Applied {
                order,
                previous,
                restocked_units,
            } => {
                metrics::record_transition(previous, order.status, "webhook");
                metrics::record_restock(restocked_units);
                tracing::info!(
                    event_id = %event.id,
                    order_id = %order.id,
                    from = %previous,
                    to = %order.status,
                    restocked_units,
                    "Order updated from payment event"
                );
                WebhookOutcome::Applied
            }
            TransitionOutcome::Duplicate => {
                tracing::info!(event_id = %event.id, "Event already processed");
                WebhookOutcome::Duplicate
            }
            TransitionOutcome::Unchanged(order) => {
                tracing::info!(event_id = %event.id, order_id = %order.id, status = %order.status, "Order already in target status");
                WebhookOutcome::Ignored
            }
            TransitionOutcome::Rejected { current } => {
                tracing::warn!(
                    event_id = %event.id,
                    order_id = %order_id,
                    current = %current,
                    requested = %to,
                    "Payment event does not apply to order in its current status"
                );
                WebhookOutcome::Ignored
            }
            TransitionOutcome::NotFound => {
                tracing::warn!(event_id = %event.id, order_id = %order_id, "Order for payment event not found");
                WebhookOutcome::Ignored
            }
        })
    }

    /// Admin status change. Entering `cancelled` returns every item's
    /// quantity to stock in the same unit of work.
    #[instrument(skip(self, actor, request), fields(user_id = %actor.user_id))]
    pub async fn update_status(
        &self,
        actor: &AuthUser,
        order_id: &str,
        request: UpdateStatusRequest,
        mode: StatusUpdateMode,
    ) -> Result<Order, AppError> {
        self.require_admin(actor).await?;

        let payment_intent_id = request
            .payment_intent_id
            .filter(|v| !v.trim().is_empty());
        let Some(status) = request.status.filter(|s| !s.trim().is_empty()) else {
            return Err(AppError::BadRequest(anyhow::anyhow!("Missing required fields")));
        };
        if mode == StatusUpdateMode::WithPaymentIntent && payment_intent_id.is_none() {
            return Err(AppError::BadRequest(anyhow::anyhow!("Missing required fields")));
        }

        let to = status
            .parse::<OrderStatus>()
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?;
        let id = parse_order_id(order_id)?;

        let outcome = self
            .store
            .apply_transition(StatusTransition {
                order_id: id,
                to,
                origin: TransitionOrigin::Admin,
                event: None,
                payment_status: None,
                payment_intent_id,
            })
            .await?;

        match outcome {
            TransitionOutcome::Applied {
                order,
                previous,
                restocked_units,
            } => {
                metrics::record_transition(previous, order.status, "admin");
                metrics::record_restock(restocked_units);
                tracing::info!(
                    order_id = %order.id,
                    from = %previous,
                    to = %order.status,
                    restocked_units,
                    "Order status updated by admin"
                );
                Ok(order)
            }
            TransitionOutcome::Unchanged(order) => Ok(order),
            TransitionOutcome::Rejected { current } => Err(AppError::Conflict(anyhow::anyhow!(
                "Order is {} and cannot move to {}",
                current,
                to
            ))),
            TransitionOutcome::NotFound => {
                Err(AppError::NotFound(anyhow::anyhow!("Order not found")))
            }
            TransitionOutcome::Duplicate => Err(AppError::InternalError(anyhow::anyhow!(
                "Admin transition reported a duplicate event"
            ))),
        }
    }

    /// Purge `pending` orders older than the retention window. Nothing is
    /// restocked: a pending order never took stock.
    #[instrument(skip(self))]
    pub async fn cleanup_pending_orders(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let cutoff = now - self.pending_retention;
        let deleted = self.store.delete_stale_pending_orders(cutoff).await?;

        metrics::record_pending_purge(deleted);
        tracing::info!(deleted, cutoff = %cutoff, "Purged stale pending orders");

        Ok(deleted)
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.store.health_check().await
    }
}
