//! In-process order store for local development and tests.
//!
//! All tables sit behind one mutex, so each trait method is atomic.

use super::{
    OrderListFilter, OrderStore, StatusTransition, TransitionOutcome, WebhookEventRef,
};
use crate::models::{
    NewOrder, Order, OrderItem, OrderStatus, PaymentStatus, Product, Profile, TransitionDecision,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    products: HashMap<String, Product>,
    profiles: HashMap<String, Profile>,
    orders: HashMap<Uuid, Order>,
    events: HashSet<String>,
}

#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_product(&self, product: Product) {
        self.tables
            .lock()
            .await
            .products
            .insert(product.id.clone(), product);
    }

    pub async fn insert_profile(&self, profile: Profile) {
        self.tables
            .lock()
            .await
            .profiles
            .insert(profile.id.clone(), profile);
    }

    pub async fn product(&self, id: &str) -> Option<Product> {
        self.tables.lock().await.products.get(id).cloned()
    }

    pub async fn order_count(&self) -> usize {
        self.tables.lock().await.orders.len()
    }

    pub async fn order_item_count(&self) -> usize {
        self.tables
            .lock()
            .await
            .orders
            .values()
            .map(|o| o.items.len())
            .sum()
    }

    /// Shift an order's creation time, for exercising retention cutoffs.
    pub async fn backdate_order(&self, id: Uuid, created_at: DateTime<Utc>) -> bool {
        match self.tables.lock().await.orders.get_mut(&id) {
            Some(order) => {
                order.created_at = created_at;
                true
            }
            None => false,
        }
    }

    /// Deleting a product nulls the reference on existing order items.
    pub async fn delete_product(&self, id: &str) -> bool {
        let mut tables = self.tables.lock().await;
        if tables.products.remove(id).is_none() {
            return false;
        }
        for order in tables.orders.values_mut() {
            for item in order.items.iter_mut() {
                if item.product_id.as_deref() == Some(id) {
                    item.product_id = None;
                }
            }
        }
        true
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn create_order(&self, order: NewOrder) -> Result<Order, AppError> {
        let mut tables = self.tables.lock().await;

        // Check every reference before writing anything.
        if let Some(missing) = order
            .items
            .iter()
            .find(|item| !tables.products.contains_key(&item.product_id))
        {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "order_items.product_id references unknown product '{}'",
                missing.product_id
            )));
        }

        if tables
            .orders
            .values()
            .any(|o| o.order_number == order.order_number)
        {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "duplicate order number '{}'",
                order.order_number
            )));
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let items = order
            .items
            .into_iter()
            .map(|item| OrderItem {
                id: Uuid::new_v4(),
                order_id: id,
                product_id: Some(item.product_id),
                quantity: item.quantity,
                size: item.size,
                color: item.color,
                price: item.price,
                created_at: now,
            })
            .collect();

        let created = Order {
            id,
            user_id: order.user_id,
            order_number: order.order_number,
            status: OrderStatus::Pending,
            subtotal: order.subtotal,
            tax: order.tax,
            shipping: order.shipping,
            total: order.total,
            stripe_payment_intent_id: None,
            payment_status: PaymentStatus::Pending,
            shipping_address: order.shipping_address,
            created_at: now,
            updated_at: now,
            items,
        };

        tables.orders.insert(id, created.clone());
        Ok(created)
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, AppError> {
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }

    async fn list_orders(&self, filter: OrderListFilter) -> Result<(Vec<Order>, i64), AppError> {
        let tables = self.tables.lock().await;

        let mut matching: Vec<&Order> = tables
            .orders
            .values()
            .filter(|o| filter.user_id.as_ref().is_none_or(|uid| &o.user_id == uid))
            .filter(|o| filter.status.is_none_or(|s| o.status == s))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect();

        Ok((page, total))
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, AppError> {
        Ok(self.tables.lock().await.profiles.get(user_id).cloned())
    }

    async fn apply_transition(
        &self,
        transition: StatusTransition,
    ) -> Result<TransitionOutcome, AppError> {
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;

        if let Some(event) = &transition.event {
            if !tables.events.insert(event.event_id.clone()) {
                return Ok(TransitionOutcome::Duplicate);
            }
        }

        let Some(order) = tables.orders.get_mut(&transition.order_id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        let previous = order.status;

        match previous.decide(transition.to, transition.origin) {
            TransitionDecision::Noop => return Ok(TransitionOutcome::Unchanged(order.clone())),
            TransitionDecision::Reject => {
                return Ok(TransitionOutcome::Rejected { current: previous })
            }
            TransitionDecision::Apply => {}
        }

        let now = Utc::now();
        let mut restocked_units = 0i64;
        if transition.to == OrderStatus::Cancelled {
            for item in &order.items {
                let Some(product) = item
                    .product_id
                    .as_ref()
                    .and_then(|id| tables.products.get_mut(id))
                else {
                    continue;
                };
                product.stock += item.quantity;
                product.updated_at = now;
                restocked_units += i64::from(item.quantity);
            }
        }

        order.status = transition.to;
        if let Some(payment_status) = transition.payment_status {
            order.payment_status = payment_status;
        }
        if let Some(intent_id) = transition.payment_intent_id {
            order.stripe_payment_intent_id = Some(intent_id);
        }
        order.updated_at = now;

        Ok(TransitionOutcome::Applied {
            order: order.clone(),
            previous,
            restocked_units,
        })
    }

    async fn delete_stale_pending_orders(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut tables = self.tables.lock().await;
        let before = tables.orders.len();
        tables
            .orders
            .retain(|_, o| !(o.status == OrderStatus::Pending && o.created_at < cutoff));
        Ok((before - tables.orders.len()) as u64)
    }

    async fn record_webhook_event(&self, event: &WebhookEventRef) -> Result<bool, AppError> {
        Ok(self
            .tables
            .lock()
            .await
            .events
            .insert(event.event_id.clone()))
    }
}
