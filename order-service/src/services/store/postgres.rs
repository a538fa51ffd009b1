//! Postgres-backed order store.

use super::{
    OrderListFilter, OrderStore, StatusTransition, TransitionOutcome, WebhookEventRef,
};
use crate::models::{
    NewOrder, Order, OrderItem, OrderStatus, PaymentStatus, Profile, Role, TransitionDecision,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, user_id, order_number, status, subtotal, tax, shipping, total, \
     stripe_payment_intent_id, payment_status, shipping_address, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, order_id, product_id, quantity, size, color, price, created_at";

#[derive(Debug, FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: String,
    order_number: String,
    status: String,
    subtotal: Decimal,
    tax: Decimal,
    shipping: Decimal,
    total: Decimal,
    stripe_payment_intent_id: Option<String>,
    payment_status: String,
    shipping_address: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: Option<String>,
    quantity: i32,
    size: Option<String>,
    color: Option<String>,
    price: Decimal,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ProfileRow {
    id: String,
    email: Option<String>,
    full_name: Option<String>,
    role: String,
    created_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order, AppError> {
        let status = self
            .status
            .parse::<OrderStatus>()
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        let payment_status = self
            .payment_status
            .parse::<PaymentStatus>()
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        Ok(Order {
            id: self.id,
            user_id: self.user_id,
            order_number: self.order_number,
            status,
            subtotal: self.subtotal,
            tax: self.tax,
            shipping: self.shipping,
            total: self.total,
            stripe_payment_intent_id: self.stripe_payment_intent_id,
            payment_status,
            shipping_address: self.shipping_address,
            created_at: self.created_at,
            updated_at: self.updated_at,
            items,
        })
    }
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        OrderItem {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            quantity: row.quantity,
            size: row.size,
            color: row.color,
            price: row.price,
            created_at: row.created_at,
        }
    }
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Profile {
            id: row.id,
            email: row.email,
            full_name: row.full_name,
            role: Role::from_string(&row.role),
            created_at: row.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    #[instrument(skip(database_url), fields(service = "order-service"))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn load_items(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItem>>, AppError> {
        if order_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, OrderItemRow>(&format!(
            "SELECT {} FROM order_items WHERE order_id = ANY($1) ORDER BY created_at, id",
            ITEM_COLUMNS
        ))
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            grouped.entry(row.order_id).or_default().push(row.into());
        }
        Ok(grouped)
    }

    /// Returns `false` when the event id is already recorded.
    async fn insert_event(
        tx: &mut Transaction<'_, Postgres>,
        event: &WebhookEventRef,
        order_id: Option<Uuid>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_webhook_events (event_id, event_type, order_id, processed_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(order_id)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn items_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        order_id: Uuid,
    ) -> Result<Vec<OrderItem>, AppError> {
        let rows = sqlx::query_as::<_, OrderItemRow>(&format!(
            "SELECT {} FROM order_items WHERE order_id = $1 ORDER BY created_at, id",
            ITEM_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows.into_iter().map(OrderItem::from).collect())
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self, order), fields(order_number = %order.order_number, items = order.items.len()))]
    async fn create_order(&self, order: NewOrder) -> Result<Order, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            INSERT INTO orders (
                id, user_id, order_number, status, subtotal, tax, shipping, total,
                payment_status, shipping_address, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
            RETURNING {}
            "#,
            ORDER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&order.user_id)
        .bind(&order.order_number)
        .bind(OrderStatus::Pending.as_str())
        .bind(order.subtotal)
        .bind(order.tax)
        .bind(order.shipping)
        .bind(order.total)
        .bind(PaymentStatus::Pending.as_str())
        .bind(&order.shipping_address)
        .fetch_one(&mut *tx)
        .await?;

        let mut items = Vec::with_capacity(order.items.len());
        for item in &order.items {
            // A dangling product id fails the FK and drops the whole transaction.
            let item_row = sqlx::query_as::<_, OrderItemRow>(&format!(
                r#"
                INSERT INTO order_items (id, order_id, product_id, quantity, size, color, price, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                RETURNING {}
                "#,
                ITEM_COLUMNS
            ))
            .bind(Uuid::new_v4())
            .bind(row.id)
            .bind(&item.product_id)
            .bind(item.quantity)
            .bind(&item.size)
            .bind(&item.color)
            .bind(item.price)
            .fetch_one(&mut *tx)
            .await?;
            items.push(item_row.into());
        }

        tx.commit().await?;

        row.into_order(items)
    }

    #[instrument(skip(self))]
    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, AppError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items = self.load_items(&[id]).await?.remove(&id).unwrap_or_default();
        row.into_order(items).map(Some)
    }

    #[instrument(skip(self))]
    async fn list_orders(&self, filter: OrderListFilter) -> Result<(Vec<Order>, i64), AppError> {
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM orders
            WHERE ($1::text IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(&filter.user_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            SELECT {} FROM orders
            WHERE ($1::text IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC, id
            LIMIT $3 OFFSET $4
            "#,
            ORDER_COLUMNS
        ))
        .bind(&filter.user_id)
        .bind(status)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut items = self.load_items(&ids).await?;

        let orders = rows
            .into_iter()
            .map(|row| {
                let order_items = items.remove(&row.id).unwrap_or_default();
                row.into_order(order_items)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok((orders, total))
    }

    #[instrument(skip(self))]
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, AppError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, email, full_name, role, created_at FROM profiles WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Profile::from))
    }

    #[instrument(skip(self, transition), fields(order_id = %transition.order_id, to = %transition.to))]
    async fn apply_transition(
        &self,
        transition: StatusTransition,
    ) -> Result<TransitionOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        if let Some(event) = &transition.event {
            if !Self::insert_event(&mut tx, event, Some(transition.order_id)).await? {
                tx.rollback().await?;
                return Ok(TransitionOutcome::Duplicate);
            }
        }

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = $1 FOR UPDATE",
            ORDER_COLUMNS
        ))
        .bind(transition.order_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(TransitionOutcome::NotFound);
        };

        let items = Self::items_in_tx(&mut tx, row.id).await?;
        let current = row.into_order(items)?;
        let previous = current.status;

        match previous.decide(transition.to, transition.origin) {
            TransitionDecision::Noop => {
                tx.commit().await?;
                return Ok(TransitionOutcome::Unchanged(current));
            }
            TransitionDecision::Reject => {
                tx.commit().await?;
                return Ok(TransitionOutcome::Rejected { current: previous });
            }
            TransitionDecision::Apply => {}
        }

        let mut restocked_units = 0i64;
        if transition.to == OrderStatus::Cancelled {
            for item in &current.items {
                let Some(product_id) = &item.product_id else {
                    continue;
                };
                let result = sqlx::query(
                    "UPDATE products SET stock = stock + $1, updated_at = NOW() WHERE id = $2",
                )
                .bind(item.quantity)
                .bind(product_id)
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() == 1 {
                    restocked_units += i64::from(item.quantity);
                }
            }
        }

        let updated = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            UPDATE orders
            SET status = $2,
                payment_status = COALESCE($3, payment_status),
                stripe_payment_intent_id = COALESCE($4, stripe_payment_intent_id),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            ORDER_COLUMNS
        ))
        .bind(transition.order_id)
        .bind(transition.to.as_str())
        .bind(transition.payment_status.map(|s| s.as_str()))
        .bind(&transition.payment_intent_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(TransitionOutcome::Applied {
            order: updated.into_order(current.items)?,
            previous,
            restocked_units,
        })
    }

    #[instrument(skip(self))]
    async fn delete_stale_pending_orders(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM orders WHERE status = $1 AND created_at < $2")
            .bind(OrderStatus::Pending.as_str())
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(event_id = %event.event_id))]
    async fn record_webhook_event(&self, event: &WebhookEventRef) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;
        let inserted = Self::insert_event(&mut tx, event, None).await?;
        tx.commit().await?;
        Ok(inserted)
    }
}
