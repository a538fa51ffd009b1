//! Postgres harness: one throwaway schema per test, selected through
//! `search_path`, with the service migrations applied.
//!
//! Set `TEST_DATABASE_URL` to run these; without it the tests return early.

use order_service::models::{NewOrder, NewOrderItem};
use order_service::services::PgOrderStore;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::atomic::{AtomicU32, Ordering};

static SCHEMA_COUNTER: AtomicU32 = AtomicU32::new(0);

pub fn get_test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL")
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn unique_schema_name() -> String {
    let counter = SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("test_orders_{}_{}", std::process::id(), counter)
}

pub struct PgTestDb {
    pub store: PgOrderStore,
    pub pool: PgPool,
    base_url: String,
    schema_name: String,
}

impl PgTestDb {
    /// `None` when no test database is configured.
    pub async fn spawn() -> Option<Self> {
        let Some(base_url) = get_test_database_url() else {
            eprintln!("TEST_DATABASE_URL not set, skipping Postgres store test");
            return None;
        };
        let schema_name = unique_schema_name();

        let setup = PgPoolOptions::new()
            .max_connections(1)
            .connect(&base_url)
            .await
            .expect("Failed to connect to test database");
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
            .execute(&setup)
            .await
            .ok();
        sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
            .execute(&setup)
            .await
            .expect("Failed to create test schema");
        setup.close().await;

        let separator = if base_url.contains('?') { "&" } else { "?" };
        let url = format!(
            "{}{}options=-c search_path%3D{}",
            base_url, separator, schema_name
        );

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .expect("Failed to connect to test schema");
        let store = PgOrderStore::from_pool(pool.clone());
        store
            .run_migrations()
            .await
            .expect("Failed to run migrations");

        Some(Self {
            store,
            pool,
            base_url,
            schema_name,
        })
    }

    pub async fn insert_product(&self, id: &str, stock: i32) {
        sqlx::query("INSERT INTO products (id, slug, name, price, stock) VALUES ($1, $2, $3, $4, $5)")
            .bind(id)
            .bind(format!("{}-slug", id))
            .bind(format!("Product {}", id))
            .bind(Decimal::from(50))
            .bind(stock)
            .execute(&self.pool)
            .await
            .expect("Failed to insert product");
    }

    pub async fn insert_profile(&self, id: &str, role: &str) {
        sqlx::query("INSERT INTO profiles (id, email, full_name, role) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(format!("{}@example.com", id))
            .bind(format!("Name of {}", id))
            .bind(role)
            .execute(&self.pool)
            .await
            .expect("Failed to insert profile");
    }

    pub async fn stock_of(&self, product_id: &str) -> i32 {
        sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_one(&self.pool)
            .await
            .expect("Product missing")
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .expect("Failed to count rows")
    }

    /// Drop the schema. Call at the end of each test.
    pub async fn cleanup(self) {
        self.pool.close().await;

        if let Ok(pool) = PgPoolOptions::new()
            .max_connections(1)
            .connect(&self.base_url)
            .await
        {
            let _ = sqlx::query(&format!(
                "DROP SCHEMA IF EXISTS {} CASCADE",
                self.schema_name
            ))
            .execute(&pool)
            .await;
            pool.close().await;
        }
    }
}

pub fn new_order(user_id: &str, order_number: &str, items: &[(&str, i32)]) -> NewOrder {
    NewOrder {
        user_id: user_id.to_string(),
        order_number: order_number.to_string(),
        subtotal: Decimal::from(100),
        tax: Decimal::ZERO,
        shipping: Decimal::ZERO,
        total: Decimal::from(100),
        shipping_address: json!({"line1": "1 Main St", "city": "Springfield"}),
        items: items
            .iter()
            .map(|(product_id, quantity)| NewOrderItem {
                product_id: product_id.to_string(),
                quantity: *quantity,
                size: None,
                color: None,
                price: Decimal::from(50),
            })
            .collect(),
    }
}
