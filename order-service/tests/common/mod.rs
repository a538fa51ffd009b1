#![allow(dead_code)]

pub mod pg;

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use order_service::config::{
    AuthConfig, CronConfig, DatabaseConfig, Environment, OrderServiceConfig, RateLimitConfig,
    StripeConfig,
};
use order_service::middleware::AuthClaims;
use order_service::models::{Product, ProductStatus, Profile, Role};
use order_service::services::InMemoryOrderStore;
use order_service::startup::Application;
use rust_decimal::Decimal;
use secrecy::Secret;
use serde_json::{json, Value};
use service_core::config::Config as CoreConfig;
use service_core::utils::signature::sign_webhook_payload;
use std::sync::Arc;
use wiremock::MockServer;

pub const JWT_SECRET: &str = "test-jwt-secret-that-is-long-enough";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const CRON_SECRET: &str = "test-cron-secret";

pub const CUSTOMER_ID: &str = "user-customer";
pub const OTHER_CUSTOMER_ID: &str = "user-other";
pub const ADMIN_ID: &str = "user-admin";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: InMemoryOrderStore,
    pub stripe: MockServer,
    pub client: reqwest::Client,
}

pub fn test_config(stripe_base_url: &str) -> OrderServiceConfig {
    OrderServiceConfig {
        common: CoreConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        environment: Environment::Dev,
        service_name: "order-service".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: Secret::new("postgres://unused".to_string()),
            max_connections: 1,
            min_connections: 1,
        },
        auth: AuthConfig {
            jwt_secret: Secret::new(JWT_SECRET.to_string()),
            audience: None,
        },
        stripe: StripeConfig {
            secret_key: Secret::new("sk_test_123".to_string()),
            webhook_secret: Secret::new(WEBHOOK_SECRET.to_string()),
            api_base_url: stripe_base_url.to_string(),
            currency: "usd".to_string(),
            webhook_tolerance_seconds: 300,
        },
        cron: CronConfig {
            secret: Secret::new(CRON_SECRET.to_string()),
            pending_retention_days: 7,
            interval_seconds: None,
        },
        rate_limit: RateLimitConfig {
            requests: 10_000,
            window_seconds: 60,
            redis_url: None,
            trust_forwarded_for: false,
        },
    }
}

pub fn product(id: &str, stock: i32) -> Product {
    let now = Utc::now();
    Product {
        id: id.to_string(),
        slug: format!("{}-slug", id),
        name: format!("Product {}", id),
        price: Decimal::from(50),
        stock,
        status: ProductStatus::Active,
        category_id: None,
        images: vec![],
        created_at: now,
        updated_at: now,
    }
}

fn profile(id: &str, role: Role) -> Profile {
    Profile {
        id: id.to_string(),
        email: Some(format!("{}@example.com", id)),
        full_name: Some(format!("Name of {}", id)),
        role,
        created_at: Utc::now(),
    }
}

pub fn token_for(user_id: &str) -> String {
    let claims = AuthClaims {
        sub: user_id.to_string(),
        email: Some(format!("{}@example.com", user_id)),
        exp: (Utc::now().timestamp() + 3600) as usize,
        aud: Some("authenticated".to_string()),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("Failed to mint token")
}

/// The checkout body used throughout: two of `p1` at 50.
pub fn order_body() -> Value {
    json!({
        "items": [{"product_id": "p1", "quantity": 2, "price": 50}],
        "shippingAddress": {"line1": "1 Main St", "city": "Springfield", "country": "US"},
        "subtotal": 100,
        "tax": 0,
        "shipping": 0,
        "total": 100
    })
}

pub fn payment_event(event_id: &str, event_type: &str, order_id: &str) -> Value {
    json!({
        "id": event_id,
        "type": event_type,
        "created": Utc::now().timestamp(),
        "data": {
            "object": {
                "id": format!("pi_{}", event_id),
                "object": "payment_intent",
                "amount": 10000,
                "currency": "usd",
                "metadata": {"orderId": order_id, "userId": CUSTOMER_ID}
            }
        }
    })
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(customize: impl FnOnce(&mut OrderServiceConfig)) -> Self {
        let stripe = MockServer::start().await;
        let mut config = test_config(&stripe.uri());
        customize(&mut config);

        let store = InMemoryOrderStore::new();
        store.insert_product(product("p1", 10)).await;
        store.insert_product(product("p2", 5)).await;
        store.insert_profile(profile(CUSTOMER_ID, Role::Customer)).await;
        store.insert_profile(profile(OTHER_CUSTOMER_ID, Role::Customer)).await;
        store.insert_profile(profile(ADMIN_ID, Role::Admin)).await;

        let app = Application::build_with_store(config, Arc::new(store.clone()))
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            store,
            stripe,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn create_order(&self, user_id: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url("/orders"))
            .bearer_auth(token_for(user_id))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Create the standard order and return its id.
    pub async fn place_order(&self, user_id: &str) -> String {
        let response = self.create_order(user_id, &order_body()).await;
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.expect("Failed to parse JSON");
        body["orderId"]
            .as_str()
            .expect("orderId missing")
            .to_string()
    }

    pub async fn get_order(&self, user_id: &str, order_id: &str) -> reqwest::Response {
        self.client
            .get(self.url(&format!("/orders/{}", order_id)))
            .bearer_auth(token_for(user_id))
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Current order JSON as the owner sees it.
    pub async fn order_json(&self, order_id: &str) -> Value {
        let response = self.get_order(ADMIN_ID, order_id).await;
        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.expect("Failed to parse JSON");
        body["order"].clone()
    }

    pub async fn patch_order(&self, user_id: &str, order_id: &str, body: &Value) -> reqwest::Response {
        self.client
            .patch(self.url(&format!("/orders/{}", order_id)))
            .bearer_auth(token_for(user_id))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn put_order(&self, user_id: &str, order_id: &str, body: &Value) -> reqwest::Response {
        self.client
            .put(self.url(&format!("/orders/{}", order_id)))
            .bearer_auth(token_for(user_id))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// Deliver `event` with a valid signature.
    pub async fn send_webhook(&self, event: &Value) -> reqwest::Response {
        let payload = serde_json::to_vec(event).expect("Failed to encode event");
        let header = sign_webhook_payload(WEBHOOK_SECRET, Utc::now().timestamp(), &payload)
            .expect("Failed to sign payload");
        self.send_raw_webhook(payload, Some(&header)).await
    }

    pub async fn send_raw_webhook(&self, payload: Vec<u8>, signature: Option<&str>) -> reqwest::Response {
        let mut request = self
            .client
            .post(self.url("/webhooks/payments"))
            .header("content-type", "application/json")
            .body(payload);
        if let Some(signature) = signature {
            request = request.header("stripe-signature", signature);
        }
        request.send().await.expect("Failed to execute request")
    }

    pub async fn stock_of(&self, product_id: &str) -> i32 {
        self.store
            .product(product_id)
            .await
            .expect("Product missing")
            .stock
    }
}
