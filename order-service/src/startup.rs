//! Application startup and lifecycle management.

use crate::config::OrderServiceConfig;
use crate::handlers;
use crate::middleware::JwtVerifier;
use crate::services::{spawn_cleanup_worker, OrderStore, OrderWorkflow, PgOrderStore, StripeClient};
use axum::{
    extract::FromRef,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{ip_rate_limit_middleware, spawn_retain_recent, IpRateLimit, RateLimitBackend},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: OrderServiceConfig,
    pub workflow: OrderWorkflow,
    pub jwt: JwtVerifier,
}

impl FromRef<AppState> for JwtVerifier {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

fn rate_limit_backend(config: &OrderServiceConfig) -> Result<RateLimitBackend, AppError> {
    let limits = &config.rate_limit;
    match &limits.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.expose_secret().as_str())?;
            tracing::info!("Rate limiting shared through Redis");
            Ok(RateLimitBackend::shared(
                client,
                limits.requests,
                limits.window_seconds,
            ))
        }
        None => {
            tracing::info!("Rate limiting is local to this instance");
            Ok(RateLimitBackend::local(limits.requests, limits.window_seconds))
        }
    }
}

pub fn router(state: AppState, rate_limit: IpRateLimit) -> Router {
    let limited = from_fn_with_state(rate_limit, ip_rate_limit_middleware);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/orders",
            post(handlers::orders::create_order)
                .layer(limited.clone())
                .get(handlers::orders::list_orders),
        )
        .route(
            "/orders/:id",
            get(handlers::orders::get_order)
                .patch(handlers::orders::patch_order)
                .put(handlers::orders::put_order),
        )
        .route(
            "/payment-intent",
            post(handlers::payments::create_payment_intent).layer(limited),
        )
        .route("/webhooks/payments", post(handlers::payments::webhook))
        .route(
            "/cron/cleanup-pending-orders",
            get(handlers::cron::cleanup_pending_orders),
        )
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    workflow: OrderWorkflow,
    cleanup_every: Option<Duration>,
    rate_limit: RateLimitBackend,
    prune_every: Duration,
}

impl Application {
    /// Build against Postgres, running pending migrations first.
    pub async fn build(config: OrderServiceConfig) -> Result<Self, AppError> {
        let store = PgOrderStore::connect(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;
        store.run_migrations().await?;

        Self::build_with_store(config, Arc::new(store)).await
    }

    pub async fn build_with_store(
        config: OrderServiceConfig,
        store: Arc<dyn OrderStore>,
    ) -> Result<Self, AppError> {
        let stripe = StripeClient::new(config.stripe.clone());
        if stripe.is_configured() {
            tracing::info!("Stripe client initialized");
        } else {
            tracing::warn!("Stripe credentials not configured - payment intents are disabled");
        }
        if !stripe.webhook_configured() {
            tracing::warn!("Stripe webhook secret not configured - webhooks will be refused");
        }

        let workflow = OrderWorkflow::new(store, stripe, config.cron.pending_retention_days);
        let jwt = JwtVerifier::new(
            config.auth.jwt_secret.expose_secret(),
            config.auth.audience.as_deref(),
        );

        let rate_limit = rate_limit_backend(&config)?;
        let limiter = IpRateLimit::new(rate_limit.clone(), config.rate_limit.trust_forwarded_for);
        let prune_every = Duration::from_secs(config.rate_limit.window_seconds.max(60));
        let cleanup_every = config.cron.interval_seconds.map(Duration::from_secs);

        let addr = format!("{}:{}", config.common.host, config.common.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        let state = AppState {
            config,
            workflow: workflow.clone(),
            jwt,
        };

        tracing::info!("Order service: HTTP on port {}", port);

        Ok(Self {
            port,
            listener,
            router: router(state, limiter),
            workflow,
            cleanup_every,
            rate_limit,
            prune_every,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, letting in-flight requests finish.
    /// Background workers (pending-order cleanup, rate limit key pruning)
    /// stop with the server.
    pub async fn run_until<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cleanup = self
            .cleanup_every
            .map(|every| spawn_cleanup_worker(self.workflow.clone(), every));
        let pruner = spawn_retain_recent(self.rate_limit.clone(), self.prune_every);

        let result = axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        for handle in cleanup.into_iter().chain(pruner) {
            handle.abort();
        }

        result.map_err(|e| {
            tracing::error!("HTTP server error: {}", e);
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
