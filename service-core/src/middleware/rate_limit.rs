use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};
use tokio::{task::JoinHandle, time::MissedTickBehavior};

/// Rate limiter keyed by client IP, local to this process.
pub type IpRateLimiter = Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>>;

/// Create a keyed rate limiter (by IP)
pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    let attempts = attempts.max(1);
    let period = Duration::from_millis(((window_seconds.max(1) * 1000) / attempts as u64).max(1));
    let burst = NonZeroU32::new(attempts).unwrap_or(NonZeroU32::MIN);
    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst);

    Arc::new(RateLimiter::dashmap(quota))
}

/// Fixed-window counter in Redis so every instance shares one budget per IP.
#[derive(Clone)]
pub struct SharedRateLimiter {
    client: redis::Client,
    limit: u32,
    window_seconds: u64,
}

impl SharedRateLimiter {
    pub fn new(client: redis::Client, limit: u32, window_seconds: u64) -> Self {
        Self {
            client,
            limit: limit.max(1),
            window_seconds: window_seconds.max(1),
        }
    }

    /// Count one hit for `key`. Returns `Some(retry_after_secs)` once the
    /// window's budget is spent.
    pub async fn check(&self, key: &str) -> Result<Option<u64>, AppError> {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let window = now / self.window_seconds;
        let redis_key = format!("ratelimit:{}:{}", key, window);

        let mut con = self.client.get_multiplexed_async_connection().await?;
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(&redis_key, 1u64)
            .expire(&redis_key, self.window_seconds as i64)
            .ignore()
            .query_async(&mut con)
            .await?;

        if count > self.limit as u64 {
            let retry_after = self.window_seconds - (now % self.window_seconds);
            return Ok(Some(retry_after));
        }

        Ok(None)
    }
}

/// Where request counters live.
///
/// `Local` only sees this process's traffic; run `Shared` when the service is
/// scaled out.
#[derive(Clone)]
pub enum RateLimitBackend {
    Local(IpRateLimiter),
    Shared(SharedRateLimiter),
}

impl RateLimitBackend {
    pub fn local(attempts: u32, window_seconds: u64) -> Self {
        RateLimitBackend::Local(create_ip_rate_limiter(attempts, window_seconds))
    }

    pub fn shared(client: redis::Client, attempts: u32, window_seconds: u64) -> Self {
        RateLimitBackend::Shared(SharedRateLimiter::new(client, attempts, window_seconds))
    }

    /// Number of client keys held in process memory. Always 0 for `Shared`.
    pub fn tracked_keys(&self) -> usize {
        match self {
            RateLimitBackend::Local(limiter) => limiter.len(),
            RateLimitBackend::Shared(_) => 0,
        }
    }

    /// Drop local keys whose budget has fully refilled. Redis expires its own
    /// keys, so `Shared` has nothing to do.
    pub fn retain_recent(&self) {
        if let RateLimitBackend::Local(limiter) = self {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
    }
}

/// Periodically prune idle keys from a local limiter. Returns `None` for a
/// shared backend.
pub fn spawn_retain_recent(backend: RateLimitBackend, every: Duration) -> Option<JoinHandle<()>> {
    if matches!(backend, RateLimitBackend::Shared(_)) {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            backend.retain_recent();
            tracing::debug!(
                tracked_keys = backend.tracked_keys(),
                "Pruned idle rate limit keys"
            );
        }
    }))
}

/// Rate limit middleware state: the counters plus how the client is identified.
#[derive(Clone)]
pub struct IpRateLimit {
    backend: RateLimitBackend,
    trust_forwarded_for: bool,
}

impl IpRateLimit {
    /// `trust_forwarded_for` should only be set when a proxy in front of the
    /// service overwrites `x-forwarded-for`; otherwise clients choose their key.
    pub fn new(backend: RateLimitBackend, trust_forwarded_for: bool) -> Self {
        Self {
            backend,
            trust_forwarded_for,
        }
    }

    pub fn backend(&self) -> &RateLimitBackend {
        &self.backend
    }
}

/// Client address: the socket peer, or the first `x-forwarded-for` hop when
/// the header is trusted.
pub fn client_ip(request: &Request, trust_forwarded_for: bool) -> Option<IpAddr> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if !trust_forwarded_for {
        return peer;
    }

    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
        .or(peer)
}

/// Middleware for IP-based rate limiting
pub async fn ip_rate_limit_middleware(
    State(limit): State<IpRateLimit>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(ip) = client_ip(&request, limit.trust_forwarded_for) else {
        tracing::warn!("Could not determine IP for rate limiting");
        return Ok(next.run(request).await);
    };

    match &limit.backend {
        RateLimitBackend::Local(limiter) => match limiter.check_key(&ip) {
            Ok(_) => Ok(next.run(request).await),
            Err(negative) => {
                let wait_time = negative.wait_time_from(DefaultClock::default().now());
                Err(AppError::TooManyRequests(
                    "Too many requests from this IP. Please try again later.".to_string(),
                    Some(wait_time.as_secs().max(1)),
                ))
            }
        },
        RateLimitBackend::Shared(limiter) => match limiter.check(&ip.to_string()).await {
            Ok(None) => Ok(next.run(request).await),
            Ok(Some(retry_after)) => Err(AppError::TooManyRequests(
                "Too many requests from this IP. Please try again later.".to_string(),
                Some(retry_after),
            )),
            Err(e) => {
                // Counter store outage must not take checkout down with it.
                tracing::warn!(error = %e, "Shared rate limiter unavailable, allowing request");
                Ok(next.run(request).await)
            }
        },
    }
}
