//! Per-client request budgets.
//!
//! Every (client, tier) pair owns a token bucket that holds up to the tier's
//! limit and refills continuously at `limit / window`. Anonymous tiers key on
//! the client IP. The payment tier keys on the signed-in account whenever the
//! request carries a valid bearer token, so wallets behind one NAT address do
//! not share a budget and hopping addresses does not reset one.

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::ApiError;
use crate::config::RateLimitConfig;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    /// Everything behind a session token
    Api,
    /// Login, registration and one-time-code endpoints
    Auth,
    /// Transfers, deposits and request acceptance
    Payment,
}

/// Whose budget a request draws from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    Ip(IpAddr),
    Account(String),
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKey::Ip(ip) => write!(f, "ip:{}", ip),
            ClientKey::Account(id) => write!(f, "user:{}", id),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// What is left of a budget after an allowed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allowance {
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the bucket is full again
    pub reset_after: u64,
}

#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<(ClientKey, RateLimitTier), Bucket>,
    config: RateLimitConfig,
    window: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            window: Duration::from_secs(config.window_seconds.max(1)),
            config,
        }
    }

    fn limit(&self, tier: RateLimitTier) -> u32 {
        match tier {
            RateLimitTier::Api => self.config.api_requests_per_window,
            RateLimitTier::Auth => self.config.auth_requests_per_window,
            RateLimitTier::Payment => self.config.payment_requests_per_window,
        }
    }

    /// Take one token. `Err` carries the seconds until a token is available.
    pub fn check(&self, key: &ClientKey, tier: RateLimitTier) -> Result<Allowance, u64> {
        self.check_at(key, tier, Instant::now())
    }

    fn check_at(&self, key: &ClientKey, tier: RateLimitTier, now: Instant) -> Result<Allowance, u64> {
        if !self.config.enabled {
            return Ok(Allowance {
                limit: u32::MAX,
                remaining: u32::MAX,
                reset_after: 0,
            });
        }

        let limit = self.limit(tier);
        if limit == 0 {
            return Err(self.window.as_secs().max(1));
        }
        let capacity = f64::from(limit);
        let window = self.window.as_secs_f64();
        // Seconds needed to earn `tokens`
        let earn = |tokens: f64| (tokens * window / capacity).ceil() as u64;

        let mut bucket = self
            .buckets
            .entry((key.clone(), tier))
            .or_insert_with(|| Bucket {
                tokens: capacity,
                refilled_at: now,
            });

        let idle = now.saturating_duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + idle * capacity / window).min(capacity);
        bucket.refilled_at = now;

        if bucket.tokens < 1.0 {
            return Err(earn(1.0 - bucket.tokens).max(1));
        }

        bucket.tokens -= 1.0;
        Ok(Allowance {
            limit,
            remaining: bucket.tokens.floor() as u32,
            reset_after: earn(capacity - bucket.tokens),
        })
    }

    /// Forget buckets idle for a whole window. They have refilled completely,
    /// so a fresh bucket behaves the same.
    pub fn cleanup_expired(&self) {
        self.cleanup_at(Instant::now());
    }

    fn cleanup_at(&self, now: Instant) {
        let window = self.window;
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.refilled_at) < window);
    }

    pub fn entry_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Client IP from proxy headers, falling back to loopback
fn client_ip(request: &Request<Body>) -> IpAddr {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    // First hop of X-Forwarded-For is the original client
    header("x-forwarded-for")
        .and_then(|value| value.split(',').next().and_then(|ip| ip.trim().parse().ok()))
        .or_else(|| header("x-real-ip").and_then(|value| value.trim().parse().ok()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn signed_in_account(state: &AppState, request: &Request<Body>) -> Option<ClientKey> {
    let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    let claims = state.accounts.tokens().verify(token).ok()?;
    Some(ClientKey::Account(claims.sub))
}

fn client_key(state: &AppState, request: &Request<Body>, tier: RateLimitTier) -> ClientKey {
    match tier {
        RateLimitTier::Payment => signed_in_account(state, request)
            .unwrap_or_else(|| ClientKey::Ip(client_ip(request))),
        RateLimitTier::Api | RateLimitTier::Auth => ClientKey::Ip(client_ip(request)),
    }
}

pub async fn rate_limit_api(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce(state, request, next, RateLimitTier::Api).await
}

pub async fn rate_limit_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce(state, request, next, RateLimitTier::Auth).await
}

pub async fn rate_limit_payment(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce(state, request, next, RateLimitTier::Payment).await
}

async fn enforce(
    state: Arc<AppState>,
    request: Request<Body>,
    next: Next,
    tier: RateLimitTier,
) -> Response {
    let key = client_key(&state, &request, tier);

    match state.rate_limiter.check(&key, tier) {
        Ok(allowance) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(allowance.limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(allowance.remaining));
            headers.insert("X-RateLimit-Reset", HeaderValue::from(allowance.reset_after));
            response
        }
        Err(retry_after) => {
            tracing::warn!(client = %key, tier = ?tier, retry_after, "Rate limit exceeded");
            let mut response = ApiError::rate_limited(format!(
                "Too many requests. Try again in {} seconds.",
                retry_after
            ))
            .into_response();
            let headers = response.headers_mut();
            headers.insert("Retry-After", HeaderValue::from(retry_after));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u32));
            response
        }
    }
}

/// Periodically drop idle buckets
pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, cleanup_interval_secs: u64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(cleanup_interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            rate_limiter.cleanup_expired();
            tracing::debug!(buckets = rate_limiter.entry_count(), "Rate limiter cleanup");
        }
    });
}
