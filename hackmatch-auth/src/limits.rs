//! Per-client request rate limiting.
//!
//! Each [`RateLimiter`] counts requests per client key in fixed windows. Counters live in an
//! injected [`CounterStore`]; the default [`MemoryCounterStore`] keeps them in a `moka` cache whose
//! entries expire when their window ends, so a restart resets every client.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use moka::future::Cache;

use crate::config::{RateLimitConfig, RateLimitsConfig};
use crate::errors::{Error, Result};

pub const GENERIC_LIMIT_MESSAGE: &str = "Too many requests. Please try again later.";
pub const LOGIN_LIMIT_MESSAGE: &str = "Too many login attempts. Please try again later.";
pub const PASSWORD_RESET_LIMIT_MESSAGE: &str = "Too many password reset requests. Please try again later.";

/// Storage for fixed-window hit counters.
#[async_trait::async_trait]
pub trait CounterStore: Send + Sync {
    /// Count one hit for `key` and return the total within the current window
    async fn hit(&self, key: &str) -> u64;
}

/// Process-local counters; each key's window starts at its first hit.
pub struct MemoryCounterStore {
    counters: Cache<String, Arc<AtomicU64>>,
}

impl MemoryCounterStore {
    pub fn new(window: Duration) -> Self {
        Self {
            counters: Cache::builder().max_capacity(100_000).time_to_live(window).build(),
        }
    }
}

#[async_trait::async_trait]
impl CounterStore for MemoryCounterStore {
    async fn hit(&self, key: &str) -> u64 {
        let counter = self
            .counters
            .get_with(key.to_string(), async { Arc::new(AtomicU64::new(0)) })
            .await;
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Container for all rate limiters. `None` means the limit is disabled.
#[derive(Clone, Default)]
pub struct Limiters {
    /// Every `/api` request
    pub generic: Option<Arc<RateLimiter>>,
    /// Login attempts
    pub login: Option<Arc<RateLimiter>>,
    /// Forgot-password requests
    pub password_reset: Option<Arc<RateLimiter>>,
}

impl fmt::Debug for Limiters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiters")
            .field("generic", &self.generic.is_some())
            .field("login", &self.login.is_some())
            .field("password_reset", &self.password_reset.is_some())
            .finish()
    }
}

impl Limiters {
    /// Creates all limiters from configuration, each with its own in-memory counters.
    pub fn new(config: &RateLimitsConfig) -> Self {
        let build = |limit: &RateLimitConfig, message: &str| {
            RateLimiter::from_config(limit, message, config.trust_forwarded_for).map(Arc::new)
        };

        Self {
            generic: build(&config.generic, GENERIC_LIMIT_MESSAGE),
            login: build(&config.login, LOGIN_LIMIT_MESSAGE),
            password_reset: build(&config.password_reset, PASSWORD_RESET_LIMIT_MESSAGE),
        }
    }
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    max_requests: u64,
    message: String,
    trust_forwarded_for: bool,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, max_requests: u64, message: impl Into<String>, trust_forwarded_for: bool) -> Self {
        Self {
            store,
            max_requests,
            message: message.into(),
            trust_forwarded_for,
        }
    }

    /// Returns `None` when `max_requests` is 0 (unlimited).
    pub fn from_config(config: &RateLimitConfig, message: &str, trust_forwarded_for: bool) -> Option<Self> {
        if config.max_requests == 0 {
            return None;
        }

        Some(Self::new(
            Arc::new(MemoryCounterStore::new(config.window)),
            config.max_requests,
            message,
            trust_forwarded_for,
        ))
    }

    /// Count a request from `key`, failing once the window's allowance is used up.
    ///
    /// Returns the number of requests still allowed in the window.
    pub async fn check(&self, key: &str) -> Result<u64> {
        let hits = self.store.hit(key).await;
        if hits > self.max_requests {
            metrics::counter!("hackmatch_auth_rate_limited_total").increment(1);
            tracing::warn!(client = %key, hits, limit = self.max_requests, "Rate limit exceeded");
            return Err(Error::TooManyRequests {
                message: self.message.clone(),
            });
        }
        Ok(self.max_requests - hits)
    }

    fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| self.trust_forwarded_for && !value.is_empty());

        match (forwarded, peer) {
            (Some(forwarded), _) => forwarded.to_string(),
            (None, Some(addr)) => addr.ip().to_string(),
            (None, None) => "unknown".to_string(),
        }
    }
}

/// Middleware enforcing one limiter. Use with `axum::middleware::from_fn_with_state`.
pub async fn rate_limit(State(limiter): State<Arc<RateLimiter>>, request: Request, next: Next) -> Result<Response> {
    let peer = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|info| info.0);
    let key = limiter.client_key(request.headers(), peer);

    let remaining = limiter.check(&key).await?;

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("ratelimit-limit", HeaderValue::from(limiter.max_requests));
    headers.insert("ratelimit-remaining", HeaderValue::from(remaining));
    Ok(response)
}
