//! Fixed-window rate limiting.
//!
//! Each tier owns one [`RateLimiter`] and keys requests differently:
//! auth routes by client IP, refresh by session cookie, API routes by user.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use parking_lot::Mutex;

use crate::config::RateLimitingConfig;
use crate::error::AuthError;
use crate::middleware::AuthContext;
use crate::session::SESSION_COOKIE_NAME;

/// New windows created between sweeps of expired windows.
const SWEEP_INTERVAL: u32 = 100;

// =============================================================================
// Limiter
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug, Default)]
struct LimiterState {
    windows: HashMap<String, Window>,
    created_since_sweep: u32,
}

/// Counts requests per key in fixed windows.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            state: Mutex::new(LimiterState::default()),
        }
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Counts a request for `key`.
    ///
    /// # Errors
    ///
    /// Returns the time until the key's window resets when the limit is
    /// already reached.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        self.check_at(key, Instant::now())
    }

    /// [`check`](Self::check) at an explicit instant.
    ///
    /// # Errors
    ///
    /// Returns the remaining window time when over the limit.
    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), Duration> {
        let mut state = self.state.lock();

        if let Some(window) = state.windows.get_mut(key) {
            let elapsed = now.saturating_duration_since(window.started);
            if elapsed < self.window {
                if window.count >= self.limit {
                    return Err(self.window - elapsed);
                }
                window.count += 1;
                return Ok(());
            }
            *window = Window {
                started: now,
                count: 1,
            };
            return Ok(());
        }

        state.windows.insert(
            key.to_string(),
            Window {
                started: now,
                count: 1,
            },
        );
        state.created_since_sweep += 1;
        if state.created_since_sweep >= SWEEP_INTERVAL {
            let window = self.window;
            state
                .windows
                .retain(|_, w| now.saturating_duration_since(w.started) < window);
            state.created_since_sweep = 0;
        }
        Ok(())
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.state.lock().windows.len()
    }
}

// =============================================================================
// Tiers and middleware
// =============================================================================

/// What a rate limit tier is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitTier {
    /// Login and logout, keyed by client IP.
    Auth,
    /// Session refresh, keyed by session cookie, else client IP.
    Refresh,
    /// Mutating API requests, keyed by user, else client IP.
    Write,
    /// All other API requests, keyed by user, else client IP.
    Default,
}

impl RateLimitTier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Refresh => "refresh",
            Self::Write => "write",
            Self::Default => "default",
        }
    }

    fn limit(self, config: &RateLimitingConfig) -> u32 {
        match self {
            Self::Auth => config.auth,
            Self::Refresh => config.refresh,
            Self::Write => config.write,
            Self::Default => config.default,
        }
    }

    fn key(self, req: &Request) -> String {
        match self {
            Self::Auth => client_ip_key(req.headers(), peer_addr(req)),
            Self::Refresh => session_key(req.headers(), peer_addr(req)),
            Self::Write | Self::Default => user_key(req),
        }
    }
}

/// Middleware state for one tier. Disabled rate limiting is a no-op.
#[derive(Debug, Clone)]
pub struct RateLimit {
    tier: RateLimitTier,
    limiter: Option<Arc<RateLimiter>>,
}

impl RateLimit {
    #[must_use]
    pub fn new(tier: RateLimitTier, config: &RateLimitingConfig) -> Self {
        let limiter = config
            .enabled
            .then(|| Arc::new(RateLimiter::new(tier.limit(config), config.window)));
        Self { tier, limiter }
    }

    #[must_use]
    pub fn tier(&self) -> RateLimitTier {
        self.tier
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }
}

/// Rate limiting middleware. Use with `axum::middleware::from_fn_with_state`.
///
/// Write and default tiers must run after `authenticate` so the caller's
/// identity is available.
pub async fn rate_limit(State(state): State<RateLimit>, req: Request, next: Next) -> Response {
    let Some(limiter) = state.limiter.as_ref() else {
        return next.run(req).await;
    };

    let key = state.tier.key(&req);
    if let Err(retry_after) = limiter.check(&key) {
        let retry_after_secs = retry_after_secs(retry_after);
        tracing::warn!(
            tier = state.tier.as_str(),
            key = %key,
            path = %req.uri().path(),
            retry_after_secs,
            "Rate limit exceeded"
        );
        return AuthError::RateLimited { retry_after_secs }.into_response();
    }

    next.run(req).await
}

/// Whole seconds, rounded up, never zero.
fn retry_after_secs(remaining: Duration) -> u64 {
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    secs.max(1)
}

// =============================================================================
// Key extraction
// =============================================================================

fn peer_addr(req: &Request) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Client IP: leftmost valid address of `X-Forwarded-For`, else the peer.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').find_map(|ip| ip.trim().parse::<IpAddr>().ok()))
        .or_else(|| peer.map(|addr| addr.ip()))
}

/// `ip:{addr}` key, `ip:unknown` when no address is known.
#[must_use]
pub fn client_ip_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    match client_ip(headers, peer) {
        Some(ip) => format!("ip:{ip}"),
        None => "ip:unknown".to_string(),
    }
}

/// `session:{id}` key from the session cookie, else the client IP key.
#[must_use]
pub fn session_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE_NAME)
        .map(|c| c.value())
        .filter(|v| !v.is_empty())
        .map_or_else(|| client_ip_key(headers, peer), |id| format!("session:{id}"))
}

fn user_key(req: &Request) -> String {
    req.extensions()
        .get::<AuthContext>()
        .and_then(AuthContext::rate_limit_key)
        .unwrap_or_else(|| client_ip_key(req.headers(), peer_addr(req)))
}
