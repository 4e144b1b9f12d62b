use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{Instrument, warn};
use uuid::Uuid;

use crate::config::RateLimitConfig;

pub const CORRELATION_ID: &str = "x-correlation-id";
pub const RATE_LIMIT_MESSAGE: &str =
    "Too many requests from this IP, please try again after 15 minutes.";

/// Middleware to add correlation ID to all requests
pub async fn correlation_id_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request
            .headers_mut()
            .insert(HeaderName::from_static(CORRELATION_ID), value);
    }

    let span = tracing::info_span!(
        "http_request",
        correlation_id = %correlation_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    next.run(request).instrument(span).await
}

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter keyed by client IP. Expired windows are evicted at most once
/// per window length.
#[derive(Clone)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: Arc<DashMap<Option<IpAddr>, Window>>,
    last_sweep: Arc<Mutex<Instant>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: config.window,
            clients: Arc::new(DashMap::new()),
            last_sweep: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Number of clients with a live window.
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    fn sweep(&self, now: Instant) {
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            if now.duration_since(*last) < self.window {
                return;
            }
            *last = now;
        }
        let window = self.window;
        self.clients
            .retain(|_, entry| now.duration_since(entry.started) < window);
    }

    /// Count one request from `client`; false once the client exceeded its window budget.
    pub fn check(&self, client: Option<IpAddr>) -> bool {
        let now = Instant::now();
        // No map guard may be held here; retain locks every shard.
        self.sweep(now);
        let mut entry = self.clients.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        entry.count = entry.count.saturating_add(1);
        entry.count <= self.max_requests
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    // Without connection info (e.g. in-process tests) all callers share one bucket.
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if !limiter.check(client) {
        warn!(client = ?client, "Rate limit exceeded");
        return (StatusCode::TOO_MANY_REQUESTS, RATE_LIMIT_MESSAGE).into_response();
    }

    next.run(request).await
}

/// Conservative browser security headers applied to every response.
pub fn security_headers() -> Vec<SetResponseHeaderLayer<HeaderValue>> {
    [
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "SAMEORIGIN"),
        ("referrer-policy", "no-referrer"),
        ("x-dns-prefetch-control", "off"),
        ("cross-origin-opener-policy", "same-origin"),
        ("x-download-options", "noopen"),
    ]
    .into_iter()
    .map(|(name, value)| {
        SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        )
    })
    .collect()
}
