//! Per-client request limiting applied ahead of every route.
//!
//! The limiter is a strategy object so the window algorithm can be swapped
//! without touching the router.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use axum::{
    async_trait,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::{sync::Mutex, time::Instant};
use tracing::warn;

use crate::{
    config::{RateLimitConfig, RateLimitKind},
    error::AppError,
};

/// Upper bound on tracked clients per strategy.
const MAX_TRACKED_KEYS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { retry_after: Duration },
}

#[async_trait]
pub trait RateLimitStrategy: Send + Sync {
    async fn check(&self, key: &str) -> Decision;
}

/// Makes room for a new key once the table is full: drops stale entries,
/// then the oldest ones until the table is at most half full.
fn make_room<V>(
    table: &mut HashMap<String, V>,
    max_keys: usize,
    is_stale: impl Fn(&V) -> bool,
    last_touched: impl Fn(&V) -> Instant,
) {
    if table.len() < max_keys {
        return;
    }
    table.retain(|_, v| !is_stale(v));

    let keep = max_keys / 2;
    if table.len() > keep {
        let mut by_age: Vec<(Instant, String)> = table
            .iter()
            .map(|(k, v)| (last_touched(v), k.clone()))
            .collect();
        by_age.sort_unstable_by_key(|(at, _)| *at);
        let excess = table.len() - keep;
        for (_, key) in by_age.into_iter().take(excess) {
            table.remove(&key);
        }
        warn!(evicted = excess, "rate limit table full, evicted oldest clients");
    }
}

#[derive(Debug)]
struct WindowEntry {
    started: Instant,
    count: u32,
}

/// Fixed window counter: at most `max_requests` per `window`, counted from the first request.
pub struct FixedWindow {
    max_requests: u32,
    window: Duration,
    max_keys: usize,
    entries: Mutex<HashMap<String, WindowEntry>>,
}

impl FixedWindow {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            max_keys: MAX_TRACKED_KEYS,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys.max(2);
        self
    }
}

#[async_trait]
impl RateLimitStrategy for FixedWindow {
    async fn check(&self, key: &str) -> Decision {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        if !entries.contains_key(key) {
            let window = self.window;
            make_room(
                &mut *entries,
                self.max_keys,
                |e| now.duration_since(e.started) >= window,
                |e| e.started,
            );
        }

        let entry = entries.entry(key.to_string()).or_insert(WindowEntry {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= self.max_requests {
            return Decision::Deny {
                retry_after: (entry.started + self.window).saturating_duration_since(now),
            };
        }

        entry.count += 1;
        Decision::Allow
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled: Instant,
}

/// Token bucket holding up to `capacity` tokens, refilled evenly over `window`.
pub struct TokenBucket {
    capacity: f64,
    per_sec: f64,
    max_keys: usize,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucket {
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            per_sec: capacity / window.as_secs_f64().max(f64::EPSILON),
            max_keys: MAX_TRACKED_KEYS,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys.max(2);
        self
    }
}

#[async_trait]
impl RateLimitStrategy for TokenBucket {
    async fn check(&self, key: &str) -> Decision {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();

        if !buckets.contains_key(key) {
            let full_after = Duration::from_secs_f64(self.capacity / self.per_sec);
            make_room(
                &mut *buckets,
                self.max_keys,
                |b| now.duration_since(b.refilled) >= full_after,
                |b| b.refilled,
            );
        }

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            refilled: now,
        });

        let elapsed = now.duration_since(bucket.refilled).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.per_sec).min(self.capacity);
        bucket.refilled = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Decision::Allow
        } else {
            let missing = 1.0 - bucket.tokens;
            Decision::Deny {
                retry_after: Duration::from_secs_f64(missing / self.per_sec),
            }
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    strategy: Arc<dyn RateLimitStrategy>,
    trust_forwarded_for: bool,
}

impl RateLimiter {
    pub fn new(strategy: Arc<dyn RateLimitStrategy>) -> Self {
        Self {
            strategy,
            trust_forwarded_for: false,
        }
    }

    /// Keys clients by the first `X-Forwarded-For` hop. Only safe behind a proxy that sets it.
    pub fn trusting_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        let strategy: Arc<dyn RateLimitStrategy> = match cfg.kind {
            RateLimitKind::FixedWindow => Arc::new(FixedWindow::new(cfg.max_requests, cfg.window)),
            RateLimitKind::TokenBucket => Arc::new(TokenBucket::new(cfg.max_requests, cfg.window)),
        };
        Self::new(strategy).trusting_forwarded_for(cfg.trust_forwarded_for)
    }
}

pub async fn rate_limit(State(limiter): State<RateLimiter>, req: Request, next: Next) -> Response {
    let key = client_key(&req, limiter.trust_forwarded_for);
    match limiter.strategy.check(&key).await {
        Decision::Allow => next.run(req).await,
        Decision::Deny { retry_after } => {
            warn!(client = %key, "rate limit exceeded");
            AppError::TooManyRequests {
                message: "Too many requests, please try again later.".into(),
                retry_after_secs: Some(retry_after.as_secs().max(1)),
            }
            .into_response()
        }
    }
}

/// Peer address, or the first `X-Forwarded-For` hop when the proxy is trusted.
fn client_key(req: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        if let Some(forwarded) = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return forwarded.to_string();
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    #[tokio::test(start_paused = true)]
    async fn fixed_window_blocks_until_window_resets() {
        let limiter = FixedWindow::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert_eq!(limiter.check("a").await, Decision::Allow);
        }
        match limiter.check("a").await {
            Decision::Deny { retry_after } => assert_eq!(retry_after, Duration::from_secs(60)),
            Decision::Allow => panic!("fourth request should be denied"),
        }
        // other clients are counted separately
        assert_eq!(limiter.check("b").await, Decision::Allow);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.check("a").await, Decision::Allow);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_window_admits_burst_at_boundary() {
        let limiter = FixedWindow::new(2, Duration::from_secs(10));
        assert_eq!(limiter.check("a").await, Decision::Allow);
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(limiter.check("a").await, Decision::Allow);
        assert!(matches!(limiter.check("a").await, Decision::Deny { .. }));

        // three requests land within one second across the boundary
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(limiter.check("a").await, Decision::Allow);
        assert_eq!(limiter.check("a").await, Decision::Allow);
    }

    #[tokio::test(start_paused = true)]
    async fn token_bucket_refills_gradually() {
        let limiter = TokenBucket::new(2, Duration::from_secs(10));
        assert_eq!(limiter.check("a").await, Decision::Allow);
        assert_eq!(limiter.check("a").await, Decision::Allow);
        match limiter.check("a").await {
            Decision::Deny { retry_after } => {
                assert!(retry_after <= Duration::from_secs(5));
                assert!(retry_after > Duration::from_secs(4));
            }
            Decision::Allow => panic!("bucket should be empty"),
        }

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(limiter.check("a").await, Decision::Allow);
        assert!(matches!(limiter.check("a").await, Decision::Deny { .. }));
    }

    #[tokio::test]
    async fn middleware_answers_429_with_retry_after() {
        let limiter = RateLimiter::new(Arc::new(FixedWindow::new(1, Duration::from_secs(900))))
            .trusting_forwarded_for(true);
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(limiter, rate_limit));

        let req = || {
            HttpRequest::builder()
                .uri("/")
                .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(req()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.clone().oneshot(req()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key("retry-after"));

        let other = HttpRequest::builder()
            .uri("/")
            .header("x-forwarded-for", "198.51.100.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.oneshot(other).await.unwrap().status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn rotating_keys_cannot_grow_the_table_past_its_cap() {
        let limiter = FixedWindow::new(100, Duration::from_secs(900)).with_max_keys(1_000);
        for i in 0..3_000 {
            assert_eq!(limiter.check(&format!("10.0.{}.{}", i / 256, i % 256)).await, Decision::Allow);
        }
        assert!(limiter.entries.lock().await.len() <= 1_000);

        let bucket = TokenBucket::new(100, Duration::from_secs(900)).with_max_keys(1_000);
        for i in 0..3_000 {
            bucket.check(&format!("client-{i}")).await;
        }
        assert!(bucket.buckets.lock().await.len() <= 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_drops_the_oldest_clients_first() {
        let limiter = FixedWindow::new(1, Duration::from_secs(900)).with_max_keys(4);
        for key in ["a", "b", "c", "d"] {
            limiter.check(key).await;
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        // full table: the two oldest make way for "e"
        limiter.check("e").await;
        let entries = limiter.entries.lock().await;
        assert!(!entries.contains_key("a"));
        assert!(!entries.contains_key("b"));
        assert!(entries.contains_key("c"));
        assert!(entries.contains_key("d"));
        assert!(entries.contains_key("e"));
    }

    #[tokio::test]
    async fn forwarded_for_is_ignored_unless_trusted() {
        let limiter = RateLimiter::new(Arc::new(FixedWindow::new(1, Duration::from_secs(900))));
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(limiter, rate_limit));

        let spoofed = |ip: &str| {
            HttpRequest::builder()
                .uri("/")
                .header("x-forwarded-for", ip)
                .body(Body::empty())
                .unwrap()
        };
        assert_eq!(app.clone().oneshot(spoofed("203.0.113.1")).await.unwrap().status(), StatusCode::OK);
        assert_eq!(
            app.oneshot(spoofed("203.0.113.2")).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
