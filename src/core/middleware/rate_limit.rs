//! Sliding-window rate limiting.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::warn;

use super::{Middleware, Request};
use crate::core::error::{Error, Result};

/// Rate limit settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Requests admitted per window.
    pub max_requests: usize,
    pub window: Duration,
    /// Limit each method separately instead of all requests together.
    pub per_tool: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
            per_tool: false,
        }
    }
}

/// Rejects requests once `max_requests` have been admitted within the
/// trailing window.
#[derive(Debug)]
pub struct RateLimitMiddleware {
    config: RateLimitConfig,
    /// Admission timestamps per key, oldest first.
    admitted: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimitMiddleware {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            admitted: Mutex::new(HashMap::new()),
        }
    }

    fn key(&self, request: &Request) -> String {
        if self.config.per_tool {
            format!("tool:{}", request.method)
        } else {
            "global".to_string()
        }
    }

    /// Record an admission for `key`, or fail if the window is full.
    fn admit(&self, key: String) -> Result<()> {
        let now = Instant::now();
        let mut admitted = self.admitted.lock();
        let window = admitted.entry(key).or_default();

        while window
            .front()
            .is_some_and(|at| now.duration_since(*at) >= self.config.window)
        {
            window.pop_front();
        }

        if window.len() >= self.config.max_requests {
            return Err(Error::RateLimitExceeded {
                count: window.len(),
                limit: self.config.max_requests,
                window_seconds: self.config.window.as_secs_f64(),
            });
        }
        window.push_back(now);
        Ok(())
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn process_request(&self, request: Request) -> Result<Request> {
        let key = self.key(&request);
        if let Err(e) = self.admit(key) {
            warn!("Rejecting request {} for '{}': {}", request.id(), request.method, e);
            return Err(e);
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limiter(max_requests: usize, window_secs: u64, per_tool: bool) -> RateLimitMiddleware {
        RateLimitMiddleware::new(RateLimitConfig {
            max_requests,
            window: Duration::from_secs(window_secs),
            per_tool,
        })
    }

    async fn call(limiter: &RateLimitMiddleware, method: &str) -> Result<Request> {
        limiter.process_request(Request::new(method, json!({}))).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_boundary() {
        let limiter = limiter(2, 10, false);

        assert!(call(&limiter, "a").await.is_ok());
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(call(&limiter, "b").await.is_ok());

        let err = call(&limiter, "c").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded: 2 requests in the last 10s (limit: 2)"
        );

        // The first admission is exactly one window old and falls out.
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(call(&limiter, "d").await.is_ok());
        assert!(call(&limiter, "e").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_do_not_consume_capacity() {
        let limiter = limiter(1, 10, false);
        assert!(call(&limiter, "a").await.is_ok());
        for _ in 0..5 {
            assert!(call(&limiter, "a").await.is_err());
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(call(&limiter, "a").await.is_ok());
    }

    #[tokio::test]
    async fn test_per_tool_keys_are_independent() {
        let limiter = limiter(1, 60, true);
        assert!(call(&limiter, "echo").await.is_ok());
        assert!(call(&limiter, "server_metrics").await.is_ok());
        assert!(call(&limiter, "echo").await.is_err());

        let global = self::limiter(1, 60, false);
        assert!(call(&global, "echo").await.is_ok());
        assert!(call(&global, "server_metrics").await.is_err());
    }
}
