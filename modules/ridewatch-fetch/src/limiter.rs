use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ridewatch_common::MetricsSink;
use tracing::debug;

use crate::error::FetchError;

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub requests_per_second: f64,
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 1.0,
            burst: 3,
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    throttle_until: Option<Instant>, // server-enforced cooldown gate
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last_refill: Instant::now(),
            throttle_until: None,
        }
    }

    fn refill(&mut self, now: Instant) {
        let dt = now.duration_since(self.last_refill).as_secs_f64();
        if dt > 0.0 {
            self.tokens = (self.tokens + dt * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Try to consume one token; return how long the caller should wait if
    /// the bucket is empty or under a server cooldown.
    fn try_consume(&mut self, now: Instant) -> Option<Duration> {
        if let Some(until) = self.throttle_until {
            if now < until {
                return Some(until - now);
            }
            self.throttle_until = None;
        }

        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let shortfall = 1.0 - self.tokens;
            let secs = (shortfall / self.refill_per_sec).max(0.0);
            Some(Duration::from_secs_f64(secs))
        }
    }

    /// Apply a server-directed cooldown window (e.g. `Retry-After`).
    fn apply_server_cooldown(&mut self, d: Duration, now: Instant) {
        self.tokens = 0.0;
        self.throttle_until = Some(now + d);
        self.last_refill = now;
    }
}

/// Process-wide per-host token-bucket governor. All fetchers share one
/// instance; acquisition blocks until a token is available or the caller's
/// deadline would be exceeded.
pub struct RateLimiter {
    buckets: tokio::sync::Mutex<HashMap<String, TokenBucket>>,
    config: RateLimiterConfig,
    metrics: Arc<MetricsSink>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, metrics: Arc<MetricsSink>) -> Self {
        Self {
            buckets: tokio::sync::Mutex::new(HashMap::new()),
            config,
            metrics,
        }
    }

    /// Wait for a token for `host`. Errors with `Timeout` when the remaining
    /// wait would pass `deadline`.
    pub async fn acquire(&self, host: &str, deadline: Instant) -> Result<(), FetchError> {
        let mut waited = false;
        loop {
            let now = Instant::now();
            let maybe_wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets.entry(host.to_string()).or_insert_with(|| {
                    TokenBucket::new(
                        self.config.burst.max(1) as f64,
                        self.config.requests_per_second,
                    )
                });
                bucket.try_consume(now)
            };

            match maybe_wait {
                None => return Ok(()),
                Some(wait) => {
                    if now + wait > deadline {
                        debug!(host, wait_ms = wait.as_millis() as u64, "limiter wait would exceed deadline");
                        return Err(FetchError::Timeout);
                    }
                    if !waited {
                        self.metrics.incr("limiter.waits");
                        waited = true;
                    }
                    self.metrics.add("limiter.wait_time_ms", wait.as_millis() as u64);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Feed a server cooldown (Retry-After) into the host's bucket so
    /// concurrent callers back off too.
    pub async fn apply_cooldown(&self, host: &str, d: Duration) {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(host.to_string()).or_insert_with(|| {
            TokenBucket::new(
                self.config.burst.max(1) as f64,
                self.config.requests_per_second,
            )
        });
        bucket.apply_server_cooldown(d, Instant::now());
    }
}
