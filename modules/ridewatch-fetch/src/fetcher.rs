use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use ridewatch_common::{content_hash, MetricsSink};
use tracing::{debug, info, warn};

use crate::cache::{ContentCache, FetchRecord, Validator};
use crate::error::FetchError;
use crate::limiter::RateLimiter;

#[derive(Clone)]
pub struct FetcherConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// TTL stamped onto cache entries written by this fetcher.
    pub ttl: Duration,
    /// Per-request deadline used by the `PageFetcher` trait entry point.
    pub request_deadline: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            ttl: Duration::from_secs(6 * 3600),
            request_deadline: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub from_cache: bool,
}

/// The fetch seam the pipeline stages depend on, so tests can substitute a
/// canned page source.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str, allow_cached: bool) -> Result<Vec<u8>, FetchError>;
}

/// HTTP GET with limiter discipline, retry/backoff, and cache write-through.
pub struct HttpFetcher {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    cache: Arc<ContentCache>,
    config: FetcherConfig,
    /// Optional freshness predicate applied to cache reads (SCRAPER_VALIDATE).
    validator: Option<Box<Validator>>,
    metrics: Arc<MetricsSink>,
}

impl HttpFetcher {
    pub fn new(
        limiter: Arc<RateLimiter>,
        cache: Arc<ContentCache>,
        config: FetcherConfig,
        validator: Option<Box<Validator>>,
        metrics: Arc<MetricsSink>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            limiter,
            cache,
            config,
            validator,
            metrics,
        }
    }

    /// Fetch `url` within `deadline`. Cache hits short-circuit when
    /// `allow_cached`; successes are written through with the configured TTL.
    pub async fn fetch(
        &self,
        url: &str,
        deadline: Duration,
        allow_cached: bool,
    ) -> Result<FetchOutcome, FetchError> {
        if allow_cached {
            if let Some(record) = self.cache.get(url, self.validator.as_deref()).await {
                debug!(url, "serving from cache");
                return Ok(FetchOutcome {
                    status: 200,
                    bytes: record.payload,
                    from_cache: true,
                });
            }
        }

        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .ok_or_else(|| FetchError::Network(format!("invalid url: {url}")))?;

        let deadline_at = Instant::now() + deadline;
        let mut last_error = FetchError::ExceededRetries(self.config.max_retries);

        for attempt in 0..=self.config.max_retries {
            self.limiter.acquire(&host, deadline_at).await?;

            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FetchError::Timeout);
            }

            match self.attempt(url, remaining).await {
                Ok((status, etag, bytes)) => {
                    self.metrics.incr("fetcher.success");
                    let record = FetchRecord {
                        url: url.to_string(),
                        fetched_at: Utc::now(),
                        expires_at: Utc::now()
                            + chrono::Duration::from_std(self.config.ttl)
                                .unwrap_or_else(|_| chrono::Duration::hours(6)),
                        etag,
                        content_hash: content_hash(&bytes),
                        payload: bytes.clone(),
                    };
                    if let Err(e) = self.cache.put(&record).await {
                        warn!(url, error = %e, "cache write-through failed");
                    }
                    info!(url, status, bytes = bytes.len(), attempt, "fetched");
                    return Ok(FetchOutcome {
                        status,
                        bytes,
                        from_cache: false,
                    });
                }
                Err((error, retry_after)) => {
                    if !error.retriable() {
                        return Err(error);
                    }
                    self.metrics.incr("fetcher.retries");
                    if let Some(cooldown) = retry_after {
                        self.limiter.apply_cooldown(&host, cooldown).await;
                    }
                    warn!(url, attempt, error = %error, "fetch attempt failed");
                    last_error = error;

                    if attempt < self.config.max_retries {
                        let delay = backoff_delay(self.config.base_delay, attempt);
                        if Instant::now() + delay > deadline_at {
                            return Err(FetchError::Timeout);
                        }
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        debug!(url, error = %last_error, "retries exhausted");
        Err(FetchError::ExceededRetries(self.config.max_retries + 1))
    }

    async fn attempt(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<(u16, Option<String>, Vec<u8>), (FetchError, Option<Duration>)> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    (FetchError::Timeout, None)
                } else {
                    (FetchError::Network(e.to_string()), None)
                }
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err((FetchError::HttpStatus(status), retry_after));
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| (FetchError::Network(e.to_string()), None))?;

        Ok((status, etag, bytes.to_vec()))
    }
}

/// Exponential backoff from `base`, jittered ±25%.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt));
    let jitter = rand::rng().random_range(0.75..=1.25);
    exp.mul_f64(jitter)
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_page(&self, url: &str, allow_cached: bool) -> Result<Vec<u8>, FetchError> {
        let outcome = self
            .fetch(url, self.config.request_deadline, allow_cached)
            .await?;
        Ok(outcome.bytes)
    }
}
