pub mod cache;
pub mod error;
pub mod fetcher;
pub mod limiter;
pub mod normalize;
pub mod urlnorm;

pub use cache::{ContentCache, FetchRecord, Validator};
pub use error::FetchError;
pub use fetcher::{FetchOutcome, FetcherConfig, HttpFetcher, PageFetcher};
pub use limiter::{RateLimiter, RateLimiterConfig};
pub use normalize::normalize_html;
pub use urlnorm::{cache_key_url, canonical_url};
