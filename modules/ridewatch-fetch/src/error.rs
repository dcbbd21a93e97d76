use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("retries exceeded after {0} attempts")]
    ExceededRetries(u32),

    #[error("cache error: {0}")]
    Cache(String),
}

impl FetchError {
    /// Stable error code for log dashboards.
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::Timeout => "fetch_timeout",
            FetchError::Network(_) => "fetch_network",
            FetchError::HttpStatus(_) => "fetch_http_status",
            FetchError::ExceededRetries(_) => "fetch_retries_exceeded",
            FetchError::Cache(_) => "fetch_cache",
        }
    }

    /// Whether the fetcher should try again: network trouble, 5xx, and 429.
    /// Every other 4xx is the caller's problem.
    pub fn retriable(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Network(_) => true,
            FetchError::HttpStatus(status) => *status == 429 || *status >= 500,
            FetchError::ExceededRetries(_) | FetchError::Cache(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classification() {
        assert!(FetchError::Timeout.retriable());
        assert!(FetchError::Network("reset".into()).retriable());
        assert!(FetchError::HttpStatus(429).retriable());
        assert!(FetchError::HttpStatus(503).retriable());
        assert!(!FetchError::HttpStatus(404).retriable());
        assert!(!FetchError::HttpStatus(403).retriable());
        assert!(!FetchError::ExceededRetries(3).retriable());
    }
}
