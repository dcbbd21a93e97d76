use std::env;
use std::path::PathBuf;

use crate::error::RideWatchError;

/// Geocoding provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeocodingProvider {
    Nominatim,
    Google,
}

impl std::fmt::Display for GeocodingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeocodingProvider::Nominatim => write!(f, "nominatim"),
            GeocodingProvider::Google => write!(f, "google"),
        }
    }
}

impl std::str::FromStr for GeocodingProvider {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "nominatim" => Ok(Self::Nominatim),
            "google" => Ok(Self::Google),
            other => Err(format!("unknown geocoding provider: {other}")),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Store
    pub database_url: String,

    // Providers
    pub gemini_api_key: String,
    pub geocoding_api_key: String,
    pub geocoding_provider: GeocodingProvider,
    /// Required when the provider is nominatim (their usage policy).
    pub geocoding_user_agent: Option<String>,

    // Rate limiter
    pub requests_per_second: f64,
    pub burst: u32,

    // Fetch retry
    pub max_retries: u32,
    pub base_delay_ms: u64,

    // Cache freshness
    pub cache_ttl_html_s: u64,
    pub cache_ttl_geocode_s: u64,
    pub cache_dir: PathBuf,

    // Scraper behavior flags
    pub scraper_debug: bool,
    pub scraper_refresh: bool,
    pub scraper_validate: bool,

    // Schedules (cron, validated when the scheduler registers the jobs)
    pub scrape_schedule: String,
    pub enrichment_schedule: String,
}

impl Config {
    /// Load configuration from environment variables. Missing or malformed
    /// required values are a `Config` error, which the CLI maps to exit
    /// code 1.
    pub fn from_env() -> Result<Self, RideWatchError> {
        let geocoding_provider: GeocodingProvider =
            env::var("GEOCODING_PROVIDER")
                .unwrap_or_else(|_| "nominatim".to_string())
                .parse()
                .map_err(RideWatchError::Config)?;

        let geocoding_user_agent = env::var("GEOCODING_USER_AGENT").ok();
        if geocoding_provider == GeocodingProvider::Nominatim && geocoding_user_agent.is_none() {
            return Err(RideWatchError::Config(
                "GEOCODING_USER_AGENT is required when GEOCODING_PROVIDER=nominatim".into(),
            ));
        }

        Ok(Self {
            database_url: required_env("DATABASE_URL")?,
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            geocoding_api_key: env::var("GEOCODING_API_KEY").unwrap_or_default(),
            geocoding_provider,
            geocoding_user_agent,
            requests_per_second: parsed_env("REQUESTS_PER_SECOND", 1.0)?,
            burst: parsed_env("BURST", 3)?,
            max_retries: parsed_env("MAX_RETRIES", 3)?,
            base_delay_ms: parsed_env("BASE_DELAY_MS", 500)?,
            cache_ttl_html_s: parsed_env("CACHE_TTL_HTML_S", 6 * 3600)?,
            cache_ttl_geocode_s: parsed_env("CACHE_TTL_GEOCODE_S", 21 * 24 * 3600)?,
            cache_dir: env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./cache")),
            scraper_debug: flag_env("SCRAPER_DEBUG"),
            scraper_refresh: flag_env("SCRAPER_REFRESH"),
            scraper_validate: flag_env("SCRAPER_VALIDATE"),
            scrape_schedule: env::var("SCRAPE_SCHEDULE")
                .unwrap_or_else(|_| "0 0 6 * * *".to_string()),
            enrichment_schedule: env::var("ENRICHMENT_SCHEDULE")
                .unwrap_or_else(|_| "0 30 7 * * *".to_string()),
        })
    }

    /// Log credential presence as lengths, never values.
    pub fn log_redacted(&self) {
        let vars = [
            ("DATABASE_URL", &self.database_url),
            ("GEMINI_API_KEY", &self.gemini_api_key),
            ("GEOCODING_API_KEY", &self.geocoding_api_key),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
        tracing::info!(
            provider = %self.geocoding_provider,
            rps = self.requests_per_second,
            burst = self.burst,
            "geocoding/limiter configuration"
        );
    }
}

fn required_env(key: &str) -> Result<String, RideWatchError> {
    env::var(key).map_err(|_| RideWatchError::Config(format!("{key} is required")))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, RideWatchError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| RideWatchError::Config(format!("{key} is not a valid number: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn flag_env(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_round_trips() {
        assert_eq!(
            "nominatim".parse::<GeocodingProvider>().unwrap(),
            GeocodingProvider::Nominatim
        );
        assert_eq!(
            "google".parse::<GeocodingProvider>().unwrap(),
            GeocodingProvider::Google
        );
        assert!("mapquest".parse::<GeocodingProvider>().is_err());
        assert_eq!(GeocodingProvider::Google.to_string(), "google");
    }
}
