//! Google Geocoding API client.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::GeocoderError;
use crate::traits::Geocoder;

const DEFAULT_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";

pub struct GoogleGeocoder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GoogleGeocoder {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Point the client at a different endpoint (tests).
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn geocode(
        &self,
        query: &str,
        deadline: Duration,
    ) -> Result<(f64, f64), GeocoderError> {
        info!(query, provider = "google", "geocoding");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("address", query), ("key", &self.api_key)])
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GeocoderError::Timeout
                } else {
                    GeocoderError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(GeocoderError::Transport(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(GeocoderError::Provider(format!("HTTP {status}")));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GeocoderError::Transport(e.to_string()))?;

        match data["status"].as_str().unwrap_or("") {
            "OK" => {}
            "ZERO_RESULTS" => return Err(GeocoderError::NotFound),
            "OVER_QUERY_LIMIT" => {
                return Err(GeocoderError::Transport("over query limit".to_string()))
            }
            other => return Err(GeocoderError::Provider(other.to_string())),
        }

        let results = data["results"].as_array().cloned().unwrap_or_default();
        let Some(first) = results.first() else {
            return Err(GeocoderError::NotFound);
        };

        // Several partial matches means the provider guessed; record the
        // ambiguity instead of picking one.
        if results.len() > 1 && first["partial_match"].as_bool().unwrap_or(false) {
            return Err(GeocoderError::AmbiguousResult);
        }

        let location = &first["geometry"]["location"];
        let lat = location["lat"]
            .as_f64()
            .ok_or_else(|| GeocoderError::Provider("missing lat".to_string()))?;
        let lng = location["lng"]
            .as_f64()
            .ok_or_else(|| GeocoderError::Provider("missing lng".to_string()))?;

        info!(query, lat, lng, "geocoded");
        Ok((lat, lng))
    }

    fn name(&self) -> &'static str {
        "google"
    }
}
