//! OpenStreetMap Nominatim geocoder. Their usage policy requires an
//! identifying User-Agent and modest request rates; the worker's cache and
//! the process-wide limiter keep us well inside it.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::GeocoderError;
use crate::traits::Geocoder;

const DEFAULT_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";

pub struct NominatimGeocoder {
    client: reqwest::Client,
    endpoint: String,
    user_agent: String,
}

impl NominatimGeocoder {
    pub fn new(user_agent: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            user_agent: user_agent.to_string(),
        }
    }

    /// Point the client at a different endpoint (tests).
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(
        &self,
        query: &str,
        deadline: Duration,
    ) -> Result<(f64, f64), GeocoderError> {
        info!(query, provider = "nominatim", "geocoding");

        let request = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .timeout(deadline);

        let response = request.send().await.map_err(|e| {
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

        let results = data.as_array().cloned().unwrap_or_default();
        let Some(first) = results.first() else {
            return Err(GeocoderError::NotFound);
        };

        let lat = first["lat"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| GeocoderError::Provider("missing lat".to_string()))?;
        let lng = first["lon"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| GeocoderError::Provider("missing lon".to_string()))?;

        info!(query, lat, lng, "geocoded");
        Ok((lat, lng))
    }

    fn name(&self) -> &'static str {
        "nominatim"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_result_list() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"[{"lat": "31.6773", "lon": "-110.6517", "display_name": "Sonoita"}]"#)
            .create_async()
            .await;

        let geocoder =
            NominatimGeocoder::new("ridewatch-test/0.1").with_endpoint(&server.url());
        let (lat, lng) = geocoder
            .geocode("sonoita, az, usa", Duration::from_secs(2))
            .await
            .unwrap();
        assert!((lat - 31.6773).abs() < 1e-9);
        assert!((lng - -110.6517).abs() < 1e-9);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn empty_list_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let geocoder = NominatimGeocoder::new("ridewatch-test/0.1").with_endpoint(&server.url());
        let err = geocoder
            .geocode("nowhere", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, GeocoderError::NotFound));
    }

    #[tokio::test]
    async fn server_error_is_retriable_transport() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let geocoder = NominatimGeocoder::new("ridewatch-test/0.1").with_endpoint(&server.url());
        let err = geocoder
            .geocode("sonoita", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.retriable());
    }

    #[tokio::test]
    async fn forbidden_is_permanent_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", mockito::Matcher::Any)
            .with_status(403)
            .create_async()
            .await;

        let geocoder = NominatimGeocoder::new("ridewatch-test/0.1").with_endpoint(&server.url());
        let err = geocoder
            .geocode("sonoita", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, GeocoderError::Provider(_)));
        assert!(!err.retriable());
    }
}
