//! Batch + on-demand geocoding worker. Fills coordinates for events that
//! have never been attempted, with per-provider caching and the
//! retriable/permanent failure split.

use std::sync::Arc;
use std::time::Duration;

use ridewatch_common::{Event, MetricsSink, RideWatchError};
use ridewatch_store::EventRepository;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::geocache::GeocodeCache;
use crate::traits::Geocoder;

/// Queue message from the read side: an event's location changed, so its
/// geocoding state resets to Unattempted and it gets re-geocoded now.
#[derive(Debug, Clone)]
pub struct LocationChanged {
    pub event_id: Uuid,
}

#[derive(Clone)]
pub struct GeocodeWorkerConfig {
    pub max_retries: u32,
    pub retry_base: Duration,
    pub deadline: Duration,
}

impl Default for GeocodeWorkerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base: Duration::from_millis(500),
            deadline: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default)]
pub struct GeocodeSummary {
    pub attempted: u32,
    pub geocoded: u32,
    pub unknown: u32,
    /// Retriable failures left for the next batch.
    pub deferred: u32,
    pub cache_hits: u32,
}

impl std::fmt::Display for GeocodeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Geocode Batch Complete ===")?;
        writeln!(f, "Attempted:  {}", self.attempted)?;
        writeln!(f, "Geocoded:   {}", self.geocoded)?;
        writeln!(f, "Unknown:    {}", self.unknown)?;
        writeln!(f, "Deferred:   {}", self.deferred)?;
        writeln!(f, "Cache hits: {}", self.cache_hits)?;
        Ok(())
    }
}

/// Derive the provider query from an event's location fields: structured
/// address when the parser produced one, free text otherwise, lightly
/// canonicalized so cache keys collapse.
pub fn canonical_query(event: &Event) -> Option<String> {
    let raw = match (&event.city, &event.state) {
        (Some(city), Some(state)) => {
            let country = event.country.as_deref().unwrap_or("");
            format!("{city}, {state}, {country}")
        }
        _ => event.location.clone()?,
    };
    let collapsed = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let trimmed = collapsed.trim_matches([',', ' ']).to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub struct GeocodeWorker {
    repo: Arc<dyn EventRepository>,
    geocoder: Arc<dyn Geocoder>,
    cache: GeocodeCache,
    metrics: Arc<MetricsSink>,
    config: GeocodeWorkerConfig,
}

impl GeocodeWorker {
    pub fn new(
        repo: Arc<dyn EventRepository>,
        geocoder: Arc<dyn Geocoder>,
        cache: GeocodeCache,
        metrics: Arc<MetricsSink>,
        config: GeocodeWorkerConfig,
    ) -> Self {
        Self {
            repo,
            geocoder,
            cache,
            metrics,
            config,
        }
    }

    /// Geocode every unattempted event (bounded by `limit`).
    pub async fn run_batch(&self, limit: Option<u32>) -> Result<GeocodeSummary, RideWatchError> {
        let events = self.repo.list_for_geocoding(limit).await?;
        info!(count = events.len(), provider = self.geocoder.name(), "geocode batch starting");

        let mut summary = GeocodeSummary::default();
        for event in events {
            summary.attempted += 1;
            self.geocode_event(&event, &mut summary).await?;
        }

        info!(
            geocoded = summary.geocoded,
            unknown = summary.unknown,
            deferred = summary.deferred,
            "geocode batch finished"
        );
        Ok(summary)
    }

    /// Consume location-changed messages on top of the batch schedule.
    pub async fn run_queue(&self, mut rx: mpsc::Receiver<LocationChanged>) {
        while let Some(message) = rx.recv().await {
            if let Err(e) = self.handle_trigger(&message).await {
                warn!(event_id = %message.event_id, error = %e, "location-changed handling failed");
            }
        }
    }

    /// A location change resets the state machine to Unattempted, then
    /// re-geocodes immediately.
    pub async fn handle_trigger(&self, message: &LocationChanged) -> Result<(), RideWatchError> {
        self.repo.reset_geocoding(message.event_id).await?;
        let Some(event) = self.repo.get_by_id(message.event_id).await? else {
            warn!(event_id = %message.event_id, "location-changed for unknown event");
            return Ok(());
        };
        let mut summary = GeocodeSummary::default();
        self.geocode_event(&event, &mut summary).await
    }

    async fn geocode_event(
        &self,
        event: &Event,
        summary: &mut GeocodeSummary,
    ) -> Result<(), RideWatchError> {
        let Some(query) = canonical_query(event) else {
            // Nothing to ask the provider; attempted with unknown
            // coordinates, rendered downstream as "approximate".
            debug!(ride_id = %event.ride_id, "no usable location, marking unknown");
            self.repo.mark_geocoded(event.id, None, None).await?;
            summary.unknown += 1;
            return Ok(());
        };

        if let Some(record) = self.cache.get(&query).await {
            summary.cache_hits += 1;
            self.metrics.incr("geocode.cache_hits");
            if record.negative {
                self.repo.mark_geocoded(event.id, None, None).await?;
                summary.unknown += 1;
            } else {
                self.repo
                    .mark_geocoded(event.id, record.lat, record.lng)
                    .await?;
                summary.geocoded += 1;
            }
            return Ok(());
        }

        match self.call_with_retries(&query).await {
            Ok((lat, lng)) => {
                self.cache.put_positive(&query, lat, lng).await;
                self.repo.mark_geocoded(event.id, Some(lat), Some(lng)).await?;
                self.metrics.incr("geocode.success");
                summary.geocoded += 1;
            }
            Err(e) if e.retriable() => {
                // Leave geocoding_attempted = false; the next batch retries.
                warn!(%query, error = %e, "geocode deferred after retriable failures");
                self.metrics.incr("geocode.deferred");
                summary.deferred += 1;
            }
            Err(e) => {
                debug!(%query, error = %e, "permanent geocode failure");
                self.cache.put_negative(&query).await;
                self.repo.mark_geocoded(event.id, None, None).await?;
                self.metrics.incr(&format!("geocode.{}", e.code()));
                summary.unknown += 1;
            }
        }
        Ok(())
    }

    async fn call_with_retries(
        &self,
        query: &str,
    ) -> Result<(f64, f64), crate::error::GeocoderError> {
        let mut last_error = crate::error::GeocoderError::Timeout;
        for attempt in 0..=self.config.max_retries {
            match self.geocoder.geocode(query, self.config.deadline).await {
                Ok(coords) => return Ok(coords),
                Err(e) if e.retriable() => {
                    last_error = e;
                    if attempt < self.config.max_retries {
                        let delay = self.config.retry_base * 2u32.saturating_pow(attempt);
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }
}
