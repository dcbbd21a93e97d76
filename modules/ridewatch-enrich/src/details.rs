//! Detail enrichment: fetch each event's website (and flyer when present),
//! flatten to text, hand it to the `DetailExtractor`, and merge the result
//! into `event_details`. Tiered cadence keeps provider spend proportional
//! to how soon the event runs.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use ridewatch_common::{Event, MetricsSink, RideWatchError};
use ridewatch_fetch::PageFetcher;
use ridewatch_store::EventRepository;
use tracing::{debug, info, warn};

use crate::traits::{DetailExtractor, ExtractHints};

/// Extractor input cap; pages are truncated at a char boundary.
const MAX_EXTRACT_CHARS: usize = 30_000;

/// Tier cadence: is this event due for a website check?
///
/// - starts within 90 days → at most every 24h
/// - starts within a year → at most every 7 days
/// - past `date_end` + 30 days → never
/// - never checked → always due
pub fn detail_check_due(event: &Event, now: DateTime<Utc>) -> bool {
    let today = now.date_naive();
    if event.date_end + Duration::days(30) < today {
        return false;
    }
    let Some(last_check) = event.last_website_check_at else {
        return true;
    };

    let days_until_start = (event.date_start - today).num_days();
    let min_gap = if days_until_start <= 90 {
        Duration::hours(24)
    } else if days_until_start <= 365 {
        Duration::days(7)
    } else {
        // Beyond a year out: nothing changes that far ahead.
        return false;
    };
    now - last_check >= min_gap
}

#[derive(Clone)]
pub struct DetailWorkerConfig {
    /// Extractor calls batched together to amortize provider cost.
    pub batch_size: usize,
    pub extract_concurrency: usize,
}

impl Default for DetailWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            extract_concurrency: 3,
        }
    }
}

#[derive(Debug, Default)]
pub struct DetailSummary {
    pub checked: u32,
    pub enriched: u32,
    pub empty: u32,
    pub failed: u32,
}

impl std::fmt::Display for DetailSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Detail Enrichment Complete ===")?;
        writeln!(f, "Checked:  {}", self.checked)?;
        writeln!(f, "Enriched: {}", self.enriched)?;
        writeln!(f, "Empty:    {}", self.empty)?;
        writeln!(f, "Failed:   {}", self.failed)?;
        Ok(())
    }
}

pub struct DetailEnrichmentWorker {
    repo: Arc<dyn EventRepository>,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn DetailExtractor>,
    metrics: Arc<MetricsSink>,
    config: DetailWorkerConfig,
}

impl DetailEnrichmentWorker {
    pub fn new(
        repo: Arc<dyn EventRepository>,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn DetailExtractor>,
        metrics: Arc<MetricsSink>,
        config: DetailWorkerConfig,
    ) -> Self {
        Self {
            repo,
            fetcher,
            extractor,
            metrics,
            config,
        }
    }

    /// Enrich every due event, batching extractor calls. One bad page never
    /// fails its batch.
    pub async fn run_batch(&self, limit: Option<u32>) -> Result<DetailSummary, RideWatchError> {
        let now = Utc::now();
        let candidates = self.repo.list_for_detail_enrichment(now, limit).await?;
        let due: Vec<Event> = candidates
            .into_iter()
            .filter(|e| detail_check_due(e, now))
            .collect();
        info!(count = due.len(), "detail enrichment starting");

        let mut summary = DetailSummary::default();
        for batch in due.chunks(self.config.batch_size.max(1)) {
            let results: Vec<(String, Result<bool, RideWatchError>)> = stream::iter(batch.to_vec())
                .map(|event| async move {
                    let ride_id = event.ride_id.clone();
                    let result = self.enrich_event(event).await;
                    (ride_id, result)
                })
                .buffer_unordered(self.config.extract_concurrency.max(1))
                .collect()
                .await;

            for (ride_id, result) in results {
                summary.checked += 1;
                match result {
                    Ok(true) => summary.enriched += 1,
                    Ok(false) => summary.empty += 1,
                    Err(e) => {
                        warn!(%ride_id, error = %e, "detail enrichment failed for event");
                        self.metrics.incr("details.failed");
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(
            enriched = summary.enriched,
            empty = summary.empty,
            failed = summary.failed,
            "detail enrichment finished"
        );
        Ok(summary)
    }

    /// Returns whether the extractor produced any fields. The check
    /// timestamp advances either way so the cadence holds.
    async fn enrich_event(&self, event: Event) -> Result<bool, RideWatchError> {
        let Some(website_url) = event.website_url.clone() else {
            return Ok(false);
        };

        let mut text = self.fetch_text(&website_url).await.map_err(|e| {
            RideWatchError::Anyhow(anyhow::anyhow!("fetch {website_url}: {e}"))
        })?;

        if let Some(flyer_url) = &event.flyer_url {
            match self.fetch_text(flyer_url).await {
                Ok(flyer_text) => {
                    text.push('\n');
                    text.push_str(&flyer_text);
                }
                Err(e) => {
                    debug!(%flyer_url, error = %e, "flyer fetch failed, continuing with website text");
                }
            }
        }

        let text = truncate_at_char_boundary(&text, MAX_EXTRACT_CHARS);

        let hints = ExtractHints {
            event_name: event.name.clone(),
            location: event.location.clone(),
            date_start: Some(event.date_start),
        };

        let details = self
            .extractor
            .extract(text, &hints)
            .await
            .map_err(|e| RideWatchError::Anyhow(anyhow::anyhow!("extract: {e}")))?;

        let now = Utc::now();
        if details.is_empty() {
            // Still stamp the check so the cadence doesn't hammer the page.
            self.repo
                .update_details(event.id, &serde_json::Map::new(), now)
                .await?;
            return Ok(false);
        }

        self.repo
            .update_details(event.id, &details.to_patch(), now)
            .await?;
        self.metrics.incr("details.enriched");
        Ok(true)
    }

    async fn fetch_text(&self, url: &str) -> Result<String, ridewatch_fetch::FetchError> {
        let bytes = self.fetcher.fetch_page(url, true).await?;
        // Flyers are often PDFs; those need a different extraction path and
        // are skipped rather than garbled.
        if bytes.starts_with(b"%PDF") {
            debug!(url, "skipping PDF payload");
            return Ok(String::new());
        }
        Ok(html2text::from_read(bytes.as_slice(), 120).unwrap_or_default())
    }
}

fn truncate_at_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod details_tests;
