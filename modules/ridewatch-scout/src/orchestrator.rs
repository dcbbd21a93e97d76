//! Per-run wiring: window discovery → ordered fetch → parse → normalize →
//! bounded-concurrency upserts → run report.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Months, Utc};
use futures::stream::{self, StreamExt};
use ridewatch_common::{Event, MetricsSink, RideWatchError, RunOutcome, RunReport};
use ridewatch_fetch::{normalize_html, PageFetcher};
use ridewatch_store::{EventRepository, UpsertOutcome};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::normalizer::EventNormalizer;
use crate::parser::AercParser;

pub const SCRAPE_JOB: &str = "scrape";

#[derive(Clone)]
pub struct OrchestratorConfig {
    pub source: String,
    /// Calendar root, e.g. `https://aerc.org`.
    pub base_url: String,
    /// Concurrent page fetches. Order of results is still page order.
    pub page_concurrency: usize,
    /// Concurrent upserts (identities within a run are distinct).
    pub upsert_concurrency: usize,
    pub run_deadline: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            source: ridewatch_common::AERC_SOURCE.to_string(),
            base_url: "https://aerc.org".to_string(),
            page_concurrency: 2,
            upsert_concurrency: 4,
            run_deadline: Duration::from_secs(15 * 60),
        }
    }
}

pub struct ScrapeOrchestrator {
    fetcher: Arc<dyn PageFetcher>,
    repo: Arc<dyn EventRepository>,
    metrics: Arc<MetricsSink>,
    config: OrchestratorConfig,
}

impl ScrapeOrchestrator {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        repo: Arc<dyn EventRepository>,
        metrics: Arc<MetricsSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            fetcher,
            repo,
            metrics,
            config,
        }
    }

    /// The calendar is paged by half-year season windows; cover the current
    /// window and the next so late-season events appear before their season
    /// starts.
    pub fn discover_pages(&self, now: DateTime<Utc>) -> Vec<String> {
        let window_start = now.date_naive().with_day(1).expect("day 1 always valid");
        let next_window = window_start
            .checked_add_months(Months::new(6))
            .expect("date arithmetic in range");
        [window_start, next_window]
            .iter()
            .map(|start| {
                format!(
                    "{}/calendar?from={}-{:02}&months=6",
                    self.config.base_url,
                    start.year(),
                    start.month()
                )
            })
            .collect()
    }

    /// One full scrape run. Per-page failures skip the page; the run
    /// succeeds if any page produced a valid event, reports `Degraded` on
    /// zero, and `TimedOut` when the run deadline passes between units of
    /// work. The report is persisted before returning.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunReport, RideWatchError> {
        let mut report = RunReport::new(SCRAPE_JOB);
        info!(run_id = %report.run_id, source = %self.config.source, "scrape run starting");

        let deadline = tokio::time::Instant::now() + self.config.run_deadline;
        let pages = self.discover_pages(Utc::now());

        // Fetch concurrently but consume in page order: the normalizer's
        // merge is defined over page order then DOM order.
        let fetcher = self.fetcher.clone();
        let mut fetched_pages = stream::iter(pages.clone())
            .map(|url| {
                let fetcher = fetcher.clone();
                async move {
                    let result = fetcher.fetch_page(&url, true).await;
                    (url, result)
                }
            })
            .buffered(self.config.page_concurrency.max(1));

        let parser = AercParser::new();
        let mut raw_events = Vec::new();

        while let Some((url, result)) = fetched_pages.next().await {
            if cancel.is_cancelled() {
                return self.finish(report, RunOutcome::Failed, Some("cancelled")).await;
            }
            if tokio::time::Instant::now() >= deadline {
                return self.finish(report, RunOutcome::TimedOut, None).await;
            }

            let bytes = match result {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(%url, error = %e, "page fetch failed, skipping");
                    self.metrics.incr("orchestrator.pages_failed");
                    report.record_error(e.code(), e.to_string(), Some(&url));
                    continue;
                }
            };
            report.counts.fetched += 1;

            let normalized = normalize_html(&bytes);
            match parser.parse_page(&normalized) {
                Ok(mut parsed) => {
                    for mut error in parsed.errors.drain(..) {
                        error.page = Some(url.clone());
                        report.errors.push(error);
                    }
                    raw_events.extend(parsed.events);
                }
                Err(e) => {
                    warn!(%url, error = %e, "page structurally unparseable, skipping");
                    self.metrics.incr("orchestrator.pages_failed");
                    report.record_error(e.code(), e.to_string(), Some(&url));
                }
            }
        }

        // Single-task normalize: ordering and merging are deterministic.
        let normalizer = EventNormalizer::new(&self.config.source);
        let output = normalizer.normalize(raw_events);
        report.errors.extend(output.errors);
        report.counts.invalid = output.invalid;
        report.counts.valid = output.events.len() as u32;
        report.counts.parsed = report.counts.valid + report.counts.invalid;
        report.counts.canceled = output.events.iter().filter(|e| e.is_canceled).count() as u32;

        if tokio::time::Instant::now() >= deadline {
            return self.finish(report, RunOutcome::TimedOut, None).await;
        }
        if cancel.is_cancelled() {
            return self.finish(report, RunOutcome::Failed, Some("cancelled")).await;
        }

        // Identities are distinct after normalization, so upserts may
        // reorder freely. Each upsert is all-or-nothing in the store.
        let repo = self.repo.clone();
        let results: Vec<(Event, Result<UpsertOutcome, RideWatchError>)> =
            stream::iter(output.events)
                .map(|event| {
                    let repo = repo.clone();
                    async move {
                        let result = repo.upsert(&event).await;
                        (event, result)
                    }
                })
                .buffer_unordered(self.config.upsert_concurrency.max(1))
                .collect()
                .await;

        for (event, result) in results {
            match result {
                Ok(UpsertOutcome::Inserted) => report.counts.inserted += 1,
                Ok(UpsertOutcome::Updated) => report.counts.updated += 1,
                Ok(UpsertOutcome::Unchanged) => report.counts.skipped += 1,
                Err(e) => {
                    report.counts.skipped += 1;
                    report.record_error(
                        e.code(),
                        format!("upsert {} ({}): {e}", event.name, event.ride_id),
                        None,
                    );
                }
            }
        }

        let outcome = if report.counts.valid == 0 {
            RunOutcome::Degraded
        } else {
            RunOutcome::Succeeded
        };
        self.finish(report, outcome, None).await
    }

    async fn finish(
        &self,
        mut report: RunReport,
        outcome: RunOutcome,
        note: Option<&str>,
    ) -> Result<RunReport, RideWatchError> {
        report.outcome = outcome;
        report.ended_at = Some(Utc::now());
        if let Some(note) = note {
            report.record_error("cancelled", note, None);
        }
        self.metrics
            .incr(&format!("orchestrator.runs_{}", report.outcome));

        // Two consecutive degraded runs alert; one is just a bad day.
        if report.outcome == RunOutcome::Degraded {
            let previous = self
                .repo
                .recent_run_reports(&report.job, 1)
                .await
                .unwrap_or_default();
            if previous
                .first()
                .is_some_and(|p| p.outcome == RunOutcome::Degraded)
            {
                self.metrics.alert(
                    "consecutive_degraded_runs",
                    "two consecutive scrape runs produced zero valid events",
                );
            }
        }

        self.repo.insert_run_report(&report).await?;
        info!(
            run_id = %report.run_id,
            outcome = %report.outcome,
            inserted = report.counts.inserted,
            updated = report.counts.updated,
            skipped = report.counts.skipped,
            invalid = report.counts.invalid,
            "scrape run finished"
        );
        info!(run_id = %report.run_id, counters = ?self.metrics.snapshot(), "run counters");
        Ok(report)
    }
}
