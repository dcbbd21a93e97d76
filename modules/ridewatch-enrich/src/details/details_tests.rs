use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use ridewatch_common::{Event, MetricsSink, AERC_SOURCE};
use ridewatch_fetch::{FetchError, PageFetcher};
use ridewatch_store::testing::InMemoryRepository;
use ridewatch_store::EventRepository;
use uuid::Uuid;

use super::{DetailEnrichmentWorker, DetailWorkerConfig};
use crate::error::DetailExtractorError;
use crate::traits::{DetailExtractor, ExtractHints, ExtractedDetails};

struct MockFetcher {
    body: Vec<u8>,
    calls: AtomicU32,
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch_page(&self, _url: &str, _allow_cached: bool) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.body.clone())
    }
}

struct MockExtractor {
    result: Mutex<Vec<Result<ExtractedDetails, DetailExtractorError>>>,
    seen_hints: Mutex<Vec<ExtractHints>>,
}

impl MockExtractor {
    fn returning(results: Vec<Result<ExtractedDetails, DetailExtractorError>>) -> Self {
        Self {
            result: Mutex::new(results),
            seen_hints: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DetailExtractor for MockExtractor {
    async fn extract(
        &self,
        _text: &str,
        hints: &ExtractHints,
    ) -> Result<ExtractedDetails, DetailExtractorError> {
        self.seen_hints.lock().unwrap().push(hints.clone());
        self.result
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Ok(ExtractedDetails::default()))
    }
}

fn upcoming_event(ride_id: &str) -> Event {
    let now = Utc::now();
    let start = now.date_naive() + Duration::days(30);
    Event {
        id: Uuid::new_v4(),
        source: AERC_SOURCE.to_string(),
        ride_id: ride_id.to_string(),
        name: "Old Pueblo".to_string(),
        description: None,
        date_start: start,
        date_end: start,
        location: Some("Sonoita, AZ".to_string()),
        city: None,
        state: None,
        country: None,
        organization: None,
        distances: Vec::new(),
        ride_manager: None,
        manager_email: None,
        manager_phone: None,
        website_url: Some("https://oldpueblo.example.com".to_string()),
        flyer_url: None,
        map_link: None,
        control_judges: Vec::new(),
        is_multi_day_event: false,
        is_pioneer_ride: false,
        ride_days: 1,
        has_intro_ride: false,
        is_canceled: false,
        latitude: None,
        longitude: None,
        geocoding_attempted: false,
        last_website_check_at: None,
        event_details: serde_json::Map::new(),
        notes: None,
        created_at: now,
        updated_at: now,
    }
}

fn worker(
    repo: Arc<InMemoryRepository>,
    fetcher: Arc<MockFetcher>,
    extractor: Arc<MockExtractor>,
) -> DetailEnrichmentWorker {
    DetailEnrichmentWorker::new(
        repo,
        fetcher,
        extractor,
        Arc::new(MetricsSink::new()),
        DetailWorkerConfig {
            batch_size: 2,
            extract_concurrency: 2,
        },
    )
}

fn page_fetcher(body: &str) -> Arc<MockFetcher> {
    Arc::new(MockFetcher {
        body: body.as_bytes().to_vec(),
        calls: AtomicU32::new(0),
    })
}

#[tokio::test]
async fn enriches_and_stamps_check_time() {
    let repo = Arc::new(InMemoryRepository::new());
    repo.insert_fixture(upcoming_event("1"));
    let extractor = Arc::new(MockExtractor::returning(vec![Ok(ExtractedDetails {
        directions: Some("I-10 exit 281, 4mi south".to_string()),
        amenities: vec!["water".to_string()],
        ..Default::default()
    })]));

    let summary = worker(
        repo.clone(),
        page_fetcher("<html><body>Ride info</body></html>"),
        extractor.clone(),
    )
    .run_batch(None)
    .await
    .unwrap();

    assert_eq!(summary.checked, 1);
    assert_eq!(summary.enriched, 1);

    let stored = repo.get(AERC_SOURCE, "1").await.unwrap().unwrap();
    assert!(stored.last_website_check_at.is_some());
    assert_eq!(
        stored.event_details.get("directions"),
        Some(&serde_json::json!("I-10 exit 281, 4mi south"))
    );
    assert_eq!(
        stored.event_details.get("amenities"),
        Some(&serde_json::json!(["water"]))
    );

    // The extractor saw the event context.
    let hints = extractor.seen_hints.lock().unwrap();
    assert_eq!(hints[0].event_name, "Old Pueblo");
    assert_eq!(hints[0].location.as_deref(), Some("Sonoita, AZ"));
}

#[tokio::test]
async fn empty_extraction_still_advances_cadence() {
    let repo = Arc::new(InMemoryRepository::new());
    repo.insert_fixture(upcoming_event("1"));
    let extractor = Arc::new(MockExtractor::returning(vec![Ok(
        ExtractedDetails::default(),
    )]));

    let summary = worker(repo.clone(), page_fetcher("<html></html>"), extractor)
        .run_batch(None)
        .await
        .unwrap();

    assert_eq!(summary.empty, 1);
    let stored = repo.get(AERC_SOURCE, "1").await.unwrap().unwrap();
    assert!(stored.last_website_check_at.is_some());
    assert!(stored.event_details.is_empty());
}

#[tokio::test]
async fn one_failure_never_fails_the_batch() {
    let repo = Arc::new(InMemoryRepository::new());
    repo.insert_fixture(upcoming_event("1"));
    repo.insert_fixture(upcoming_event("2"));
    // Results pop from the back: first extract errors, second succeeds.
    let extractor = Arc::new(MockExtractor::returning(vec![
        Ok(ExtractedDetails {
            camping: Some("dry camping on site".to_string()),
            ..Default::default()
        }),
        Err(DetailExtractorError::Malformed("not json".to_string())),
    ]));

    let summary = worker(repo.clone(), page_fetcher("<html>x</html>"), extractor)
        .run_batch(None)
        .await
        .unwrap();

    assert_eq!(summary.checked, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.enriched, 1);
}

#[tokio::test]
async fn respects_cadence_filter() {
    let repo = Arc::new(InMemoryRepository::new());
    let mut checked_recently = upcoming_event("1");
    checked_recently.last_website_check_at = Some(Utc::now() - Duration::hours(1));
    repo.insert_fixture(checked_recently);

    let fetcher = page_fetcher("<html>x</html>");
    let summary = worker(
        repo,
        fetcher.clone(),
        Arc::new(MockExtractor::returning(vec![])),
    )
    .run_batch(None)
    .await
    .unwrap();

    assert_eq!(summary.checked, 0);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn excludes_long_past_events() {
    let repo = Arc::new(InMemoryRepository::new());
    let mut past = upcoming_event("1");
    past.date_start = Utc::now().date_naive() - Duration::days(90);
    past.date_end = past.date_start;
    repo.insert_fixture(past);

    let summary = worker(
        repo,
        page_fetcher("<html>x</html>"),
        Arc::new(MockExtractor::returning(vec![])),
    )
    .run_batch(None)
    .await
    .unwrap();

    assert_eq!(summary.checked, 0);
}

#[tokio::test]
async fn flyer_text_appended_when_present() {
    let repo = Arc::new(InMemoryRepository::new());
    let mut with_flyer = upcoming_event("1");
    with_flyer.flyer_url = Some("https://oldpueblo.example.com/flyer".to_string());
    repo.insert_fixture(with_flyer);

    let fetcher = page_fetcher("<html>body text</html>");
    let summary = worker(
        repo,
        fetcher.clone(),
        Arc::new(MockExtractor::returning(vec![Ok(ExtractedDetails::default())])),
    )
    .run_batch(None)
    .await
    .unwrap();

    assert_eq!(summary.checked, 1);
    // Website + flyer.
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn pdf_payload_yields_empty_text() {
    let repo = Arc::new(InMemoryRepository::new());
    repo.insert_fixture(upcoming_event("1"));
    let extractor = Arc::new(MockExtractor::returning(vec![Ok(
        ExtractedDetails::default(),
    )]));

    let fetcher = Arc::new(MockFetcher {
        body: b"%PDF-1.7 binary soup".to_vec(),
        calls: AtomicU32::new(0),
    });
    worker(repo, fetcher, extractor.clone())
        .run_batch(None)
        .await
        .unwrap();

    // The extractor never sees binary soup, just the empty placeholder.
    assert_eq!(extractor.seen_hints.lock().unwrap().len(), 1);
}
