use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ridewatch_common::{Event, RideWatchError, RunReport};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Identical to the stored record; `updated_at` was not touched.
    Unchanged,
}

/// The store seam. The scrape orchestrator and both enrichment workers
/// depend on this trait, never on Postgres directly, so their behavior is
/// testable against the in-memory implementation in `testing`.
///
/// Every operation is transactional at single-event granularity; concurrent
/// upserts for the same identity serialize inside the implementation.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Insert or update by (`source`, `ride_id`) with the reconciliation
    /// rules in `reconcile`: stored non-null values survive scraped nulls,
    /// details deep-merge scraped-wins, cancellation follows the sticky
    /// state machine.
    async fn upsert(&self, event: &Event) -> Result<UpsertOutcome, RideWatchError>;

    async fn get(&self, source: &str, ride_id: &str) -> Result<Option<Event>, RideWatchError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Event>, RideWatchError>;

    /// Events that have never been through the geocoder.
    async fn list_for_geocoding(&self, limit: Option<u32>) -> Result<Vec<Event>, RideWatchError>;

    /// Candidate events for detail enrichment: not past `date_end + 30d`,
    /// with a website to check. The worker applies the precise tier cadence
    /// on top of this prefilter.
    async fn list_for_detail_enrichment(
        &self,
        now: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<Vec<Event>, RideWatchError>;

    /// Events within `radius_mi` of a point (haversine).
    async fn list_by_location(
        &self,
        lat: f64,
        lng: f64,
        radius_mi: f64,
    ) -> Result<Vec<Event>, RideWatchError>;

    /// Record a geocoding attempt. Coordinates present → AttemptedKnown;
    /// absent → AttemptedUnknown (rendered as "approximate" downstream).
    async fn mark_geocoded(
        &self,
        id: Uuid,
        lat: Option<f64>,
        lng: Option<f64>,
    ) -> Result<(), RideWatchError>;

    /// Return an event to the Unattempted geocoding state (location changed).
    async fn reset_geocoding(&self, id: Uuid) -> Result<(), RideWatchError>;

    /// Merge an enrichment patch into `event_details` (patch wins on
    /// conflict) and stamp `last_website_check_at`.
    async fn update_details(
        &self,
        id: Uuid,
        patch: &serde_json::Map<String, serde_json::Value>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), RideWatchError>;

    async fn insert_run_report(&self, report: &RunReport) -> Result<(), RideWatchError>;

    /// Most recent reports for a job, newest first.
    async fn recent_run_reports(
        &self,
        job: &str,
        limit: u32,
    ) -> Result<Vec<RunReport>, RideWatchError>;
}
