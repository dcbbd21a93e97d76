//! In-memory repository for worker and orchestrator tests. Shares the
//! reconciliation logic with the Postgres implementation so upsert semantics
//! match.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ridewatch_common::{haversine_mi, Event, RideWatchError, RunReport};
use uuid::Uuid;

use crate::reconcile::{deep_merge, reconcile, MergePrecedence};
use crate::repository::{EventRepository, UpsertOutcome};

#[derive(Default)]
pub struct InMemoryRepository {
    events: Mutex<HashMap<(String, String), Event>>,
    reports: Mutex<Vec<RunReport>>,
    /// When set, every upsert fails with a repository error.
    pub fail_upserts: std::sync::atomic::AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn all_events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self.events.lock().unwrap().values().cloned().collect();
        events.sort_by(|a, b| a.ride_id.cmp(&b.ride_id));
        events
    }

    pub fn insert_fixture(&self, event: Event) {
        self.events
            .lock()
            .unwrap()
            .insert((event.source.clone(), event.ride_id.clone()), event);
    }

    pub fn reports(&self) -> Vec<RunReport> {
        self.reports.lock().unwrap().clone()
    }

    fn find_by_id(&self, id: Uuid) -> Option<Event> {
        self.events
            .lock()
            .unwrap()
            .values()
            .find(|e| e.id == id)
            .cloned()
    }
}

#[async_trait]
impl EventRepository for InMemoryRepository {
    async fn upsert(&self, event: &Event) -> Result<UpsertOutcome, RideWatchError> {
        if self.fail_upserts.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(RideWatchError::Repository("injected failure".into()));
        }
        let key = (event.source.clone(), event.ride_id.clone());
        let mut events = self.events.lock().unwrap();
        match events.get(&key) {
            None => {
                events.insert(key, event.clone());
                Ok(UpsertOutcome::Inserted)
            }
            Some(stored) => {
                let merged = reconcile(stored, event);
                if !merged.changed {
                    return Ok(UpsertOutcome::Unchanged);
                }
                let mut updated = merged.event;
                updated.updated_at = Utc::now();
                events.insert(key, updated);
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    async fn get(&self, source: &str, ride_id: &str) -> Result<Option<Event>, RideWatchError> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .get(&(source.to_string(), ride_id.to_string()))
            .cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Event>, RideWatchError> {
        Ok(self.find_by_id(id))
    }

    async fn list_for_geocoding(&self, limit: Option<u32>) -> Result<Vec<Event>, RideWatchError> {
        let mut events: Vec<Event> = self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|e| !e.geocoding_attempted)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.date_start);
        if let Some(limit) = limit {
            events.truncate(limit as usize);
        }
        Ok(events)
    }

    async fn list_for_detail_enrichment(
        &self,
        now: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<Vec<Event>, RideWatchError> {
        let cutoff = now.date_naive() - Duration::days(30);
        let mut events: Vec<Event> = self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.website_url.is_some() && e.date_end >= cutoff)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.last_website_check_at, e.date_start));
        if let Some(limit) = limit {
            events.truncate(limit as usize);
        }
        Ok(events)
    }

    async fn list_by_location(
        &self,
        lat: f64,
        lng: f64,
        radius_mi: f64,
    ) -> Result<Vec<Event>, RideWatchError> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|e| match (e.latitude, e.longitude) {
                (Some(elat), Some(elng)) => haversine_mi(lat, lng, elat, elng) <= radius_mi,
                _ => false,
            })
            .cloned()
            .collect())
    }

    async fn mark_geocoded(
        &self,
        id: Uuid,
        lat: Option<f64>,
        lng: Option<f64>,
    ) -> Result<(), RideWatchError> {
        let mut events = self.events.lock().unwrap();
        for event in events.values_mut() {
            if event.id == id {
                event.geocoding_attempted = true;
                event.latitude = lat;
                event.longitude = lng;
                event.updated_at = Utc::now();
                return Ok(());
            }
        }
        Err(RideWatchError::Repository(format!("no event with id {id}")))
    }

    async fn reset_geocoding(&self, id: Uuid) -> Result<(), RideWatchError> {
        let mut events = self.events.lock().unwrap();
        for event in events.values_mut() {
            if event.id == id {
                event.geocoding_attempted = false;
                event.latitude = None;
                event.longitude = None;
                event.updated_at = Utc::now();
                return Ok(());
            }
        }
        Err(RideWatchError::Repository(format!("no event with id {id}")))
    }

    async fn update_details(
        &self,
        id: Uuid,
        patch: &serde_json::Map<String, serde_json::Value>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), RideWatchError> {
        let mut events = self.events.lock().unwrap();
        for event in events.values_mut() {
            if event.id == id {
                deep_merge(&mut event.event_details, patch, MergePrecedence::PatchWins);
                event.last_website_check_at = Some(checked_at);
                event.updated_at = Utc::now();
                return Ok(());
            }
        }
        Err(RideWatchError::Repository(format!("no event with id {id}")))
    }

    async fn insert_run_report(&self, report: &RunReport) -> Result<(), RideWatchError> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }

    async fn recent_run_reports(
        &self,
        job: &str,
        limit: u32,
    ) -> Result<Vec<RunReport>, RideWatchError> {
        let mut reports: Vec<RunReport> = self
            .reports
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.job == job)
            .cloned()
            .collect();
        reports.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        reports.truncate(limit as usize);
        Ok(reports)
    }
}
