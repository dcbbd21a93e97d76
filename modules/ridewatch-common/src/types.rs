use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RideWatchError;

/// Source identifier for the AERC calendar.
pub const AERC_SOURCE: &str = "AERC";

// --- Event aggregate ---

/// One distance offered on one day of a ride.
/// Multi-day rides deliberately repeat the same label with different dates,
/// so tuple equality (not label equality) defines a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distance {
    pub label: String,
    pub date: Option<NaiveDate>,
    pub start_time: Option<String>,
}

/// A control judge assignment, order-preserving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlJudge {
    pub role: String,
    pub name: String,
}

/// The canonical, source-agnostic event record.
/// Identity is the pair (`source`, `ride_id`), stable across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub source: String,
    pub ride_id: String,
    pub name: String,
    pub description: Option<String>,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    /// Free-text location as the source printed it.
    pub location: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    /// Only set when the parser is confident (recognized state/province code).
    pub country: Option<String>,
    pub organization: Option<String>,
    pub distances: Vec<Distance>,
    pub ride_manager: Option<String>,
    pub manager_email: Option<String>,
    pub manager_phone: Option<String>,
    pub website_url: Option<String>,
    pub flyer_url: Option<String>,
    pub map_link: Option<String>,
    pub control_judges: Vec<ControlJudge>,
    pub is_multi_day_event: bool,
    pub is_pioneer_ride: bool,
    pub ride_days: u32,
    pub has_intro_ride: bool,
    /// Sticky: once observed canceled, stays canceled until the source
    /// explicitly shows the event without a cancellation marker.
    pub is_canceled: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub geocoding_attempted: bool,
    pub last_website_check_at: Option<DateTime<Utc>>,
    /// Open map of source-specific fields. Unknown keys round-trip untouched.
    pub event_details: serde_json::Map<String, serde_json::Value>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Check the record invariants. Events failing this are counted invalid
    /// and never persisted.
    pub fn validate(&self) -> Result<(), RideWatchError> {
        if self.ride_id.is_empty() {
            return Err(RideWatchError::Validation("empty ride_id".into()));
        }
        if self.name.is_empty() {
            return Err(RideWatchError::Validation("empty name".into()));
        }
        if self.date_end < self.date_start {
            return Err(RideWatchError::Validation(format!(
                "date_end {} before date_start {}",
                self.date_end, self.date_start
            )));
        }
        if !self.geocoding_attempted && (self.latitude.is_some() || self.longitude.is_some()) {
            return Err(RideWatchError::Validation(
                "coordinates present without geocoding_attempted".into(),
            ));
        }
        if self.is_pioneer_ride && !(self.is_multi_day_event && self.ride_days >= 3) {
            return Err(RideWatchError::Validation(
                "pioneer ride must span at least 3 days".into(),
            ));
        }
        if let (Some(lat), Some(lng)) = (self.latitude, self.longitude) {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                return Err(RideWatchError::Validation(format!(
                    "coordinates out of range: {lat},{lng}"
                )));
            }
        }
        Ok(())
    }

    /// Distinct distance labels in source order.
    pub fn distance_labels(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for d in &self.distances {
            if !seen.contains(&d.label.as_str()) {
                seen.push(d.label.as_str());
            }
        }
        seen
    }

    // Typed accessors for the event_details keys the system recognizes.
    // Everything else in the map is opaque and preserved on write.

    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.event_details.get(key).and_then(|v| v.as_str())
    }

    pub fn directions(&self) -> Option<&str> {
        self.detail_str("directions")
    }

    pub fn amenities(&self) -> Vec<&str> {
        self.detail_list("amenities")
    }

    pub fn hazards(&self) -> Vec<&str> {
        self.detail_list("hazards")
    }

    pub fn veterinarians(&self) -> Vec<&str> {
        self.detail_list("veterinarians")
    }

    fn detail_list(&self, key: &str) -> Vec<&str> {
        self.event_details
            .get(key)
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}

// --- RawEvent (parser output, one per source row, never persisted) ---

/// What the parser emits for a single calendar row. Everything is optional:
/// missing or ambiguous fields survive to the normalizer, which decides
/// whether the row is usable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEvent {
    pub ride_id: Option<String>,
    pub name: Option<String>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub location: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub organization: Option<String>,
    pub description: Option<String>,
    pub distances: Vec<Distance>,
    pub ride_manager: Option<String>,
    pub manager_email: Option<String>,
    pub manager_phone: Option<String>,
    pub website_url: Option<String>,
    pub flyer_url: Option<String>,
    pub map_link: Option<String>,
    pub control_judges: Vec<ControlJudge>,
    pub is_canceled: bool,
    pub has_intro_ride: bool,
    /// Populated when the map link carries explicit coordinates.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub geocoding_attempted: bool,
    pub event_details: serde_json::Map<String, serde_json::Value>,
    /// Set when the row parsed but failed a contract (e.g. unknown month
    /// token). The row is still emitted so the run report can count it.
    pub invalid_reason: Option<String>,
}

// --- Run reports ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub fetched: u32,
    pub parsed: u32,
    pub valid: u32,
    pub invalid: u32,
    pub inserted: u32,
    pub updated: u32,
    pub skipped: u32,
    pub canceled: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    /// Stable error code for dashboards (`fetch_timeout`, `structural`, ...).
    pub code: String,
    pub message: String,
    pub page: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    /// Run finished but produced zero valid events.
    Degraded,
    TimedOut,
    Failed,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Succeeded => write!(f, "succeeded"),
            RunOutcome::Degraded => write!(f, "degraded"),
            RunOutcome::TimedOut => write!(f, "timed_out"),
            RunOutcome::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunOutcome {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(Self::Succeeded),
            "degraded" => Ok(Self::Degraded),
            "timed_out" => Ok(Self::TimedOut),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown RunOutcome: {other}")),
        }
    }
}

/// Per-invocation record of a scrape or enrichment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: RunOutcome,
    pub counts: RunCounts,
    pub errors: Vec<RunError>,
}

impl RunReport {
    pub fn new(job: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            job: job.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            outcome: RunOutcome::Succeeded,
            counts: RunCounts::default(),
            errors: Vec::new(),
        }
    }

    pub fn record_error(&mut self, code: &str, message: impl Into<String>, page: Option<&str>) {
        self.errors.push(RunError {
            code: code.to_string(),
            message: message.into(),
            page: page.map(|p| p.to_string()),
        });
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Run {} ({}) ===", self.run_id, self.job)?;
        writeln!(f, "Outcome:   {}", self.outcome)?;
        writeln!(f, "Fetched:   {}", self.counts.fetched)?;
        writeln!(f, "Parsed:    {}", self.counts.parsed)?;
        writeln!(f, "Valid:     {}", self.counts.valid)?;
        writeln!(f, "Invalid:   {}", self.counts.invalid)?;
        writeln!(f, "Inserted:  {}", self.counts.inserted)?;
        writeln!(f, "Updated:   {}", self.counts.updated)?;
        writeln!(f, "Skipped:   {}", self.counts.skipped)?;
        writeln!(f, "Canceled:  {}", self.counts.canceled)?;
        if !self.errors.is_empty() {
            writeln!(f, "Errors:    {}", self.errors.len())?;
            for e in &self.errors {
                match &e.page {
                    Some(p) => writeln!(f, "  [{}] {} ({p})", e.code, e.message)?,
                    None => writeln!(f, "  [{}] {}", e.code, e.message)?,
                }
            }
        }
        Ok(())
    }
}

// --- Deterministic hashing and identity synthesis ---

/// Deterministic content hash for cache keys and change detection (FNV-1a).
/// Must be stable across process restarts — `DefaultHasher` is NOT
/// (HashDoS randomization).
pub fn content_hash(content: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325; // FNV offset basis
    for byte in content {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3); // FNV prime
    }
    hash
}

/// Derive a deterministic ride id for rows the source publishes without one.
///
/// Pure and versioned: the `syn1-` prefix names this exact input set and
/// hash. Changing either requires a new prefix so stored identities keep
/// matching.
pub fn synthetic_ride_id(
    source: &str,
    name: &str,
    date_start: Option<NaiveDate>,
    location: Option<&str>,
) -> String {
    let date = date_start.map(|d| d.to_string()).unwrap_or_default();
    let input = format!("{source}|{name}|{date}|{}", location.unwrap_or(""));
    format!("syn1-{:016x}", content_hash(input.as_bytes()))
}

/// Great-circle distance in statute miles between two WGS84 points.
pub fn haversine_mi(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const EARTH_RADIUS_MI: f64 = 3958.8;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MI * a.sqrt().atan2((1.0 - a).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_event() -> Event {
        let now = Utc::now();
        Event {
            id: Uuid::new_v4(),
            source: AERC_SOURCE.to_string(),
            ride_id: "12345".to_string(),
            name: "Old Pueblo".to_string(),
            description: None,
            date_start: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            date_end: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            location: Some("Sonoita, AZ".to_string()),
            city: Some("Sonoita".to_string()),
            state: Some("AZ".to_string()),
            country: Some("USA".to_string()),
            organization: None,
            distances: vec![Distance {
                label: "50".to_string(),
                date: NaiveDate::from_ymd_opt(2024, 3, 15),
                start_time: Some("07:00".to_string()),
            }],
            ride_manager: None,
            manager_email: None,
            manager_phone: None,
            website_url: None,
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

    #[test]
    fn valid_event_passes() {
        assert!(base_event().validate().is_ok());
    }

    #[test]
    fn date_end_before_start_rejected() {
        let mut e = base_event();
        e.date_end = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
        assert!(e.validate().is_err());
    }

    #[test]
    fn coordinates_without_attempt_rejected() {
        let mut e = base_event();
        e.latitude = Some(37.0);
        e.longitude = Some(-122.0);
        assert!(e.validate().is_err());
        e.geocoding_attempted = true;
        assert!(e.validate().is_ok());
    }

    #[test]
    fn pioneer_requires_three_days() {
        let mut e = base_event();
        e.is_pioneer_ride = true;
        assert!(e.validate().is_err());
        e.is_multi_day_event = true;
        e.ride_days = 3;
        e.date_end = NaiveDate::from_ymd_opt(2024, 3, 17).unwrap();
        assert!(e.validate().is_ok());
    }

    #[test]
    fn out_of_range_coordinates_rejected() {
        let mut e = base_event();
        e.geocoding_attempted = true;
        e.latitude = Some(91.0);
        e.longitude = Some(0.0);
        assert!(e.validate().is_err());
    }

    #[test]
    fn distance_labels_deduplicate_preserving_order() {
        let mut e = base_event();
        e.distances = vec![
            Distance {
                label: "25".into(),
                date: NaiveDate::from_ymd_opt(2024, 3, 15),
                start_time: None,
            },
            Distance {
                label: "50".into(),
                date: NaiveDate::from_ymd_opt(2024, 3, 15),
                start_time: None,
            },
            Distance {
                label: "25".into(),
                date: NaiveDate::from_ymd_opt(2024, 3, 16),
                start_time: None,
            },
        ];
        assert_eq!(e.distance_labels(), vec!["25", "50"]);
    }

    #[test]
    fn content_hash_is_stable() {
        // Pinned value: must never change across releases, cache keys depend on it.
        assert_eq!(content_hash(b""), 0xcbf29ce484222325);
        assert_eq!(content_hash(b"a"), content_hash(b"a"));
        assert_ne!(content_hash(b"a"), content_hash(b"b"));
    }

    #[test]
    fn synthetic_id_is_pure_and_versioned() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15);
        let a = synthetic_ride_id("AERC", "Old Pueblo", date, Some("Sonoita, AZ"));
        let b = synthetic_ride_id("AERC", "Old Pueblo", date, Some("Sonoita, AZ"));
        assert_eq!(a, b);
        assert!(a.starts_with("syn1-"));
        let c = synthetic_ride_id("AERC", "Old Pueblo", date, Some("Tucson, AZ"));
        assert_ne!(a, c);
    }

    #[test]
    fn haversine_sf_to_la() {
        // SF to LA is ~347 statute miles
        let dist = haversine_mi(37.7749, -122.4194, 34.0522, -118.2437);
        assert!((dist - 347.0).abs() < 10.0, "expected ~347mi, got {dist}");
    }

    #[test]
    fn haversine_same_point_is_zero() {
        let dist = haversine_mi(44.9778, -93.265, 44.9778, -93.265);
        assert!(dist < 0.001);
    }

    #[test]
    fn unknown_detail_keys_round_trip() {
        let mut e = base_event();
        e.event_details.insert(
            "aerc_sanction_no".to_string(),
            serde_json::json!("2024-SW-118"),
        );
        let json = serde_json::to_string(&e).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.event_details.get("aerc_sanction_no"),
            Some(&serde_json::json!("2024-SW-118"))
        );
    }

    #[test]
    fn run_outcome_round_trips() {
        for o in [
            RunOutcome::Succeeded,
            RunOutcome::Degraded,
            RunOutcome::TimedOut,
            RunOutcome::Failed,
        ] {
            let s = o.to_string();
            assert_eq!(s.parse::<RunOutcome>().unwrap(), o);
        }
    }
}
