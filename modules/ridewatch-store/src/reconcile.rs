//! Pure upsert reconciliation. The Postgres and in-memory repositories both
//! delegate the stored-vs-scraped merge decision here so the semantics are
//! testable without a database.

use ridewatch_common::Event;
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePrecedence {
    /// Existing value survives a conflicting patch value.
    BaseWins,
    /// Patch value replaces a conflicting existing value.
    PatchWins,
}

/// Result of reconciling a scraped event against the stored record.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub event: Event,
    /// False when the merge produced a record identical to the stored one;
    /// the repository then leaves `updated_at` alone.
    pub changed: bool,
}

/// Merge a freshly scraped event into the stored record.
///
/// Rules:
/// - A non-null stored value is never overwritten by a null scraped value.
/// - Fields the scrape always produces (name, dates, flags, cancellation)
///   take the scraped value — an upsert is an explicit observation of the
///   event, which is exactly the condition under which a true→false
///   cancellation transition is allowed.
/// - `event_details` deep-merges with scraped values winning on conflict,
///   so enrichment-written keys survive scrapes that don't produce them.
/// - Geocoding state is preserved unless the scrape itself carried
///   coordinates (map-link extraction).
pub fn reconcile(stored: &Event, scraped: &Event) -> Reconciled {
    let mut merged = stored.clone();

    merged.name = scraped.name.clone();
    merged.date_start = scraped.date_start;
    merged.date_end = scraped.date_end;
    merged.ride_days = scraped.ride_days;
    merged.is_multi_day_event = scraped.is_multi_day_event;
    merged.is_pioneer_ride = scraped.is_pioneer_ride;
    merged.has_intro_ride = scraped.has_intro_ride;
    if merged.is_canceled != scraped.is_canceled {
        debug!(
            source = %stored.source,
            ride_id = %stored.ride_id,
            from = stored.is_canceled,
            to = scraped.is_canceled,
            "cancellation transition"
        );
        merged.is_canceled = scraped.is_canceled;
    }

    merged.description = scraped.description.clone().or(merged.description);
    merged.location = scraped.location.clone().or(merged.location);
    merged.city = scraped.city.clone().or(merged.city);
    merged.state = scraped.state.clone().or(merged.state);
    merged.country = scraped.country.clone().or(merged.country);
    merged.organization = scraped.organization.clone().or(merged.organization);
    merged.ride_manager = scraped.ride_manager.clone().or(merged.ride_manager);
    merged.manager_email = scraped.manager_email.clone().or(merged.manager_email);
    merged.manager_phone = scraped.manager_phone.clone().or(merged.manager_phone);
    merged.website_url = scraped.website_url.clone().or(merged.website_url);
    merged.flyer_url = scraped.flyer_url.clone().or(merged.flyer_url);
    merged.map_link = scraped.map_link.clone().or(merged.map_link);
    merged.notes = scraped.notes.clone().or(merged.notes);

    if !scraped.distances.is_empty() {
        merged.distances = scraped.distances.clone();
    }
    if !scraped.control_judges.is_empty() {
        merged.control_judges = scraped.control_judges.clone();
    }

    if scraped.geocoding_attempted {
        merged.geocoding_attempted = true;
        merged.latitude = scraped.latitude;
        merged.longitude = scraped.longitude;
    }

    deep_merge(
        &mut merged.event_details,
        &scraped.event_details,
        MergePrecedence::PatchWins,
    );

    let changed = merged != *stored;
    Reconciled {
        event: merged,
        changed,
    }
}

/// Recursive map merge. Nested objects merge key-by-key; scalar and array
/// conflicts resolve per `precedence` and are logged.
pub fn deep_merge(base: &mut Map<String, Value>, patch: &Map<String, Value>, precedence: MergePrecedence) {
    for (key, patch_value) in patch {
        if !base.contains_key(key) {
            base.insert(key.clone(), patch_value.clone());
            continue;
        }
        let base_value = base.get_mut(key).expect("key just checked");
        match (base_value, patch_value) {
            (Value::Object(base_obj), Value::Object(patch_obj)) => {
                deep_merge(base_obj, patch_obj, precedence);
            }
            (base_value, patch_value) => {
                if base_value != patch_value {
                    debug!(%key, "event_details conflict, {:?} wins", precedence);
                    if precedence == MergePrecedence::PatchWins {
                        *base_value = patch_value.clone();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use ridewatch_common::{Distance, AERC_SOURCE};
    use serde_json::json;
    use uuid::Uuid;

    fn event(ride_id: &str) -> Event {
        let now = Utc::now();
        Event {
            id: Uuid::new_v4(),
            source: AERC_SOURCE.to_string(),
            ride_id: ride_id.to_string(),
            name: "Old Pueblo".to_string(),
            description: None,
            date_start: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            date_end: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            location: Some("Sonoita, AZ".to_string()),
            city: None,
            state: None,
            country: None,
            organization: None,
            distances: Vec::new(),
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
    fn scraped_null_never_clears_stored_value() {
        let mut stored = event("1");
        stored.ride_manager = Some("Pat Chappell".to_string());
        stored.website_url = Some("https://oldpueblo.example.com".to_string());
        let scraped = event("1");

        let result = reconcile(&stored, &scraped);
        assert_eq!(result.event.ride_manager.as_deref(), Some("Pat Chappell"));
        assert_eq!(
            result.event.website_url.as_deref(),
            Some("https://oldpueblo.example.com")
        );
    }

    #[test]
    fn scraped_non_null_wins() {
        let mut stored = event("1");
        stored.ride_manager = Some("Old Manager".to_string());
        let mut scraped = event("1");
        scraped.ride_manager = Some("New Manager".to_string());

        let result = reconcile(&stored, &scraped);
        assert!(result.changed);
        assert_eq!(result.event.ride_manager.as_deref(), Some("New Manager"));
    }

    #[test]
    fn identical_scrape_reports_unchanged() {
        let stored = event("1");
        let result = reconcile(&stored, &stored.clone());
        assert!(!result.changed);
    }

    #[test]
    fn cancellation_goes_sticky_then_releases_on_explicit_observation() {
        let stored = event("77");
        let mut canceled = event("77");
        canceled.is_canceled = true;

        // Active → Canceled
        let result = reconcile(&stored, &canceled);
        assert!(result.event.is_canceled);

        // Canceled → Active: the scrape explicitly observed the event
        // without a marker.
        let active_again = event("77");
        let result = reconcile(&result.event, &active_again);
        assert!(!result.event.is_canceled);
    }

    #[test]
    fn geocoding_state_survives_scrapes_without_coordinates() {
        let mut stored = event("1");
        stored.geocoding_attempted = true;
        stored.latitude = Some(31.68);
        stored.longitude = Some(-110.65);
        let scraped = event("1");

        let result = reconcile(&stored, &scraped);
        assert!(result.event.geocoding_attempted);
        assert_eq!(result.event.latitude, Some(31.68));
    }

    #[test]
    fn map_link_coordinates_overwrite() {
        let mut stored = event("1");
        stored.geocoding_attempted = true;
        stored.latitude = Some(31.0);
        stored.longitude = Some(-110.0);
        let mut scraped = event("1");
        scraped.geocoding_attempted = true;
        scraped.latitude = Some(37.7749);
        scraped.longitude = Some(-122.4194);

        let result = reconcile(&stored, &scraped);
        assert_eq!(result.event.latitude, Some(37.7749));
        assert_eq!(result.event.longitude, Some(-122.4194));
    }

    #[test]
    fn details_deep_merge_scraped_wins_but_preserves_enrichment_keys() {
        let mut stored = event("1");
        stored
            .event_details
            .insert("directions".to_string(), json!("I-10 exit 281"));
        stored
            .event_details
            .insert("fee".to_string(), json!("$150"));
        let mut scraped = event("1");
        scraped
            .event_details
            .insert("fee".to_string(), json!("$175"));

        let result = reconcile(&stored, &scraped);
        assert_eq!(
            result.event.event_details.get("directions"),
            Some(&json!("I-10 exit 281"))
        );
        assert_eq!(result.event.event_details.get("fee"), Some(&json!("$175")));
    }

    #[test]
    fn distances_replaced_only_when_scrape_produced_some() {
        let mut stored = event("1");
        stored.distances = vec![Distance {
            label: "50".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 15),
            start_time: None,
        }];
        let scraped = event("1");

        let result = reconcile(&stored, &scraped);
        assert_eq!(result.event.distances.len(), 1);
    }

    #[test]
    fn deep_merge_nested_objects() {
        let mut base = serde_json::Map::new();
        base.insert("camp".to_string(), json!({"water": true, "corrals": false}));
        let mut patch = serde_json::Map::new();
        patch.insert("camp".to_string(), json!({"corrals": true, "showers": true}));

        deep_merge(&mut base, &patch, MergePrecedence::PatchWins);
        assert_eq!(
            base.get("camp"),
            Some(&json!({"water": true, "corrals": true, "showers": true}))
        );
    }

    #[test]
    fn deep_merge_base_wins_keeps_existing_scalars() {
        let mut base = serde_json::Map::new();
        base.insert("fee".to_string(), json!("$150"));
        let mut patch = serde_json::Map::new();
        patch.insert("fee".to_string(), json!("$175"));
        patch.insert("awards".to_string(), json!("completion"));

        deep_merge(&mut base, &patch, MergePrecedence::BaseWins);
        assert_eq!(base.get("fee"), Some(&json!("$150")));
        assert_eq!(base.get("awards"), Some(&json!("completion")));
    }
}
