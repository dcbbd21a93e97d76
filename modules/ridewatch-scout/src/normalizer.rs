//! RawEvent → canonical Event transformation, including multi-day merging.
//!
//! Runs single-task per scrape: input order is page order then DOM order,
//! and merging is deterministic over that order.

use chrono::Utc;
use ridewatch_common::{synthetic_ride_id, ControlJudge, Event, RawEvent, RunError};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct NormalizeOutput {
    pub events: Vec<Event>,
    /// Rows/groups that failed a contract, with stable error codes.
    pub errors: Vec<RunError>,
    /// Canonical events that failed validation (already counted in errors).
    pub invalid: u32,
}

pub struct EventNormalizer {
    source: String,
}

impl EventNormalizer {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
        }
    }

    /// Merge per-day rows into canonical events.
    ///
    /// Rows sharing a `ride_id` merge when their days form a contiguous
    /// block (every gap ≤ 1 day); non-contiguous groups split into separate
    /// events. Rows without a `ride_id` never merge — identity synthesis
    /// happens after merging, on the final date span.
    pub fn normalize(&self, raws: Vec<RawEvent>) -> NormalizeOutput {
        let mut errors = Vec::new();
        let mut invalid = 0u32;

        // Partition into identity groups, preserving first-seen order.
        let mut group_order: Vec<String> = Vec::new();
        let mut groups: std::collections::HashMap<String, Vec<RawEvent>> =
            std::collections::HashMap::new();
        let mut singletons: Vec<RawEvent> = Vec::new();

        for raw in raws {
            if let Some(reason) = &raw.invalid_reason {
                invalid += 1;
                errors.push(RunError {
                    code: "validation".to_string(),
                    message: format!(
                        "row for {:?} invalid: {reason}",
                        raw.name.as_deref().unwrap_or("(unnamed)")
                    ),
                    page: None,
                });
                continue;
            }
            match &raw.ride_id {
                Some(id) => {
                    let key = id.clone();
                    if !groups.contains_key(&key) {
                        group_order.push(key.clone());
                    }
                    groups.entry(key).or_default().push(raw);
                }
                None => singletons.push(raw),
            }
        }

        let mut events = Vec::new();

        for key in group_order {
            let mut rows = groups.remove(&key).expect("group exists");
            rows.sort_by_key(|r| r.date_start);

            // Split into contiguous-day blocks.
            let mut blocks: Vec<Vec<RawEvent>> = Vec::new();
            for row in rows {
                let starts_new_block = match blocks.last() {
                    None => true,
                    Some(block) => {
                        let last = block.last().expect("block is non-empty");
                        match (last.date_start, row.date_start) {
                            (Some(prev), Some(next)) => (next - prev).num_days() > 1,
                            _ => false,
                        }
                    }
                };
                if starts_new_block {
                    blocks.push(vec![row]);
                } else {
                    blocks.last_mut().expect("just pushed").push(row);
                }
            }

            if blocks.len() > 1 {
                debug!(
                    ride_id = %key,
                    blocks = blocks.len(),
                    "non-contiguous day group split into separate events"
                );
            }

            for (block_index, block) in blocks.into_iter().enumerate() {
                match self.merge_block(block) {
                    Ok(mut event) => {
                        // A ride_id reused across non-contiguous spans would
                        // collide on (source, ride_id); later spans get a
                        // deterministic ordinal suffix.
                        if block_index > 0 {
                            event.ride_id = format!("{}-{}", event.ride_id, block_index + 1);
                        }
                        match event.validate() {
                            Ok(()) => events.push(event),
                            Err(e) => {
                                invalid += 1;
                                errors.push(RunError {
                                    code: "validation".to_string(),
                                    message: format!("{} ({}): {e}", event.name, event.ride_id),
                                    page: None,
                                });
                            }
                        }
                    }
                    Err(e) => {
                        invalid += 1;
                        errors.push(RunError {
                            code: "validation".to_string(),
                            message: e,
                            page: None,
                        });
                    }
                }
            }
        }

        for raw in singletons {
            match self.merge_block(vec![raw]) {
                Ok(event) => match event.validate() {
                    Ok(()) => events.push(event),
                    Err(e) => {
                        invalid += 1;
                        errors.push(RunError {
                            code: "validation".to_string(),
                            message: format!("{} ({}): {e}", event.name, event.ride_id),
                            page: None,
                        });
                    }
                },
                Err(e) => {
                    invalid += 1;
                    errors.push(RunError {
                        code: "validation".to_string(),
                        message: e,
                        page: None,
                    });
                }
            }
        }

        NormalizeOutput {
            events,
            errors,
            invalid,
        }
    }

    /// Merge one contiguous block of per-day rows into a canonical event.
    /// Scalars take the first non-null in day order; distances concatenate
    /// preserving per-day repeats; judges union order-preserving; details
    /// deep-merge first-write-wins.
    fn merge_block(&self, block: Vec<RawEvent>) -> Result<Event, String> {
        let first = block.first().expect("block is non-empty");
        let name = first
            .name
            .clone()
            .ok_or_else(|| "merged block has no name".to_string())?;

        let date_start = block
            .iter()
            .filter_map(|r| r.date_start)
            .min()
            .ok_or_else(|| format!("{name}: no usable date"))?;
        let date_end = block
            .iter()
            .filter_map(|r| r.date_end.or(r.date_start))
            .max()
            .unwrap_or(date_start);

        let ride_days = block.len() as u32;
        let is_multi_day_event = ride_days >= 2;
        let is_pioneer_ride = ride_days >= 3;

        let mut distances = Vec::new();
        let mut control_judges: Vec<ControlJudge> = Vec::new();
        let mut event_details = serde_json::Map::new();
        let mut is_canceled = false;
        let mut has_intro_ride = false;

        for row in &block {
            distances.extend(row.distances.iter().cloned());
            for judge in &row.control_judges {
                if !control_judges.contains(judge) {
                    control_judges.push(judge.clone());
                }
            }
            for (key, value) in &row.event_details {
                merge_detail_first_wins(&mut event_details, key, value, &name);
            }
            is_canceled |= row.is_canceled;
            has_intro_ride |= row.has_intro_ride;
        }

        let first_some = |get: fn(&RawEvent) -> Option<&String>| -> Option<String> {
            block.iter().find_map(|r| get(r).cloned())
        };

        let location = first_some(|r| r.location.as_ref());
        let ride_id = match first_some(|r| r.ride_id.as_ref()) {
            Some(id) => id,
            None => synthetic_ride_id(&self.source, &name, Some(date_start), location.as_deref()),
        };

        // Map-link coordinates from any contributing day.
        let coords = block
            .iter()
            .find(|r| r.geocoding_attempted)
            .map(|r| (r.latitude, r.longitude));

        let now = Utc::now();
        Ok(Event {
            id: Uuid::new_v4(),
            source: self.source.clone(),
            ride_id,
            name,
            description: first_some(|r| r.description.as_ref()),
            date_start,
            date_end,
            location,
            city: first_some(|r| r.city.as_ref()),
            state: first_some(|r| r.state.as_ref()),
            country: first_some(|r| r.country.as_ref()),
            organization: first_some(|r| r.organization.as_ref()),
            distances,
            ride_manager: first_some(|r| r.ride_manager.as_ref()),
            manager_email: first_some(|r| r.manager_email.as_ref()),
            manager_phone: first_some(|r| r.manager_phone.as_ref()),
            website_url: first_some(|r| r.website_url.as_ref()),
            flyer_url: first_some(|r| r.flyer_url.as_ref()),
            map_link: first_some(|r| r.map_link.as_ref()),
            control_judges,
            is_multi_day_event,
            is_pioneer_ride,
            ride_days,
            has_intro_ride,
            is_canceled,
            latitude: coords.and_then(|(lat, _)| lat),
            longitude: coords.and_then(|(_, lng)| lng),
            geocoding_attempted: coords.is_some(),
            last_website_check_at: None,
            event_details,
            notes: None,
            created_at: now,
            updated_at: now,
        })
    }
}

fn merge_detail_first_wins(
    details: &mut serde_json::Map<String, Value>,
    key: &str,
    value: &Value,
    event_name: &str,
) {
    if !details.contains_key(key) {
        details.insert(key.to_string(), value.clone());
        return;
    }
    let existing = details.get_mut(key).expect("key just checked");
    match (existing, value) {
        (Value::Object(existing_obj), Value::Object(patch_obj)) => {
            for (k, v) in patch_obj {
                merge_detail_first_wins(existing_obj, k, v, event_name);
            }
        }
        (existing, value) => {
            if existing != value {
                warn!(
                    event = event_name,
                    key, "conflicting event_details values across days, keeping first"
                );
            }
        }
    }
}
