//! AERC calendar extraction: normalized HTML in, ordered `RawEvent`s out.
//!
//! A calendar page is a `table.calendar` of `tr.ride-row` rows, one row per
//! ride per listing day. Row identity hangs off the `data-ride-id`
//! attribute; the cells carry date, name, location, a distances block, the
//! manager contacts, links, and control judges. A row that fails a contract
//! is recorded and skipped without aborting the page; a page without the
//! calendar table is a structural failure.

mod contact;
mod dates;
mod links;
mod location;

#[cfg(test)]
mod aerc_tests;

pub use dates::{parse_date_range, DateParseError};
pub use links::map_link_coords;
pub use location::{split_location, LocationParts};

use ridewatch_common::{ControlJudge, Distance, RawEvent, RunError};
use ridewatch_fetch::canonical_url;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::error::ParseError;

/// Distances at or under this length with the intro marker count as intro
/// rides.
const INTRO_MAX_MILES: f64 = 15.0;

#[derive(Debug)]
pub struct ParsedPage {
    /// Row order follows DOM order; the normalizer depends on it.
    pub events: Vec<RawEvent>,
    pub errors: Vec<RunError>,
}

struct Selectors {
    calendar: Selector,
    row: Selector,
    date: Selector,
    name: Selector,
    location: Selector,
    organization: Selector,
    description: Selector,
    distance: Selector,
    manager: Selector,
    email: Selector,
    phone: Selector,
    website: Selector,
    flyer: Selector,
    map: Selector,
    judge: Selector,
}

impl Selectors {
    fn new() -> Self {
        let sel = |s: &str| Selector::parse(s).expect("selector parses");
        Self {
            calendar: sel("table.calendar"),
            row: sel("tr.ride-row"),
            date: sel(".ride-date"),
            name: sel(".ride-name"),
            location: sel(".ride-location"),
            organization: sel(".ride-organization"),
            description: sel(".ride-description"),
            distance: sel(".distances .distance"),
            manager: sel(".ride-manager"),
            email: sel(".manager-email"),
            phone: sel(".manager-phone"),
            website: sel("a.website"),
            flyer: sel("a.flyer"),
            map: sel("a.map"),
            judge: sel(".judges .judge"),
        }
    }
}

pub struct AercParser {
    selectors: Selectors,
}

impl Default for AercParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AercParser {
    pub fn new() -> Self {
        Self {
            selectors: Selectors::new(),
        }
    }

    /// Extract every ride row from one calendar page. Row failures are
    /// collected, not fatal; a missing calendar container aborts the page.
    pub fn parse_page(&self, html: &str) -> Result<ParsedPage, ParseError> {
        let document = Html::parse_document(html);

        let calendar = document
            .select(&self.selectors.calendar)
            .next()
            .ok_or_else(|| {
                ParseError::Structural("calendar table not found".to_string())
            })?;

        let mut events = Vec::new();
        let mut errors = Vec::new();

        for (index, row) in calendar.select(&self.selectors.row).enumerate() {
            match self.parse_row(row) {
                Ok(event) => events.push(event),
                Err(ParseError::Row(message)) => {
                    warn!(row = index, error = %message, "skipping unparseable row");
                    errors.push(RunError {
                        code: "row_parse".to_string(),
                        message: format!("row {index}: {message}"),
                        page: None,
                    });
                }
                Err(structural) => return Err(structural),
            }
        }

        debug!(rows = events.len(), errors = errors.len(), "parsed calendar page");
        Ok(ParsedPage { events, errors })
    }

    fn parse_row(&self, row: ElementRef<'_>) -> Result<RawEvent, ParseError> {
        let mut event = RawEvent::default();

        event.ride_id = row
            .value()
            .attr("data-ride-id")
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        // Name is the one hard requirement for a usable row.
        let raw_name = self
            .text_of(row, &self.selectors.name)
            .ok_or_else(|| ParseError::Row("missing ride name".to_string()))?;
        let (name, is_canceled) = strip_cancellation_marker(&raw_name);
        if name.is_empty() {
            return Err(ParseError::Row("empty ride name".to_string()));
        }
        event.name = Some(name);
        event.is_canceled = is_canceled;

        match self.text_of(row, &self.selectors.date) {
            Some(date_text) => match parse_date_range(&date_text) {
                Ok((start, end)) => {
                    event.date_start = Some(start);
                    event.date_end = Some(end);
                }
                Err(e) => {
                    // Emit the row anyway; the normalizer counts it invalid.
                    event.invalid_reason = Some(e.to_string());
                }
            },
            None => {
                event.invalid_reason = Some("missing date cell".to_string());
            }
        }

        if let Some(location) = self.text_of(row, &self.selectors.location) {
            let parts = split_location(&location);
            event.city = parts.city;
            event.state = parts.state;
            event.country = parts.country;
            event.location = Some(location);
        }

        event.organization = self.text_of(row, &self.selectors.organization);
        event.description = self.text_of(row, &self.selectors.description);

        for distance_el in row.select(&self.selectors.distance) {
            let label = element_text(distance_el);
            if label.is_empty() {
                continue;
            }
            let date = distance_el
                .value()
                .attr("data-date")
                .and_then(|d| parse_date_range(d).ok())
                .map(|(start, _)| start);
            let start_time = distance_el
                .value()
                .attr("data-start")
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);

            if label.to_lowercase().contains("intro") {
                event.has_intro_ride = true;
            } else if distance_el.value().attr("data-intro").is_some() {
                if let Some(miles) = leading_miles(&label) {
                    if miles <= INTRO_MAX_MILES {
                        event.has_intro_ride = true;
                    }
                }
            }

            let distance = Distance {
                label,
                date,
                start_time,
            };
            // Exact duplicate tuples are source noise; same label on another
            // day is a real offering and stays.
            if !event.distances.contains(&distance) {
                event.distances.push(distance);
            }
        }

        event.ride_manager = self.text_of(row, &self.selectors.manager);
        event.manager_email = self
            .text_of(row, &self.selectors.email)
            .and_then(|e| contact::clean_email(&e));
        event.manager_phone = self
            .text_of(row, &self.selectors.phone)
            .and_then(|p| contact::clean_phone(&p));

        event.website_url = self.link_of(row, &self.selectors.website);
        event.flyer_url = self.link_of(row, &self.selectors.flyer);
        event.map_link = self.link_of(row, &self.selectors.map);

        if let Some(map_link) = &event.map_link {
            if let Some((lat, lng)) = map_link_coords(map_link) {
                event.latitude = Some(lat);
                event.longitude = Some(lng);
                event.geocoding_attempted = true;
            }
        }

        for judge_el in row.select(&self.selectors.judge) {
            let name = element_text(judge_el);
            if name.is_empty() {
                continue;
            }
            let role = judge_el
                .value()
                .attr("data-role")
                .unwrap_or("Control Judge")
                .trim()
                .to_string();
            event.control_judges.push(ControlJudge { role, name });
        }

        Ok(event)
    }

    fn text_of(&self, row: ElementRef<'_>, selector: &Selector) -> Option<String> {
        row.select(selector)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
    }

    fn link_of(&self, row: ElementRef<'_>, selector: &Selector) -> Option<String> {
        let href = row.select(selector).next()?.value().attr("href")?;
        match canonical_url(href) {
            Some(url) => Some(url),
            None => {
                warn!(href, "dropping invalid url");
                None
            }
        }
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Strip a leading or trailing cancellation marker from the title. Returns
/// the cleaned name and whether a marker was present.
fn strip_cancellation_marker(raw: &str) -> (String, bool) {
    let trimmed = raw.trim();
    let lower = trimmed.to_lowercase();
    if lower.len() != trimmed.len() {
        // Lowercasing shifted byte offsets (non-ASCII title); marker
        // slicing below would cut at the wrong place.
        return (trimmed.to_string(), false);
    }

    for marker in ["cancelled", "canceled"] {
        if lower.starts_with(marker) {
            let rest = trimmed[marker.len()..].trim_start_matches([':', '-', '–', ' ']);
            return (rest.trim().to_string(), true);
        }
        if lower.ends_with(marker) {
            let rest = trimmed[..trimmed.len() - marker.len()]
                .trim_end_matches(['(', ':', '-', '–', ' ']);
            return (rest.trim().to_string(), true);
        }
    }
    (trimmed.to_string(), false)
}

/// Leading numeric mileage of a distance label ("25/50" → 25, "50 mi" → 50).
fn leading_miles(label: &str) -> Option<f64> {
    let digits: String = label
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod marker_tests {
    use super::*;

    #[test]
    fn leading_marker_stripped() {
        assert_eq!(
            strip_cancellation_marker("CANCELLED: Biltmore Challenge"),
            ("Biltmore Challenge".to_string(), true)
        );
        assert_eq!(
            strip_cancellation_marker("Canceled - Old Pueblo"),
            ("Old Pueblo".to_string(), true)
        );
    }

    #[test]
    fn trailing_marker_stripped() {
        assert_eq!(
            strip_cancellation_marker("Biltmore Challenge - CANCELLED"),
            ("Biltmore Challenge".to_string(), true)
        );
    }

    #[test]
    fn plain_name_untouched() {
        assert_eq!(
            strip_cancellation_marker("Old Pueblo"),
            ("Old Pueblo".to_string(), false)
        );
    }

    #[test]
    fn leading_miles_parses_compound_labels() {
        assert_eq!(leading_miles("25/50"), Some(25.0));
        assert_eq!(leading_miles("50 mi"), Some(50.0));
        assert_eq!(leading_miles("12.5"), Some(12.5));
        assert_eq!(leading_miles("Intro"), None);
    }
}
