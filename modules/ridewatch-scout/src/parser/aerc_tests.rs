//! Calendar fixture tests — literal HTML in, RawEvents out.

use chrono::NaiveDate;

use super::AercParser;
use crate::error::ParseError;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn page(rows: &str) -> String {
    format!(
        r#"<html><body><table class="calendar"><tbody>{rows}</tbody></table></body></html>"#
    )
}

const OLD_PUEBLO_ROW: &str = r#"
<tr class="ride-row" data-ride-id="12345">
  <td class="ride-date">Mar 15, 2024</td>
  <td class="ride-name">Old Pueblo</td>
  <td class="ride-location">Sonoita, AZ</td>
  <td>
    <div class="distances">
      <span class="distance" data-date="Mar 15, 2024" data-start="07:00">50</span>
    </div>
    <span class="ride-manager">Pat Chappell</span>
    <span class="manager-email">pat@oldpueblo.example.com</span>
    <span class="manager-phone">520-555-0134</span>
    <a class="website" href="HTTPS://OldPueblo.example.com/ride/">site</a>
    <div class="judges">
      <span class="judge" data-role="Head Vet">Dr. Garcia</span>
      <span class="judge">Dr. Lee</span>
    </div>
  </td>
</tr>
"#;

#[test]
fn single_day_active_event() {
    let parser = AercParser::new();
    let parsed = parser.parse_page(&page(OLD_PUEBLO_ROW)).unwrap();
    assert_eq!(parsed.events.len(), 1);
    assert!(parsed.errors.is_empty());

    let event = &parsed.events[0];
    assert_eq!(event.ride_id.as_deref(), Some("12345"));
    assert_eq!(event.name.as_deref(), Some("Old Pueblo"));
    assert!(!event.is_canceled);
    assert_eq!(event.date_start, Some(date(2024, 3, 15)));
    assert_eq!(event.date_end, Some(date(2024, 3, 15)));
    assert_eq!(event.city.as_deref(), Some("Sonoita"));
    assert_eq!(event.state.as_deref(), Some("AZ"));
    assert_eq!(event.country.as_deref(), Some("USA"));
    assert!(!event.has_intro_ride);
    assert_eq!(event.invalid_reason, None);

    assert_eq!(event.distances.len(), 1);
    assert_eq!(event.distances[0].label, "50");
    assert_eq!(event.distances[0].date, Some(date(2024, 3, 15)));
    assert_eq!(event.distances[0].start_time.as_deref(), Some("07:00"));

    assert_eq!(event.ride_manager.as_deref(), Some("Pat Chappell"));
    assert_eq!(
        event.manager_email.as_deref(),
        Some("pat@oldpueblo.example.com")
    );
    assert_eq!(event.manager_phone.as_deref(), Some("520-555-0134"));
    // Scheme/host lowercased, trailing slash trimmed.
    assert_eq!(
        event.website_url.as_deref(),
        Some("https://oldpueblo.example.com/ride")
    );

    assert_eq!(event.control_judges.len(), 2);
    assert_eq!(event.control_judges[0].role, "Head Vet");
    assert_eq!(event.control_judges[0].name, "Dr. Garcia");
    assert_eq!(event.control_judges[1].role, "Control Judge");
    assert_eq!(event.control_judges[1].name, "Dr. Lee");
}

#[test]
fn cancelled_event_marker_stripped() {
    let row = r#"
    <tr class="ride-row" data-ride-id="77">
      <td class="ride-date">Apr 20, 2024</td>
      <td class="ride-name">CANCELLED: Biltmore Challenge</td>
      <td class="ride-location">Asheville, NC</td>
    </tr>
    "#;
    let parsed = AercParser::new().parse_page(&page(row)).unwrap();
    let event = &parsed.events[0];
    assert_eq!(event.name.as_deref(), Some("Biltmore Challenge"));
    assert!(event.is_canceled);
}

#[test]
fn canadian_location_sets_country() {
    let row = r#"
    <tr class="ride-row" data-ride-id="900">
      <td class="ride-date">Aug 10, 2024</td>
      <td class="ride-name">Spruce Woods</td>
      <td class="ride-location">Belair, MB</td>
    </tr>
    "#;
    let parsed = AercParser::new().parse_page(&page(row)).unwrap();
    let event = &parsed.events[0];
    assert_eq!(event.country.as_deref(), Some("Canada"));
    assert_eq!(event.state.as_deref(), Some("MB"));
}

#[test]
fn map_link_coordinates_extracted() {
    let row = r#"
    <tr class="ride-row" data-ride-id="55">
      <td class="ride-date">May 4, 2024</td>
      <td class="ride-name">Bay Area Classic</td>
      <td class="ride-location">Pacifica, CA</td>
      <td><a class="map" href="https://maps.google.com/?q=37.7749,-122.4194">map</a></td>
    </tr>
    "#;
    let parsed = AercParser::new().parse_page(&page(row)).unwrap();
    let event = &parsed.events[0];
    assert!(event.geocoding_attempted);
    assert!((event.latitude.unwrap() - 37.7749).abs() < 1e-9);
    assert!((event.longitude.unwrap() - -122.4194).abs() < 1e-9);
}

#[test]
fn map_link_without_coords_leaves_geocoding_unattempted() {
    let row = r#"
    <tr class="ride-row" data-ride-id="56">
      <td class="ride-date">May 4, 2024</td>
      <td class="ride-name">Hill Country</td>
      <td><a class="map" href="https://maps.google.com/?q=Bandera+TX">map</a></td>
    </tr>
    "#;
    let parsed = AercParser::new().parse_page(&page(row)).unwrap();
    let event = &parsed.events[0];
    assert!(!event.geocoding_attempted);
    assert_eq!(event.latitude, None);
}

#[test]
fn intro_ride_detected_by_label() {
    let row = r#"
    <tr class="ride-row" data-ride-id="60">
      <td class="ride-date">Jun 1, 2024</td>
      <td class="ride-name">Green Horse</td>
      <td><div class="distances">
        <span class="distance" data-date="Jun 1, 2024">50</span>
        <span class="distance" data-date="Jun 1, 2024">Intro 10</span>
      </div></td>
    </tr>
    "#;
    let parsed = AercParser::new().parse_page(&page(row)).unwrap();
    assert!(parsed.events[0].has_intro_ride);
}

#[test]
fn intro_ride_detected_by_marker_and_mileage() {
    let row = r#"
    <tr class="ride-row" data-ride-id="61">
      <td class="ride-date">Jun 1, 2024</td>
      <td class="ride-name">Green Horse</td>
      <td><div class="distances">
        <span class="distance" data-date="Jun 1, 2024" data-intro="true">12</span>
      </div></td>
    </tr>
    "#;
    let parsed = AercParser::new().parse_page(&page(row)).unwrap();
    assert!(parsed.events[0].has_intro_ride);
}

#[test]
fn long_marked_distance_is_not_intro() {
    let row = r#"
    <tr class="ride-row" data-ride-id="62">
      <td class="ride-date">Jun 1, 2024</td>
      <td class="ride-name">Green Horse</td>
      <td><div class="distances">
        <span class="distance" data-date="Jun 1, 2024" data-intro="true">50</span>
      </div></td>
    </tr>
    "#;
    let parsed = AercParser::new().parse_page(&page(row)).unwrap();
    assert!(!parsed.events[0].has_intro_ride);
}

#[test]
fn unknown_month_flags_row_invalid_but_emits_it() {
    let row = r#"
    <tr class="ride-row" data-ride-id="70">
      <td class="ride-date">XX 15, 2024</td>
      <td class="ride-name">Mystery Ride</td>
    </tr>
    "#;
    let parsed = AercParser::new().parse_page(&page(row)).unwrap();
    assert_eq!(parsed.events.len(), 1);
    let event = &parsed.events[0];
    assert_eq!(event.date_start, None);
    assert!(event.invalid_reason.as_deref().unwrap().contains("XX"));
}

#[test]
fn missing_ride_id_row_still_emitted() {
    let row = r#"
    <tr class="ride-row">
      <td class="ride-date">Jul 4, 2024</td>
      <td class="ride-name">Firecracker</td>
    </tr>
    "#;
    let parsed = AercParser::new().parse_page(&page(row)).unwrap();
    assert_eq!(parsed.events.len(), 1);
    assert_eq!(parsed.events[0].ride_id, None);
}

#[test]
fn nameless_row_is_skipped_and_counted() {
    let rows = format!(
        r#"<tr class="ride-row" data-ride-id="1"><td class="ride-date">Mar 15, 2024</td></tr>{OLD_PUEBLO_ROW}"#
    );
    let parsed = AercParser::new().parse_page(&page(&rows)).unwrap();
    assert_eq!(parsed.events.len(), 1);
    assert_eq!(parsed.errors.len(), 1);
    assert_eq!(parsed.errors[0].code, "row_parse");
}

#[test]
fn invalid_website_url_dropped_row_survives() {
    let row = r#"
    <tr class="ride-row" data-ride-id="80">
      <td class="ride-date">Sep 1, 2024</td>
      <td class="ride-name">Autumn Run</td>
      <td><a class="website" href="javascript:alert(1)">site</a></td>
    </tr>
    "#;
    let parsed = AercParser::new().parse_page(&page(row)).unwrap();
    assert_eq!(parsed.events.len(), 1);
    assert_eq!(parsed.events[0].website_url, None);
}

#[test]
fn missing_calendar_container_is_structural() {
    let html = "<html><body><p>maintenance window</p></body></html>";
    let err = AercParser::new().parse_page(html).unwrap_err();
    assert!(matches!(err, ParseError::Structural(_)));
}

#[test]
fn rows_come_out_in_dom_order() {
    let rows = r#"
    <tr class="ride-row" data-ride-id="2"><td class="ride-date">Mar 1, 2024</td><td class="ride-name">Second Listed</td></tr>
    <tr class="ride-row" data-ride-id="1"><td class="ride-date">Feb 1, 2024</td><td class="ride-name">First Listed</td></tr>
    "#;
    let parsed = AercParser::new().parse_page(&page(rows)).unwrap();
    assert_eq!(parsed.events[0].ride_id.as_deref(), Some("2"));
    assert_eq!(parsed.events[1].ride_id.as_deref(), Some("1"));
}

#[test]
fn multi_day_rows_repeat_distances_per_day() {
    let rows = r#"
    <tr class="ride-row" data-ride-id="500">
      <td class="ride-date">Mar 28, 2024</td>
      <td class="ride-name">Pioneer Days</td>
      <td><div class="distances">
        <span class="distance" data-date="Mar 28, 2024">25</span>
        <span class="distance" data-date="Mar 28, 2024">50</span>
      </div></td>
    </tr>
    <tr class="ride-row" data-ride-id="500">
      <td class="ride-date">Mar 29, 2024</td>
      <td class="ride-name">Pioneer Days</td>
      <td><div class="distances">
        <span class="distance" data-date="Mar 29, 2024">25</span>
        <span class="distance" data-date="Mar 29, 2024">50</span>
      </div></td>
    </tr>
    "#;
    let parsed = AercParser::new().parse_page(&page(rows)).unwrap();
    assert_eq!(parsed.events.len(), 2);
    // Same label on different days is not a duplicate.
    assert_eq!(parsed.events[0].distances.len(), 2);
    assert_eq!(parsed.events[1].distances.len(), 2);
    assert_eq!(parsed.events[1].distances[0].date, Some(date(2024, 3, 29)));
}
