//! Map-link coordinate extraction. Three recognized encodings:
//! `?q=LAT,LNG`, `@LAT,LNG,ZOOMz`, and the legacy `ll=LAT,LNG`.

use regex::Regex;
use std::sync::OnceLock;

fn coord_regexes() -> &'static [Regex; 3] {
    static RES: OnceLock<[Regex; 3]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"[?&]q=(-?\d{1,3}(?:\.\d+)?),(-?\d{1,3}(?:\.\d+)?)")
                .expect("q regex compiles"),
            Regex::new(r"@(-?\d{1,3}(?:\.\d+)?),(-?\d{1,3}(?:\.\d+)?)(?:,\d+(?:\.\d+)?z)?")
                .expect("@ regex compiles"),
            Regex::new(r"[?&]ll=(-?\d{1,3}(?:\.\d+)?),(-?\d{1,3}(?:\.\d+)?)")
                .expect("ll regex compiles"),
        ]
    })
}

/// Pull explicit coordinates out of a map link. Out-of-range pairs are
/// treated as absent.
pub fn map_link_coords(url: &str) -> Option<(f64, f64)> {
    for re in coord_regexes() {
        if let Some(caps) = re.captures(url) {
            let lat: f64 = caps[1].parse().ok()?;
            let lng: f64 = caps[2].parse().ok()?;
            if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) {
                return Some((lat, lng));
            }
        }
    }
    None
}
