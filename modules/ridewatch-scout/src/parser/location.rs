//! Free-text location splitting. Country is only ever inferred from a
//! recognized state/province code; anything else stays null and defers to
//! human review.

const US_STATES: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID", "IL", "IN", "IA",
    "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ",
    "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT",
    "VA", "WA", "WV", "WI", "WY", "DC",
];

const CANADIAN_PROVINCES: &[&str] = &[
    "AB", "BC", "MB", "NB", "NL", "NS", "NT", "NU", "ON", "PE", "QC", "SK", "YT",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationParts {
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

/// Split "City, ST" (optionally with an explicit trailing country) into
/// structured parts.
pub fn split_location(text: &str) -> LocationParts {
    let mut parts: Vec<&str> = text.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return LocationParts::default();
    }

    // Explicit trailing country wins over inference.
    let explicit_country = match parts.last().map(|p| p.to_uppercase()) {
        Some(ref c) if c == "USA" || c == "US" || c == "UNITED STATES" => {
            parts.pop();
            Some("USA".to_string())
        }
        Some(ref c) if c == "CANADA" => {
            parts.pop();
            Some("Canada".to_string())
        }
        _ => None,
    };

    let (city, state) = match parts.as_slice() {
        [] => (None, None),
        [only] => {
            let upper = only.to_uppercase();
            if is_region_code(&upper) {
                (None, Some(upper))
            } else {
                (Some(only.to_string()), None)
            }
        }
        [city @ .., last] => {
            let upper = last.to_uppercase();
            if is_region_code(&upper) {
                (Some(city.join(", ")), Some(upper))
            } else {
                (Some(parts.join(", ")), None)
            }
        }
    };

    let country = explicit_country.or_else(|| {
        state.as_deref().and_then(|code| {
            if US_STATES.contains(&code) {
                Some("USA".to_string())
            } else if CANADIAN_PROVINCES.contains(&code) {
                Some("Canada".to_string())
            } else {
                None
            }
        })
    });

    LocationParts {
        city,
        state,
        country,
    }
}

fn is_region_code(upper: &str) -> bool {
    US_STATES.contains(&upper) || CANADIAN_PROVINCES.contains(&upper)
}
