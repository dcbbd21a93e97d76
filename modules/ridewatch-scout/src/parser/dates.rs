//! Calendar date-cell parsing. The source prints single days ("Mar 15,
//! 2024"), in-month ranges ("Jun 15-16, 2024"), cross-month ranges
//! ("Jun 29-Jul 1, 2024"), and in older listings two-letter month codes
//! ("MR 15, 2024").

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

/// Two-letter month codes seen in legacy calendar exports. Anything outside
/// this table is an unknown token, which flags the row invalid.
const TWO_LETTER_MONTHS: &[(&str, u32)] = &[
    ("JA", 1),
    ("FE", 2),
    ("MR", 3),
    ("AP", 4),
    ("MY", 5),
    ("JN", 6),
    ("JL", 7),
    ("AU", 8),
    ("SE", 9),
    ("OC", 10),
    ("NO", 11),
    ("DE", 12),
];

const MONTH_NAMES: &[(&str, u32)] = &[
    ("JANUARY", 1),
    ("FEBRUARY", 2),
    ("MARCH", 3),
    ("APRIL", 4),
    ("MAY", 5),
    ("JUNE", 6),
    ("JULY", 7),
    ("AUGUST", 8),
    ("SEPTEMBER", 9),
    ("OCTOBER", 10),
    ("NOVEMBER", 11),
    ("DECEMBER", 12),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateParseError {
    UnknownMonth(String),
    Unparseable(String),
    InvalidDay(String),
}

impl std::fmt::Display for DateParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateParseError::UnknownMonth(t) => write!(f, "unknown month token: {t}"),
            DateParseError::Unparseable(t) => write!(f, "unparseable date: {t}"),
            DateParseError::InvalidDay(t) => write!(f, "invalid day of month: {t}"),
        }
    }
}

fn resolve_month(token: &str) -> Result<u32, DateParseError> {
    let upper = token.to_uppercase();
    for (name, month) in MONTH_NAMES {
        if *name == upper || name.starts_with(&upper) && upper.len() >= 3 {
            return Ok(*month);
        }
    }
    for (code, month) in TWO_LETTER_MONTHS {
        if *code == upper {
            return Ok(*month);
        }
    }
    Err(DateParseError::UnknownMonth(token.to_string()))
}

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)^
            (?P<m1>[A-Za-z]{2,9})\.?\s+(?P<d1>\d{1,2})
            (?:\s*[-–]\s*(?:(?P<m2>[A-Za-z]{2,9})\.?\s+)?(?P<d2>\d{1,2}))?
            ,?\s+(?P<y>\d{4})
            $",
        )
        .expect("date regex compiles")
    })
}

/// Parse a date cell into (start, end). Single days yield start == end.
pub fn parse_date_range(text: &str) -> Result<(NaiveDate, NaiveDate), DateParseError> {
    let trimmed = text.trim();
    let caps = date_regex()
        .captures(trimmed)
        .ok_or_else(|| DateParseError::Unparseable(trimmed.to_string()))?;

    let year: i32 = caps["y"].parse().expect("regex matched digits");
    let m1 = resolve_month(&caps["m1"])?;
    let d1: u32 = caps["d1"].parse().expect("regex matched digits");
    let start = NaiveDate::from_ymd_opt(year, m1, d1)
        .ok_or_else(|| DateParseError::InvalidDay(trimmed.to_string()))?;

    let end = match caps.name("d2") {
        None => start,
        Some(d2) => {
            let d2: u32 = d2.as_str().parse().expect("regex matched digits");
            let m2 = match caps.name("m2") {
                Some(m2) => resolve_month(m2.as_str())?,
                None => m1,
            };
            // A range like "Dec 30-Jan 2" crosses the year boundary.
            let end_year = if m2 < m1 { year + 1 } else { year };
            NaiveDate::from_ymd_opt(end_year, m2, d2)
                .ok_or_else(|| DateParseError::InvalidDay(trimmed.to_string()))?
        }
    };

    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn single_day() {
        assert_eq!(
            parse_date_range("Mar 15, 2024").unwrap(),
            (date(2024, 3, 15), date(2024, 3, 15))
        );
    }

    #[test]
    fn in_month_range() {
        assert_eq!(
            parse_date_range("Jun 15-16, 2024").unwrap(),
            (date(2024, 6, 15), date(2024, 6, 16))
        );
    }

    #[test]
    fn cross_month_range() {
        assert_eq!(
            parse_date_range("Jun 29-Jul 1, 2024").unwrap(),
            (date(2024, 6, 29), date(2024, 7, 1))
        );
    }

    #[test]
    fn cross_year_range() {
        assert_eq!(
            parse_date_range("Dec 30-Jan 2, 2024").unwrap(),
            (date(2024, 12, 30), date(2025, 1, 2))
        );
    }

    #[test]
    fn two_letter_codes_resolve() {
        assert_eq!(
            parse_date_range("MR 15, 2024").unwrap(),
            (date(2024, 3, 15), date(2024, 3, 15))
        );
        assert_eq!(
            parse_date_range("JL 4, 2024").unwrap().0,
            date(2024, 7, 4)
        );
        assert_eq!(
            parse_date_range("MY 11, 2024").unwrap().0,
            date(2024, 5, 11)
        );
    }

    #[test]
    fn full_month_names() {
        assert_eq!(
            parse_date_range("March 15, 2024").unwrap().0,
            date(2024, 3, 15)
        );
        assert_eq!(
            parse_date_range("September 2, 2024").unwrap().0,
            date(2024, 9, 2)
        );
    }

    #[test]
    fn unknown_month_token_is_flagged() {
        assert_eq!(
            parse_date_range("XX 15, 2024"),
            Err(DateParseError::UnknownMonth("XX".to_string()))
        );
    }

    #[test]
    fn garbage_is_unparseable() {
        assert!(matches!(
            parse_date_range("sometime next spring"),
            Err(DateParseError::Unparseable(_))
        ));
    }

    #[test]
    fn invalid_day_of_month() {
        assert!(matches!(
            parse_date_range("Feb 30, 2024"),
            Err(DateParseError::InvalidDay(_))
        ));
    }

    #[test]
    fn whitespace_and_linebreaks_tolerated() {
        assert_eq!(
            parse_date_range(" Jun 15-16,\n2024 ").unwrap(),
            (date(2024, 6, 15), date(2024, 6, 16))
        );
    }
}
