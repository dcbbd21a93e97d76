//! Ride-manager contact extraction. Emails must look like
//! `local@domain.tld`; phones need at least ten digits with optional
//! separators. Anything else is dropped rather than stored malformed.

use regex::Regex;
use std::sync::OnceLock;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$")
            .expect("email regex compiles")
    })
}

fn phone_chars_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+?[\d\s().\-]+$").expect("phone regex compiles"))
}

/// Validate and normalize an email cell. Returns None for anything that
/// doesn't match the `local@domain.tld` shape.
pub fn clean_email(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if email_regex().is_match(trimmed) {
        Some(trimmed.to_string())
    } else {
        None
    }
}

/// Validate a phone cell: optional leading +, digits with common
/// separators, at least ten digits total.
pub fn clean_phone(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if !phone_chars_regex().is_match(trimmed) {
        return None;
    }
    let digit_count = trimmed.chars().filter(|c| c.is_ascii_digit()).count();
    if digit_count >= 10 {
        Some(trimmed.to_string())
    } else {
        None
    }
}
