use url::Url;

/// Canonical display form of a URL: lowercase scheme/host (the `url` crate
/// guarantees both), default port dropped, trailing slash trimmed off
/// non-root paths. Returns None for anything that doesn't parse as an
/// absolute http(s) URL — callers drop those with a warning.
pub fn canonical_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    parsed.host_str()?;
    let mut out = parsed.to_string();
    if out.ends_with('/') && parsed.path() == "/" && parsed.query().is_none() {
        out.pop();
    } else if parsed.path().len() > 1 && parsed.path().ends_with('/') && parsed.query().is_none() {
        out.pop();
    }
    Some(out)
}

/// Cache-key form: canonical URL with query pairs sorted so parameter order
/// never splits cache entries.
pub fn cache_key_url(raw: &str) -> Option<String> {
    let mut parsed = Url::parse(raw.trim()).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    parsed.host_str()?;
    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !pairs.is_empty() {
        pairs.sort();
        parsed
            .query_pairs_mut()
            .clear()
            .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    let mut out = parsed.to_string();
    if out.ends_with('/') && parsed.path() == "/" && parsed.query().is_none() {
        out.pop();
    }
    Some(out)
}
