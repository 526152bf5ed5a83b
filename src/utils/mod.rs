//! URL and slug helpers shared across the pipeline.

use url::Url;

/// Maximum slug length in characters. Long doc paths get truncated so the
/// artifact names stay portable across filesystems.
const MAX_SLUG_CHARS: usize = 120;

/// Check whether a discovered URL is worth fetching.
///
/// Only http/https URLs qualify; `data:`, `javascript:`, `mailto:` and
/// anything unparseable are rejected.
#[must_use]
pub fn is_valid_url(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }
    match Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// Derive a stable, filesystem-safe slug from a URL's path.
///
/// `https://docs.example.com/guide/intro/` becomes `guide-intro`. The root
/// path maps to `index`. The same URL always yields the same slug, which is
/// what makes cached artifacts discoverable across runs.
#[must_use]
pub fn url_slug(url: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        // Unparseable input still needs a deterministic name.
        Err(_) => url.to_string(),
    };

    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return "index".to_string();
    }

    let joined = trimmed.replace('/', "-");
    let sanitized = sanitize_filename::sanitize(&joined);
    let slug = safe_truncate_chars(&sanitized, MAX_SLUG_CHARS);
    if slug.is_empty() {
        "index".to_string()
    } else {
        slug.to_string()
    }
}

/// Resolve the origin (`scheme://host[:port]`) of a URL.
pub fn site_origin(url: &str) -> anyhow::Result<String> {
    let parsed = Url::parse(url)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("URL has no host: {url}"))?;
    match parsed.port() {
        Some(port) => Ok(format!("{}://{host}:{port}", parsed.scheme())),
        None => Ok(format!("{}://{host}", parsed.scheme())),
    }
}

/// Resolve a possibly-relative href against a page origin into an absolute URL.
///
/// Returns `None` for empty hrefs and pure fragments, which is how pure
/// grouping headers in a navigation tree are represented.
#[must_use]
pub fn resolve_href(origin: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    if let Ok(absolute) = Url::parse(href) {
        return Some(absolute.to_string());
    }
    let base = Url::parse(origin).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

/// Truncate a string to at most `max_chars` characters without splitting a
/// UTF-8 code point.
#[must_use]
pub fn safe_truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        None => s,
        Some((byte_idx, _)) => &s[..byte_idx],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_stable_and_safe() {
        assert_eq!(url_slug("https://docs.example.com/guide/intro"), "guide-intro");
        assert_eq!(url_slug("https://docs.example.com/guide/intro/"), "guide-intro");
        assert_eq!(url_slug("https://docs.example.com/"), "index");
        assert_eq!(url_slug("https://docs.example.com"), "index");
    }

    #[test]
    fn slug_strips_unsafe_characters() {
        let slug = url_slug("https://docs.example.com/api/v2:beta");
        assert!(!slug.contains('/'));
        assert!(!slug.contains(':'));
    }

    #[test]
    fn valid_url_filters_non_http_schemes() {
        assert!(is_valid_url("https://example.com/docs"));
        assert!(is_valid_url("http://example.com"));
        assert!(!is_valid_url("javascript:void(0)"));
        assert!(!is_valid_url("mailto:docs@example.com"));
        assert!(!is_valid_url("data:text/html,hi"));
        assert!(!is_valid_url(""));
        assert!(!is_valid_url("not a url"));
    }

    #[test]
    fn href_resolution() {
        assert_eq!(
            resolve_href("https://docs.example.com", "/guide/intro"),
            Some("https://docs.example.com/guide/intro".to_string())
        );
        assert_eq!(
            resolve_href("https://docs.example.com", "https://other.com/x"),
            Some("https://other.com/x".to_string())
        );
        assert_eq!(resolve_href("https://docs.example.com", "#section"), None);
        assert_eq!(resolve_href("https://docs.example.com", ""), None);
    }

    #[test]
    fn origin_extraction() {
        assert_eq!(
            site_origin("https://docs.example.com/sitemap.xml").unwrap(),
            "https://docs.example.com"
        );
        assert_eq!(
            site_origin("http://localhost:8080/docs").unwrap(),
            "http://localhost:8080"
        );
    }
}
