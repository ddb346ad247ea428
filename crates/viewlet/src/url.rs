//! URL syntax rule guarding [`crate::driver::Driver::open`].

use std::sync::LazyLock;

use regex::Regex;

// Scheme http/https; a dotted domain, IPv4 literal or localhost; optional
// port; optional path/query.
static URL_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^https?://(?:(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+(?:[A-Z]{2,6}\.?|[A-Z0-9-]{2,}\.?)|localhost|\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})(?::\d+)?(?:/?|[/?]\S+)$",
    )
    .expect("url rule compiles")
});

/// Check a candidate against the URL syntax rule.
pub fn is_valid_url(url: &str) -> bool {
    URL_RULE.is_match(url)
}
