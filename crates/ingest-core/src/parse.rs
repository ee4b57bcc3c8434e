//! Best-effort value parsing shared by the site adapters and the importer.
//!
//! Every function here returns `None` rather than failing: listing sites are
//! inconsistent and a missing field is an ordinary case.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d{1,3}(?:[,\s]\d{3})+|\d+)(\.\d+)?\s*(k|m|million|mn|bn|b)?\b")
            .expect("valid price regex")
    })
}

fn count_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("valid count regex"))
}

/// Trimmed copy of `text`, or `None` when nothing is left.
pub fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Collapse runs of whitespace (including the newlines scraped HTML is full of).
pub fn clean_text(text: &str) -> Option<String> {
    let joined = text.split_whitespace().collect::<Vec<_>>().join(" ");
    non_empty(&joined)
}

/// Parse a displayed price such as `KSh 12,500,000`, `Ksh 85K / month` or
/// `USD 1.2M`. The currency marker is ignored.
pub fn parse_price(text: &str) -> Option<f64> {
    let caps = number_re().captures(text)?;
    let mut digits: String = caps[1].chars().filter(char::is_ascii_digit).collect();
    if let Some(fraction) = caps.get(2) {
        digits.push_str(fraction.as_str());
    }
    let value: f64 = digits.parse().ok()?;
    let multiplier = match caps.get(3).map(|m| m.as_str().to_lowercase()) {
        Some(suffix) if suffix == "k" => 1_000.0,
        Some(suffix) if suffix == "m" || suffix == "mn" || suffix == "million" => 1_000_000.0,
        Some(suffix) if suffix == "b" || suffix == "bn" => 1_000_000_000.0,
        _ => 1.0,
    };
    let price = (value * multiplier * 100.0).round() / 100.0;
    if price.is_finite() && price > 0.0 {
        Some(price)
    } else {
        None
    }
}

/// First integer in a label like `3 Bedrooms` or `Baths: 2`.
pub fn parse_count(text: &str) -> Option<u32> {
    count_re().find(text)?.as_str().parse().ok()
}

/// Split a comma separated location into the cleaned full text and its last
/// component, which sites use for the town or county.
pub fn split_location(text: &str) -> (Option<String>, Option<String>) {
    let parts: Vec<&str> = text
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    if parts.is_empty() {
        return (None, None);
    }
    let city = parts.last().map(|part| part.to_string());
    (Some(parts.join(", ")), city)
}

/// Resolve a possibly relative `href` against the page it came from.
pub fn absolutize(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    base.join(href).ok().map(|url| url.to_string())
}
