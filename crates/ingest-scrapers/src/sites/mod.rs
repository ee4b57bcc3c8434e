pub mod buyrentkenya;
pub mod jiji;
pub mod property24;

use scraper::{ElementRef, Selector};
use url::Url;

use crate::FetchError;

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, FetchError> {
    Selector::parse(selector)
        .map_err(|e| FetchError::Config(format!("invalid selector {selector:?}: {e}")))
}

/// The listing index URL for `page`, replacing any page parameter already on
/// the base URL.
pub(crate) fn page_url(base: &Url, param: &str, page: u32) -> Url {
    let retained: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(key, _)| key != param)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut url = base.clone();
    url.set_query(None);
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &retained {
            pairs.append_pair(key, value);
        }
        pairs.append_pair(param, &page.to_string());
    }
    url
}

/// Whitespace-normalized text of the first match of `selector` under `element`.
pub(crate) fn select_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|node| ingest_core::parse::clean_text(&node.text().collect::<String>()))
}

pub(crate) fn select_attr(element: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|node| node.value().attr(attr))
        .and_then(ingest_core::parse::non_empty)
}

/// Image sources, preferring lazy-load attributes over placeholder `src`s.
pub(crate) fn image_sources(element: ElementRef<'_>, selector: &Selector, base: &Url) -> Vec<String> {
    let mut urls = Vec::new();
    for img in element.select(selector) {
        let value = img.value();
        let src = value
            .attr("data-src")
            .or_else(|| value.attr("data-original"))
            .or_else(|| value.attr("src"));
        if let Some(url) = src.and_then(|src| ingest_core::parse::absolutize(base, src)) {
            if !url.starts_with("data:") && !urls.contains(&url) {
                urls.push(url);
            }
        }
    }
    urls
}
