//! Jiji serves its search results as JSON. The payload is loosely typed:
//! prices arrive as numbers, strings or `{value, view}` objects, and the
//! region is either a string or a nested address.

use async_trait::async_trait;
use ingest_core::{parse, LocationField, PriceField, RawListing, SourceId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::page_url;
use crate::{FetchError, PageClient, SiteAdapter};

pub const DEFAULT_BASE_URL: &str =
    "https://jiji.co.ke/api_web/v1/listing?slug=houses-apartments-for-sale";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    adverts_list: Option<AdvertList>,
}

#[derive(Debug, Deserialize)]
struct AdvertList {
    #[serde(default)]
    adverts: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JijiPrice {
    Number(f64),
    Text(String),
    Object {
        #[serde(default)]
        value: Option<f64>,
        #[serde(default)]
        view: Option<String>,
    },
}

impl JijiPrice {
    fn into_field(self) -> Option<PriceField> {
        match self {
            JijiPrice::Number(value) => Some(PriceField::Amount(value)),
            JijiPrice::Text(text) => parse::non_empty(&text).map(PriceField::Text),
            JijiPrice::Object { value: Some(value), .. } if value > 0.0 => Some(PriceField::Amount(value)),
            JijiPrice::Object { view, .. } => view.as_deref().and_then(parse::non_empty).map(PriceField::Text),
        }
    }
}

/// A field of the wrong shape reads as absent instead of failing the advert.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Like [`lenient`] for lists, dropping only the unreadable elements.
fn lenient_seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

#[derive(Debug, Deserialize)]
struct Attribute {
    #[serde(default, deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(default)]
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Image {
    Url(String),
    Object {
        #[serde(default, deserialize_with = "lenient")]
        url: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct Advert {
    #[serde(default, deserialize_with = "lenient")]
    url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    price: Option<JijiPrice>,
    #[serde(default, deserialize_with = "lenient")]
    price_obj: Option<JijiPrice>,
    #[serde(default, deserialize_with = "lenient")]
    region: Option<LocationField>,
    #[serde(default, deserialize_with = "lenient")]
    region_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    region_parent_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_seq")]
    attrs: Vec<Attribute>,
    #[serde(default, deserialize_with = "lenient_seq")]
    images: Vec<Image>,
    #[serde(default, deserialize_with = "lenient")]
    date: Option<String>,
}

impl Advert {
    fn attribute_count(&self, name: &str) -> Option<u32> {
        let attr = self.attrs.iter().find(|attr| {
            attr.name
                .as_deref()
                .map(|n| n.to_lowercase().contains(name))
                .unwrap_or(false)
        })?;
        match attr.value.as_ref()? {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => parse::parse_count(s),
            _ => None,
        }
    }

    fn location(&self) -> Option<LocationField> {
        if let Some(region) = &self.region {
            return Some(region.clone());
        }
        if self.region_name.is_none() && self.region_parent_name.is_none() {
            return None;
        }
        Some(LocationField::Structured {
            address: self.region_name.clone(),
            city: self.region_parent_name.clone(),
            state: None,
        })
    }
}

#[derive(Debug)]
pub struct JijiAdapter {
    client: PageClient,
    base_url: Url,
}

impl JijiAdapter {
    pub fn new(client: PageClient, base_url: Url) -> Self {
        Self { client, base_url }
    }

    pub fn page_url(&self, page: u32) -> Url {
        page_url(&self.base_url, "page", page)
    }

    /// Turn one JSON results page into listings. Malformed fields read as
    /// absent; adverts that are not objects or have no link are skipped. A
    /// page without an advert list at all is a structure error.
    pub fn parse_listings(body: &str, url: &Url, page: u32) -> Result<Vec<RawListing>, FetchError> {
        let response: SearchResponse = serde_json::from_str(body)
            .map_err(|e| FetchError::structure(url.as_str(), page, format!("invalid JSON: {e}")))?;
        let list = response
            .adverts_list
            .ok_or_else(|| FetchError::structure(url.as_str(), page, "missing adverts_list"))?;

        let mut listings = Vec::with_capacity(list.adverts.len());
        for raw in list.adverts {
            let advert: Advert = match serde_json::from_value(raw.clone()) {
                Ok(advert) => advert,
                Err(e) => {
                    warn!("Skipping unreadable Jiji advert on page {}: {}", page, e);
                    continue;
                }
            };
            let Some(source_url) = advert.url.as_deref().and_then(|href| parse::absolutize(url, href)) else {
                debug!("Skipping Jiji advert without url");
                continue;
            };

            let mut listing = RawListing::new(SourceId::Jiji, source_url);
            listing.title = advert.title.as_deref().and_then(parse::clean_text);
            listing.location = advert.location();
            listing.bedrooms = advert.attribute_count("bedroom");
            listing.bathrooms = advert.attribute_count("bathroom");
            listing.image_urls = advert
                .images
                .iter()
                .filter_map(|image| match image {
                    Image::Url(src) => Some(src.as_str()),
                    Image::Object { url } => url.as_deref(),
                })
                .filter_map(|src| parse::absolutize(url, src))
                .collect();
            listing.posted_at = advert.date.as_deref().and_then(parse::non_empty);
            listing.price = advert
                .price
                .and_then(JijiPrice::into_field)
                .or_else(|| advert.price_obj.and_then(JijiPrice::into_field));
            listing.extra = Some(raw);
            listings.push(listing);
        }

        debug!("Parsed {} Jiji listings from page {}", listings.len(), page);
        Ok(listings)
    }
}

#[async_trait]
impl SiteAdapter for JijiAdapter {
    fn source(&self) -> SourceId {
        SourceId::Jiji
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<RawListing>, FetchError> {
        let url = self.page_url(page);
        let body = self.client.get_text(&url).await?;
        Self::parse_listings(&body, &url, page)
    }
}
