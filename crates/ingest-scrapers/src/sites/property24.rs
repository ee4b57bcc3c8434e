use async_trait::async_trait;
use ingest_core::{parse, LocationField, PriceField, RawListing, SourceId};
use scraper::{ElementRef, Html, Selector};
use serde_json::json;
use tracing::debug;
use url::Url;

use super::{image_sources, page_url, parse_selector, select_attr, select_text};
use crate::{FetchError, PageClient, SiteAdapter};

pub const DEFAULT_BASE_URL: &str = "https://www.property24.co.ke/property-for-sale";

#[derive(Debug)]
struct TileSelectors {
    results: Selector,
    empty: Selector,
    tile: Selector,
    link: Selector,
    title: Selector,
    price: Selector,
    suburb: Selector,
    city: Selector,
    features: Selector,
    images: Selector,
    listed: Selector,
}

impl TileSelectors {
    fn new() -> Result<Self, FetchError> {
        Ok(Self {
            results: parse_selector(".js_listingResultsContainer")?,
            empty: parse_selector(".p24_noResults")?,
            tile: parse_selector(".p24_regularTile, .p24_promotedTile")?,
            link: parse_selector("a[href]")?,
            title: parse_selector(".p24_title")?,
            price: parse_selector(".p24_price")?,
            suburb: parse_selector(".p24_location")?,
            city: parse_selector(".p24_address")?,
            features: parse_selector(".p24_featureDetails")?,
            images: parse_selector("img.js_P24_listingImage")?,
            listed: parse_selector(".p24_listingDate")?,
        })
    }
}

/// Result tiles paginated with `?Page=N`. Tiles carry the suburb and the
/// city in separate elements.
#[derive(Debug)]
pub struct Property24Adapter {
    client: PageClient,
    base_url: Url,
    selectors: TileSelectors,
}

impl Property24Adapter {
    pub fn new(client: PageClient, base_url: Url) -> Result<Self, FetchError> {
        Ok(Self {
            client,
            base_url,
            selectors: TileSelectors::new()?,
        })
    }

    pub fn page_url(&self, page: u32) -> Url {
        page_url(&self.base_url, "Page", page)
    }

    pub fn parse_listings(
        &self,
        html: &str,
        url: &Url,
        page: u32,
    ) -> Result<Vec<RawListing>, FetchError> {
        let document = Html::parse_document(html);
        let s = &self.selectors;

        if document.select(&s.empty).next().is_some() {
            return Ok(Vec::new());
        }

        let results = document
            .select(&s.results)
            .next()
            .ok_or_else(|| FetchError::structure(url.as_str(), page, "missing listing results container"))?;

        let tiles: Vec<ElementRef<'_>> = results.select(&s.tile).collect();
        let listings: Vec<RawListing> = tiles
            .iter()
            .filter_map(|tile| self.parse_tile(*tile, url))
            .collect();

        if !tiles.is_empty() && listings.is_empty() {
            return Err(FetchError::structure(
                url.as_str(),
                page,
                "listing tiles found but none had a link",
            ));
        }

        debug!("Parsed {} Property24 listings from page {}", listings.len(), page);
        Ok(listings)
    }

    fn parse_tile(&self, tile: ElementRef<'_>, url: &Url) -> Option<RawListing> {
        let s = &self.selectors;
        let href = select_attr(tile, &s.link, "href")?;
        let source_url = parse::absolutize(url, &href)?;

        let mut listing = RawListing::new(SourceId::Property24, source_url);
        listing.title = select_text(tile, &s.title);
        listing.price = select_text(tile, &s.price).map(PriceField::Text);

        let parts: Vec<String> = [select_text(tile, &s.suburb), select_text(tile, &s.city)]
            .into_iter()
            .flatten()
            .collect();
        if !parts.is_empty() {
            listing.location = Some(LocationField::Text(parts.join(", ")));
        }

        for feature in tile.select(&s.features) {
            let label = feature.value().attr("title").unwrap_or_default().to_lowercase();
            let count = parse::parse_count(&feature.text().collect::<String>());
            if label.contains("bedroom") {
                listing.bedrooms = count;
            } else if label.contains("bathroom") {
                listing.bathrooms = count;
            }
        }

        listing.image_urls = image_sources(tile, &s.images, url);
        listing.posted_at = select_text(tile, &s.listed);
        listing.extra = tile
            .value()
            .attr("data-listing-number")
            .map(|number| json!({ "listing_number": number }));
        Some(listing)
    }
}

#[async_trait]
impl SiteAdapter for Property24Adapter {
    fn source(&self) -> SourceId {
        SourceId::Property24
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<RawListing>, FetchError> {
        let url = self.page_url(page);
        let body = self.client.get_text(&url).await?;
        self.parse_listings(&body, &url, page)
    }
}
