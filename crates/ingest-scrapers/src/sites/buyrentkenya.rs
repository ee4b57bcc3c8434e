use async_trait::async_trait;
use ingest_core::{parse, LocationField, PriceField, RawListing, SourceId};
use scraper::{ElementRef, Html, Selector};
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use super::{image_sources, page_url, parse_selector, select_attr, select_text};
use crate::{FetchError, PageClient, SiteAdapter};

pub const DEFAULT_BASE_URL: &str = "https://www.buyrentkenya.com/houses-for-sale";

#[derive(Debug)]
struct CardSelectors {
    container: Selector,
    empty: Selector,
    card: Selector,
    link: Selector,
    title: Selector,
    price: Selector,
    location: Selector,
    bedrooms: Selector,
    bathrooms: Selector,
    images: Selector,
    posted: Selector,
}

impl CardSelectors {
    fn new() -> Result<Self, FetchError> {
        Ok(Self {
            container: parse_selector(r#"[data-cy="search-result-list"]"#)?,
            empty: parse_selector(".no-results")?,
            card: parse_selector(".listing-card")?,
            link: parse_selector("a[href]")?,
            title: parse_selector(".listing-card__title")?,
            price: parse_selector(".listing-card__price")?,
            location: parse_selector(".listing-card__location")?,
            bedrooms: parse_selector(r#"[data-cy="card-bedroom_count"]"#)?,
            bathrooms: parse_selector(r#"[data-cy="card-bathroom_count"]"#)?,
            images: parse_selector("img")?,
            posted: parse_selector(".listing-card__date")?,
        })
    }
}

/// Server-rendered search results, paginated with `?page=N`.
#[derive(Debug)]
pub struct BuyRentKenyaAdapter {
    client: PageClient,
    base_url: Url,
    selectors: CardSelectors,
}

impl BuyRentKenyaAdapter {
    pub fn new(client: PageClient, base_url: Url) -> Result<Self, FetchError> {
        Ok(Self {
            client,
            base_url,
            selectors: CardSelectors::new()?,
        })
    }

    pub fn page_url(&self, page: u32) -> Url {
        page_url(&self.base_url, "page", page)
    }

    /// Extract the listing cards from one results page. A page that says it
    /// has no results, or whose result list is empty, yields no listings.
    pub fn parse_listings(
        &self,
        html: &str,
        url: &Url,
        page: u32,
    ) -> Result<Vec<RawListing>, FetchError> {
        let document = Html::parse_document(html);
        let s = &self.selectors;

        if document.select(&s.empty).next().is_some() {
            info!("BuyRentKenya page {} reports no results", page);
            return Ok(Vec::new());
        }

        let container = document
            .select(&s.container)
            .next()
            .ok_or_else(|| FetchError::structure(url.as_str(), page, "missing search result list"))?;

        let cards: Vec<ElementRef<'_>> = container.select(&s.card).collect();
        let mut listings = Vec::with_capacity(cards.len());
        for card in &cards {
            match self.parse_card(*card, url) {
                Some(listing) => listings.push(listing),
                None => debug!("Skipping BuyRentKenya card without a listing link"),
            }
        }

        if !cards.is_empty() && listings.is_empty() {
            return Err(FetchError::structure(
                url.as_str(),
                page,
                format!("{} cards found but none had a listing link", cards.len()),
            ));
        }

        debug!("Parsed {} BuyRentKenya listings from page {}", listings.len(), page);
        Ok(listings)
    }

    fn parse_card(&self, card: ElementRef<'_>, url: &Url) -> Option<RawListing> {
        let s = &self.selectors;
        let href = select_attr(card, &s.link, "href")?;
        let source_url = parse::absolutize(url, &href)?;

        let mut listing = RawListing::new(SourceId::BuyRentKenya, source_url);
        listing.title = select_text(card, &s.title);
        listing.price = select_text(card, &s.price).map(PriceField::Text);
        listing.location = select_text(card, &s.location).map(LocationField::Text);
        listing.bedrooms = select_text(card, &s.bedrooms).and_then(|t| parse::parse_count(&t));
        listing.bathrooms = select_text(card, &s.bathrooms).and_then(|t| parse::parse_count(&t));
        listing.image_urls = image_sources(card, &s.images, url);
        listing.posted_at = select_text(card, &s.posted);
        listing.extra = card
            .value()
            .attr("data-id")
            .map(|id| json!({ "listing_id": id }));
        Some(listing)
    }
}

#[async_trait]
impl SiteAdapter for BuyRentKenyaAdapter {
    fn source(&self) -> SourceId {
        SourceId::BuyRentKenya
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<RawListing>, FetchError> {
        let url = self.page_url(page);
        let body = self.client.get_text(&url).await?;
        self.parse_listings(&body, &url, page)
    }
}
