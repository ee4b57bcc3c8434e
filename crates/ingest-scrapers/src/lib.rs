mod client;
mod error;
pub mod retry;
pub mod sites;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ingest_core::{RawListing, SourceId};
use url::Url;

pub use client::{PageClient, DEFAULT_USER_AGENT};
pub use error::FetchError;
pub use retry::{fetch_with_retry, retry_with_backoff, RetryPolicy};
pub use sites::buyrentkenya::BuyRentKenyaAdapter;
pub use sites::jiji::JijiAdapter;
pub use sites::property24::Property24Adapter;

/// One listing site.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// The source every listing from this adapter is tagged with.
    fn source(&self) -> SourceId;

    /// Fetch and parse one results page (1-based). An empty list means the
    /// site has no more results.
    async fn fetch_page(&self, page: u32) -> Result<Vec<RawListing>, FetchError>;
}

/// Network settings shared by every adapter, plus per-site base URL
/// overrides.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub timeout: Duration,
    pub user_agent: String,
    pub base_urls: HashMap<SourceId, Url>,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            base_urls: HashMap::new(),
        }
    }
}

impl AdapterSettings {
    /// The configured base URL for `source`, or the site's public search page.
    pub fn base_url(&self, source: SourceId) -> Result<Url, FetchError> {
        if let Some(url) = self.base_urls.get(&source) {
            return Ok(url.clone());
        }
        let default = match source {
            SourceId::BuyRentKenya => sites::buyrentkenya::DEFAULT_BASE_URL,
            SourceId::Property24 => sites::property24::DEFAULT_BASE_URL,
            SourceId::Jiji => sites::jiji::DEFAULT_BASE_URL,
        };
        Url::parse(default).map_err(|e| FetchError::Config(format!("{source}: {e}")))
    }
}

/// Factory for creating adapter instances
pub struct AdapterFactory;

impl AdapterFactory {
    pub fn create(
        source: SourceId,
        settings: &AdapterSettings,
    ) -> Result<Arc<dyn SiteAdapter>, FetchError> {
        let client = PageClient::new(settings.timeout, &settings.user_agent)?;
        Self::with_client(source, client, settings)
    }

    /// One adapter per source, sharing a single HTTP client.
    pub fn create_all(
        sources: &[SourceId],
        settings: &AdapterSettings,
    ) -> Result<Vec<Arc<dyn SiteAdapter>>, FetchError> {
        let client = PageClient::new(settings.timeout, &settings.user_agent)?;
        sources
            .iter()
            .map(|source| Self::with_client(*source, client.clone(), settings))
            .collect()
    }

    fn with_client(
        source: SourceId,
        client: PageClient,
        settings: &AdapterSettings,
    ) -> Result<Arc<dyn SiteAdapter>, FetchError> {
        let base_url = settings.base_url(source)?;
        Ok(match source {
            SourceId::BuyRentKenya => Arc::new(BuyRentKenyaAdapter::new(client, base_url)?),
            SourceId::Property24 => Arc::new(Property24Adapter::new(client, base_url)?),
            SourceId::Jiji => Arc::new(JijiAdapter::new(client, base_url)),
        })
    }
}
