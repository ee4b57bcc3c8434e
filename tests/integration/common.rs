use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ingest_core::{Database, LocationField, PriceField, RawListing, SourceId};
use ingest_scrapers::{FetchError, RetryPolicy, SiteAdapter};
use listing_ingest::{AdapterProvider, CrawlLimits, Supervisor};
use tempfile::TempDir;
use tokio::sync::Notify;

/// What a scripted adapter does for one page.
#[derive(Clone)]
pub enum Step {
    Listings(Vec<RawListing>),
    Fail(FetchError),
    /// Fail with a transient error this many times, then serve the listings.
    Flaky(u32, Vec<RawListing>),
}

/// Holds the first fetch of a page until released, after announcing it was
/// reached. Later fetches of the same page pass straight through.
pub struct Gate {
    pub page: u32,
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
    fired: AtomicBool,
}

impl Gate {
    pub fn new(page: u32) -> Self {
        Self {
            page,
            reached: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
            fired: AtomicBool::new(false),
        }
    }
}

/// An in-process site. Pages missing from the script are empty.
pub struct ScriptedAdapter {
    source: SourceId,
    script: Mutex<HashMap<u32, Step>>,
    requested: Mutex<Vec<u32>>,
    gate: Option<Gate>,
}

impl ScriptedAdapter {
    pub fn new(source: SourceId) -> Self {
        Self {
            source,
            script: Mutex::new(HashMap::new()),
            requested: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn page(self, page: u32, step: Step) -> Self {
        self.script.lock().unwrap().insert(page, step);
        self
    }

    /// Pages `1..=pages`, each with `per_page` distinct listings.
    pub fn full_pages(mut self, pages: u32, per_page: u32) -> Self {
        for page in 1..=pages {
            let listings = (0..per_page)
                .map(|n| listing(self.source, &format!("p{page}-{n}"), 1_000_000 + n))
                .collect();
            self = self.page(page, Step::Listings(listings));
        }
        self
    }

    pub fn gated(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn requested(&self) -> Vec<u32> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl SiteAdapter for ScriptedAdapter {
    fn source(&self) -> SourceId {
        self.source
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<RawListing>, FetchError> {
        self.requested.lock().unwrap().push(page);

        if let Some(gate) = &self.gate {
            if gate.page == page && !gate.fired.swap(true, Ordering::SeqCst) {
                gate.reached.notify_one();
                gate.release.notified().await;
            }
        }

        let step = self.script.lock().unwrap().get(&page).cloned();
        match step {
            None => Ok(Vec::new()),
            Some(Step::Listings(listings)) => Ok(listings),
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Flaky(remaining, listings)) => {
                if remaining == 0 {
                    return Ok(listings);
                }
                self.script
                    .lock()
                    .unwrap()
                    .insert(page, Step::Flaky(remaining - 1, listings));
                Err(FetchError::Transient {
                    url: format!("https://{}.test/?page={page}", self.source),
                    reason: "HTTP 503".to_string(),
                })
            }
        }
    }
}

/// Hands out the same adapter instances to every run.
#[derive(Default)]
pub struct ScriptedProvider {
    adapters: HashMap<SourceId, Arc<ScriptedAdapter>>,
}

impl ScriptedProvider {
    pub fn with(mut self, adapter: ScriptedAdapter) -> Self {
        self.adapters.insert(adapter.source(), Arc::new(adapter));
        self
    }

    pub fn adapter(&self, source: SourceId) -> Arc<ScriptedAdapter> {
        Arc::clone(&self.adapters[&source])
    }
}

impl AdapterProvider for ScriptedProvider {
    fn adapters(&self, sites: &[SourceId]) -> Result<Vec<Arc<dyn SiteAdapter>>, FetchError> {
        Ok(sites
            .iter()
            .filter_map(|site| self.adapters.get(site))
            .map(|adapter| Arc::clone(adapter) as Arc<dyn SiteAdapter>)
            .collect())
    }
}

pub fn listing(source: SourceId, slug: &str, price: u32) -> RawListing {
    let mut listing = RawListing::new(source, format!("https://{source}.test/listings/{slug}"));
    listing.title = Some(format!("Listing {slug}"));
    listing.price = Some(PriceField::Text(format!("KSh {price}")));
    listing.location = Some(LocationField::Text("Kileleshwa, Nairobi".to_string()));
    listing.bedrooms = Some(3);
    listing
}

pub async fn temp_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("listings.db")).await.unwrap();
    (dir, db)
}

pub fn supervisor(db: Database, provider: Arc<ScriptedProvider>) -> Supervisor {
    Supervisor::new(
        db,
        CrawlLimits {
            default_pages: 5,
            max_pages: 20,
        },
        RetryPolicy::new(3, std::time::Duration::ZERO),
        provider,
    )
}

pub fn structure_error(source: SourceId, page: u32) -> FetchError {
    FetchError::Structure {
        url: format!("https://{source}.test/?page={page}"),
        page,
        reason: "missing search result list".to_string(),
    }
}
