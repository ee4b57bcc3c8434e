//! Drives the site adapters for one crawl run.
//!
//! Sites are crawled one after another and pages in order, stopping a site at
//! its first empty page or at the page limit. Every fetched page is staged in
//! a single transaction, so cancellation (checked before each fetch) never
//! leaves half a page behind. A site that keeps failing is recorded and
//! skipped; only store failures end the run.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use ingest_core::{Database, RunId, SourceId};
use ingest_scrapers::{fetch_with_retry, RetryPolicy, SiteAdapter};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::runlog::RunLog;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrawlConfigError {
    #[error("page limit {page_limit} must be between 1 and {max_pages}")]
    PageLimit { page_limit: u32, max_pages: u32 },

    #[error("at least one site must be selected")]
    NoSites,

    #[error("site {0} is listed more than once")]
    DuplicateSite(SourceId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlConfig {
    pub page_limit: u32,
    pub sites: Vec<SourceId>,
}

impl CrawlConfig {
    pub fn new(page_limit: u32, sites: Vec<SourceId>) -> Self {
        Self { page_limit, sites }
    }

    pub fn validate(&self, max_pages: u32) -> Result<(), CrawlConfigError> {
        if self.page_limit == 0 || self.page_limit > max_pages {
            return Err(CrawlConfigError::PageLimit {
                page_limit: self.page_limit,
                max_pages,
            });
        }
        if self.sites.is_empty() {
            return Err(CrawlConfigError::NoSites);
        }
        let mut seen = HashSet::new();
        for site in &self.sites {
            if !seen.insert(*site) {
                return Err(CrawlConfigError::DuplicateSite(*site));
            }
        }
        Ok(())
    }
}

/// Counters for one site within a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteOutcome {
    pub pages_fetched: u32,
    pub records_staged: u32,
    pub records_inserted: u32,
    pub records_updated: u32,
    pub errors: u32,
    /// The site ran out of results before the page limit.
    pub exhausted: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlOutcome {
    pub sites: BTreeMap<SourceId, SiteOutcome>,
    pub cancelled: bool,
}

impl CrawlOutcome {
    pub fn records_staged(&self) -> u32 {
        self.sites.values().map(|site| site.records_staged).sum()
    }

    pub fn site_errors(&self) -> u32 {
        self.sites.values().map(|site| site.errors).sum()
    }
}

/// What a running crawl shares with its supervisor: its id, its log and
/// its cancellation token.
#[derive(Debug, Clone)]
pub struct RunHandle {
    id: RunId,
    log: Arc<RunLog>,
    cancel: CancellationToken,
}

impl RunHandle {
    pub fn new(id: RunId) -> Self {
        Self {
            id,
            log: Arc::new(RunLog::new(id)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn log(&self) -> &Arc<RunLog> {
        &self.log
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct Orchestrator {
    db: Database,
    adapters: Vec<Arc<dyn SiteAdapter>>,
    retry: RetryPolicy,
}

enum SiteEnd {
    Finished,
    Cancelled,
}

impl Orchestrator {
    pub fn new(db: Database, adapters: Vec<Arc<dyn SiteAdapter>>, retry: RetryPolicy) -> Self {
        Self {
            db,
            adapters,
            retry,
        }
    }

    pub async fn run(
        &self,
        config: &CrawlConfig,
        handle: &RunHandle,
    ) -> ingest_core::Result<CrawlOutcome> {
        let log = handle.log();
        let sites: Vec<&str> = config.sites.iter().map(SourceId::as_str).collect();
        log.info(format!(
            "Run {} started: sites [{}], up to {} pages each",
            handle.id(),
            sites.join(", "),
            config.page_limit
        ));

        let mut outcome = CrawlOutcome::default();
        for site in &config.sites {
            let mut site_outcome = SiteOutcome::default();
            let end = match self.adapters.iter().find(|a| a.source() == *site) {
                Some(adapter) => {
                    self.crawl_site(adapter.as_ref(), config.page_limit, handle, &mut site_outcome)
                        .await
                }
                None => {
                    let message = format!("no adapter available for {site}");
                    log.error(format!("{site}: {message}"));
                    site_outcome.errors += 1;
                    site_outcome.last_error = Some(message);
                    Ok(SiteEnd::Finished)
                }
            };

            let end = match end {
                Ok(end) => end,
                Err(e) => {
                    log.error(format!("{site}: store failure, aborting run: {e}"));
                    return Err(e);
                }
            };

            outcome.sites.insert(*site, site_outcome);
            if let SiteEnd::Cancelled = end {
                outcome.cancelled = true;
                break;
            }
        }

        if outcome.cancelled {
            log.warn(format!(
                "Run {} cancelled after staging {} records",
                handle.id(),
                outcome.records_staged()
            ));
        } else {
            log.info(format!(
                "Run {} finished: {} records staged across {} sites, {} site errors",
                handle.id(),
                outcome.records_staged(),
                outcome.sites.len(),
                outcome.site_errors()
            ));
        }
        Ok(outcome)
    }

    async fn crawl_site(
        &self,
        adapter: &dyn SiteAdapter,
        page_limit: u32,
        handle: &RunHandle,
        outcome: &mut SiteOutcome,
    ) -> ingest_core::Result<SiteEnd> {
        let log = handle.log();
        let site = adapter.source();

        for page in 1..=page_limit {
            if handle.is_cancelled() {
                log.warn(format!("{site}: cancellation requested, stopping before page {page}"));
                return Ok(SiteEnd::Cancelled);
            }

            let fetched = fetch_with_retry(adapter, page, &self.retry, |attempt, err, delay| {
                log.warn(format!(
                    "{site}: page {page} attempt {attempt} failed ({err}), retrying in {}ms",
                    delay.as_millis()
                ));
            })
            .await;

            let listings = match fetched {
                Ok(listings) => listings,
                Err(e) => {
                    outcome.errors += 1;
                    outcome.last_error = Some(e.to_string());
                    log.error(format!("{site}: page {page} failed, skipping site: {e}"));
                    return Ok(SiteEnd::Finished);
                }
            };

            if listings.is_empty() {
                outcome.exhausted = true;
                log.info(format!("{site}: page {page} is empty, no more results"));
                break;
            }

            outcome.pages_fetched += 1;
            log.info(format!("{site}: page {page} fetched, {} listings", listings.len()));

            let staged = self.db.stage_page(Some(handle.id()), &listings).await?;
            for result in &staged {
                if result.is_inserted() {
                    outcome.records_inserted += 1;
                    log.debug(format!("{site}: listing #{} inserted", result.id()));
                } else {
                    outcome.records_updated += 1;
                    log.debug(format!("{site}: listing #{} updated", result.id()));
                }
            }
            outcome.records_staged += staged.len() as u32;
        }

        log.info(format!(
            "{site}: done, {} pages, {} staged ({} new, {} updated)",
            outcome.pages_fetched,
            outcome.records_staged,
            outcome.records_inserted,
            outcome.records_updated
        ));
        Ok(SiteEnd::Finished)
    }
}
