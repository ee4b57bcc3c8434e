use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use ingest_core::SourceId;
use ingest_scrapers::{AdapterSettings, RetryPolicy, DEFAULT_USER_AGENT};
use serde::Serialize;
use thiserror::Error;
use url::Url;

/// Prefix of the per-site base URL overrides, e.g. `INGEST_BASE_URL_JIJI`.
pub const BASE_URL_ENV_PREFIX: &str = "INGEST_BASE_URL_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid URL: {reason}")]
    InvalidBaseUrl { var: String, reason: String },

    #[error("{var} does not name a known site")]
    UnknownSite { var: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Process-wide settings. Every field can come from a flag or from the
/// environment.
#[derive(Debug, Clone, Args)]
pub struct IngestConfig {
    /// SQLite database file (-d, --database)
    #[arg(short = 'd', long, env = "INGEST_DATABASE", default_value = "listings.db", global = true)]
    pub database: PathBuf,

    /// Pages per site when a crawl does not say
    #[arg(long, env = "INGEST_DEFAULT_PAGES", default_value_t = 5, global = true)]
    pub default_pages: u32,

    /// Upper bound on pages per site for any crawl
    #[arg(long, env = "INGEST_MAX_PAGES", default_value_t = 50, global = true)]
    pub max_pages: u32,

    /// Per-request timeout in seconds
    #[arg(long, env = "INGEST_FETCH_TIMEOUT_SECS", default_value_t = 20, global = true)]
    pub fetch_timeout_secs: u64,

    /// Attempts per page, including the first
    #[arg(long, env = "INGEST_RETRY_ATTEMPTS", default_value_t = 3, global = true)]
    pub retry_attempts: u32,

    /// Backoff before the first retry, in milliseconds
    #[arg(long, env = "INGEST_RETRY_BASE_MS", default_value_t = 500, global = true)]
    pub retry_base_ms: u64,

    #[arg(long, env = "INGEST_USER_AGENT", default_value = DEFAULT_USER_AGENT, global = true)]
    pub user_agent: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("listings.db"),
            default_pages: 5,
            max_pages: 50,
            fetch_timeout_secs: 20,
            retry_attempts: 3,
            retry_base_ms: 500,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pages == 0 {
            return Err(ConfigError::Invalid("max pages must be at least 1".into()));
        }
        if self.default_pages == 0 || self.default_pages > self.max_pages {
            return Err(ConfigError::Invalid(format!(
                "default pages {} must be between 1 and max pages {}",
                self.default_pages, self.max_pages
            )));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Invalid("retry attempts must be at least 1".into()));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch timeout must be at least 1 second".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Duration::from_millis(self.retry_base_ms))
    }

    pub fn limits(&self) -> CrawlLimits {
        CrawlLimits {
            default_pages: self.default_pages,
            max_pages: self.max_pages,
        }
    }

    /// Adapter settings, with base URL overrides read from the environment.
    pub fn adapter_settings(&self) -> Result<AdapterSettings, ConfigError> {
        self.adapter_settings_from(std::env::vars())
    }

    pub fn adapter_settings_from<I>(&self, vars: I) -> Result<AdapterSettings, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(AdapterSettings {
            timeout: Duration::from_secs(self.fetch_timeout_secs),
            user_agent: self.user_agent.clone(),
            base_urls: base_url_overrides(vars)?,
        })
    }
}

fn base_url_overrides<I>(vars: I) -> Result<HashMap<SourceId, Url>, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut overrides = HashMap::new();
    for (var, value) in vars {
        let Some(site) = var.strip_prefix(BASE_URL_ENV_PREFIX) else {
            continue;
        };
        let source: SourceId = site
            .to_lowercase()
            .parse()
            .map_err(|_| ConfigError::UnknownSite { var: var.clone() })?;
        let url = Url::parse(value.trim()).map_err(|e| ConfigError::InvalidBaseUrl {
            var: var.clone(),
            reason: e.to_string(),
        })?;
        overrides.insert(source, url);
    }
    Ok(overrides)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlLimits {
    pub default_pages: u32,
    pub max_pages: u32,
}

impl Default for CrawlLimits {
    fn default() -> Self {
        IngestConfig::default().limits()
    }
}

/// What a control-plane client may ask a crawl for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDescriptor {
    pub available_sites: Vec<SourceId>,
    pub default_pages: u32,
    pub max_pages: u32,
}

impl From<CrawlLimits> for ConfigDescriptor {
    fn from(limits: CrawlLimits) -> Self {
        Self {
            available_sites: SourceId::ALL.to_vec(),
            default_pages: limits.default_pages,
            max_pages: limits.max_pages,
        }
    }
}
