//! Listing ingestion: crawl the listing sites into the staging table under a
//! single-flight supervisor, and promote staged rows into canonical
//! properties.

pub mod api;
pub mod config;
pub mod orchestrator;
pub mod runlog;
pub mod supervisor;

pub use config::{ConfigDescriptor, ConfigError, CrawlLimits, IngestConfig};
pub use orchestrator::{
    CrawlConfig, CrawlConfigError, CrawlOutcome, Orchestrator, RunHandle, SiteOutcome,
};
pub use runlog::{LogLevel, LogLine, RunLog};
pub use supervisor::{
    AdapterProvider, FactoryProvider, RunState, RunStatus, Supervisor, SupervisorError,
};
