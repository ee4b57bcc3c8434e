//! Single-flight crawl supervision.
//!
//! The supervisor owns the run registry: at most one run is pending or
//! running at a time, finished runs stay in a bounded in-memory history, and
//! every run executes in its own task watched by a monitor task that records
//! the terminal state.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use ingest_core::{Database, RunId, SourceId};
use ingest_scrapers::{AdapterFactory, AdapterSettings, FetchError, RetryPolicy, SiteAdapter};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{info, warn};

use crate::config::{ConfigDescriptor, ConfigError, CrawlLimits, IngestConfig};
use crate::orchestrator::{CrawlConfig, CrawlConfigError, CrawlOutcome, Orchestrator, RunHandle};
use crate::runlog::LogLine;

/// Finished runs kept for status and log queries.
pub const RUN_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("a crawl is already running (process {process_id})")]
    AlreadyRunning { process_id: RunId },

    #[error("invalid crawl configuration: {0}")]
    InvalidConfig(#[from] CrawlConfigError),

    #[error("failed to launch crawl {process_id}: {reason}")]
    Launch { process_id: RunId, reason: String },

    #[error("no crawl is running")]
    NoActiveRun,

    #[error("run {0} not found")]
    NotFound(RunId),

    #[error("run {0} is not running")]
    NotRunning(RunId),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed | RunState::Cancelled)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub process_id: RunId,
    pub state: RunState,
    pub config: CrawlConfig,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Time since start, frozen once the run is terminal.
    pub elapsed_ms: u64,
    pub cancel_requested: bool,
    pub error: Option<String>,
    pub outcome: Option<CrawlOutcome>,
    pub log_lines: usize,
}

/// Builds the adapters for a run.
pub trait AdapterProvider: Send + Sync {
    fn adapters(&self, sites: &[SourceId]) -> std::result::Result<Vec<Arc<dyn SiteAdapter>>, FetchError>;
}

/// The live site adapters.
pub struct FactoryProvider {
    settings: AdapterSettings,
}

impl FactoryProvider {
    pub fn new(settings: AdapterSettings) -> Self {
        Self { settings }
    }
}

impl AdapterProvider for FactoryProvider {
    fn adapters(&self, sites: &[SourceId]) -> std::result::Result<Vec<Arc<dyn SiteAdapter>>, FetchError> {
        AdapterFactory::create_all(sites, &self.settings)
    }
}

struct RunRecord {
    handle: RunHandle,
    state: RunState,
    config: CrawlConfig,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    cancel_requested: bool,
    error: Option<String>,
    outcome: Option<CrawlOutcome>,
    state_tx: watch::Sender<RunState>,
}

impl RunRecord {
    fn status(&self) -> RunStatus {
        RunStatus {
            process_id: self.handle.id(),
            state: self.state,
            config: self.config.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            elapsed_ms: self.elapsed_ms(),
            cancel_requested: self.cancel_requested,
            error: self.error.clone(),
            outcome: self.outcome.clone(),
            log_lines: self.handle.log().len(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        u64::try_from((end - self.started_at).num_milliseconds()).unwrap_or(0)
    }

    fn set_state(&mut self, state: RunState) {
        self.state = state;
        if state.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.state_tx.send_replace(state);
    }
}

#[derive(Default)]
struct Registry {
    last_id: RunId,
    active: Option<RunId>,
    runs: VecDeque<RunRecord>,
}

impl Registry {
    fn get(&self, id: RunId) -> Option<&RunRecord> {
        self.runs.iter().find(|run| run.handle.id() == id)
    }

    fn get_mut(&mut self, id: RunId) -> Option<&mut RunRecord> {
        self.runs.iter_mut().find(|run| run.handle.id() == id)
    }

    fn evict(&mut self) {
        while self.runs.len() > RUN_HISTORY_LIMIT {
            match self.runs.iter().position(|run| run.state.is_terminal()) {
                Some(index) => {
                    self.runs.remove(index);
                }
                None => break,
            }
        }
    }
}

struct Inner {
    db: Database,
    limits: CrawlLimits,
    retry: RetryPolicy,
    provider: Arc<dyn AdapterProvider>,
    registry: Mutex<Registry>,
}

#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        db: Database,
        limits: CrawlLimits,
        retry: RetryPolicy,
        provider: Arc<dyn AdapterProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                limits,
                retry,
                provider,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// A supervisor driving the live site adapters.
    pub fn from_config(db: Database, config: &IngestConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let provider = FactoryProvider::new(config.adapter_settings()?);
        Ok(Self::new(db, config.limits(), config.retry_policy(), Arc::new(provider)))
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    pub fn config_descriptor(&self) -> ConfigDescriptor {
        ConfigDescriptor::from(self.inner.limits)
    }

    /// A crawl with the default page limit over every site.
    pub fn default_crawl(&self) -> CrawlConfig {
        CrawlConfig::new(self.inner.limits.default_pages, SourceId::ALL.to_vec())
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a crawl in the background and return its process id.
    pub fn start(&self, config: CrawlConfig) -> Result<RunId> {
        config.validate(self.inner.limits.max_pages)?;

        let handle = {
            let mut registry = self.registry();
            if let Some(process_id) = registry.active {
                return Err(SupervisorError::AlreadyRunning { process_id });
            }
            registry.last_id += 1;
            let handle = RunHandle::new(registry.last_id);
            let (state_tx, _) = watch::channel(RunState::Pending);
            registry.runs.push_back(RunRecord {
                handle: handle.clone(),
                state: RunState::Pending,
                config: config.clone(),
                started_at: Utc::now(),
                finished_at: None,
                cancel_requested: false,
                error: None,
                outcome: None,
                state_tx,
            });
            registry.active = Some(handle.id());
            registry.evict();
            handle
        };
        let id = handle.id();

        let adapters = match self.inner.provider.adapters(&config.sites) {
            Ok(adapters) => adapters,
            Err(e) => {
                let reason = e.to_string();
                handle.log().error(format!("Failed to launch run {id}: {reason}"));
                let mut registry = self.registry();
                if let Some(run) = registry.get_mut(id) {
                    run.error = Some(reason.clone());
                    run.set_state(RunState::Failed);
                }
                if registry.active == Some(id) {
                    registry.active = None;
                }
                return Err(SupervisorError::Launch {
                    process_id: id,
                    reason,
                });
            }
        };

        if let Some(run) = self.registry().get_mut(id) {
            run.set_state(RunState::Running);
        }
        info!(run_id = id, "Starting crawl over {} sites", config.sites.len());

        let orchestrator = Orchestrator::new(self.inner.db.clone(), adapters, self.inner.retry);
        let task_handle = handle.clone();
        let task = tokio::spawn(async move { orchestrator.run(&config, &task_handle).await });

        let supervisor = self.clone();
        tokio::spawn(async move {
            let result = task.await;
            supervisor.finish(id, result);
        });

        Ok(id)
    }

    fn finish(&self, id: RunId, result: std::result::Result<ingest_core::Result<CrawlOutcome>, JoinError>) {
        let mut registry = self.registry();
        if let Some(run) = registry.get_mut(id) {
            let log = run.handle.log().clone();
            match result {
                Ok(Ok(outcome)) => {
                    let state = if outcome.cancelled {
                        RunState::Cancelled
                    } else {
                        RunState::Completed
                    };
                    run.outcome = Some(outcome);
                    run.set_state(state);
                    log.info(format!("Run {id} {state}"));
                }
                Ok(Err(e)) => {
                    run.error = Some(e.to_string());
                    run.set_state(RunState::Failed);
                    log.error(format!("Run {id} failed: {e}"));
                }
                Err(e) => {
                    let reason = if e.is_panic() {
                        "crawl task panicked".to_string()
                    } else {
                        "crawl task was aborted".to_string()
                    };
                    run.error = Some(reason.clone());
                    run.set_state(RunState::Failed);
                    log.error(format!("Run {id} failed: {reason}"));
                }
            }
        } else {
            warn!(run_id = id, "Finished run is no longer in the registry");
        }
        if registry.active == Some(id) {
            registry.active = None;
        }
        registry.evict();
    }

    /// Status of `id`, or of the active run (falling back to the most
    /// recent one) when no id is given.
    pub fn status(&self, id: Option<RunId>) -> Option<RunStatus> {
        let registry = self.registry();
        let id = id.or(registry.active).or_else(|| registry.runs.back().map(|run| run.handle.id()))?;
        registry.get(id).map(RunRecord::status)
    }

    /// Ask `id` (or the active run) to stop before its next page.
    pub fn cancel(&self, id: Option<RunId>) -> Result<RunId> {
        let mut registry = self.registry();
        let id = match id.or(registry.active) {
            Some(id) => id,
            None => return Err(SupervisorError::NoActiveRun),
        };
        let run = registry.get_mut(id).ok_or(SupervisorError::NotFound(id))?;
        if run.state.is_terminal() {
            return Err(SupervisorError::NotRunning(id));
        }
        if !run.cancel_requested {
            run.cancel_requested = true;
            run.handle.cancel();
            run.handle.log().warn(format!("Cancellation requested for run {id}"));
        }
        Ok(id)
    }

    pub fn logs(&self, id: RunId) -> Result<Vec<LogLine>> {
        self.logs_since(id, 0)
    }

    pub fn logs_since(&self, id: RunId, offset: usize) -> Result<Vec<LogLine>> {
        let log = self
            .registry()
            .get(id)
            .map(|run| run.handle.log().clone())
            .ok_or(SupervisorError::NotFound(id))?;
        Ok(log.since(offset))
    }

    /// Resolve once `id` reaches a terminal state.
    pub async fn wait(&self, id: RunId) -> Result<RunState> {
        let mut rx = {
            let registry = self.registry();
            let run = registry.get(id).ok_or(SupervisorError::NotFound(id))?;
            run.state_tx.subscribe()
        };
        let state = match rx.wait_for(RunState::is_terminal).await {
            Ok(state) => *state,
            // The record was evicted; it can only have been terminal.
            Err(_) => self
                .status(Some(id))
                .map(|status| status.state)
                .unwrap_or(RunState::Failed),
        };
        Ok(state)
    }

    pub fn is_running(&self) -> bool {
        self.registry().active.is_some()
    }

    pub fn active_run(&self) -> Option<RunId> {
        self.registry().active
    }

    /// Every run still in history, newest first.
    pub fn runs(&self) -> Vec<RunStatus> {
        self.registry().runs.iter().rev().map(RunRecord::status).collect()
    }
}
