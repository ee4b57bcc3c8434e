use axum::{
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use ingest_core::{
    Database, ImportReport, Importer, IngestError, ListingFilter, ListingPage, RunId,
    SourceId, SourceStats,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ConfigDescriptor;
use crate::orchestrator::CrawlConfig;
use crate::runlog::LogLine;
use crate::supervisor::{RunStatus, Supervisor, SupervisorError};

/// Batch size used when an import request does not name one.
pub const DEFAULT_IMPORT_BATCH: u32 = 100;

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Supervisor,
    pub importer: Importer,
}

impl AppState {
    pub fn new(supervisor: Supervisor) -> Self {
        let importer = Importer::new(supervisor.database().clone());
        Self {
            supervisor,
            importer,
        }
    }

    fn db(&self) -> &Database {
        self.supervisor.database()
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: DateTime<Utc>,
}

impl ResponseMeta {
    fn now() -> Self {
        Self {
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            meta: ResponseMeta::now(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" | "no_active_run" => StatusCode::NOT_FOUND,
            "bad_request" | "invalid_config" => StatusCode::BAD_REQUEST,
            "already_running" | "not_running" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl From<SupervisorError> for ApiError {
    fn from(error: SupervisorError) -> Self {
        let code = match &error {
            SupervisorError::AlreadyRunning { .. } => "already_running",
            SupervisorError::InvalidConfig(_) => "invalid_config",
            SupervisorError::Launch { .. } => "launch_failed",
            SupervisorError::NoActiveRun => "no_active_run",
            SupervisorError::NotFound(_) => "not_found",
            SupervisorError::NotRunning(_) => "not_running",
        };
        ApiError::new(code, error.to_string())
    }
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        match error {
            IngestError::InvalidBatchSize(_) | IngestError::InvalidSource(_) => {
                ApiError::new("bad_request", error.to_string())
            }
            other => {
                tracing::error!(error = %other, "store operation failed");
                ApiError::new("internal_error", "database operation failed")
            }
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn respond<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        data,
        meta: ResponseMeta::now(),
    })
}

fn parse_sources(names: &[String]) -> Result<Vec<SourceId>, ApiError> {
    names
        .iter()
        .map(|name| {
            name.parse::<SourceId>()
                .map_err(|e| ApiError::new("invalid_config", e.to_string()))
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default)]
    pub pages: Option<u32>,
    #[serde(default)]
    pub sites: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartData {
    process_id: RunId,
}

async fn start_scrape(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<(StatusCode, Json<ApiResponse<StartData>>), ApiError> {
    let defaults = state.supervisor.default_crawl();
    let sites = match request.sites.as_deref() {
        Some(names) if !names.is_empty() => parse_sources(names)?,
        _ => defaults.sites,
    };
    let config = CrawlConfig::new(request.pages.unwrap_or(defaults.page_limit), sites);
    let process_id = state.supervisor.start(config)?;
    Ok((StatusCode::ACCEPTED, respond(StartData { process_id })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRequest {
    #[serde(default)]
    pub process_id: Option<RunId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopData {
    process_id: RunId,
    acknowledged: bool,
}

async fn stop_scrape(
    State(state): State<AppState>,
    Json(request): Json<StopRequest>,
) -> ApiResult<StopData> {
    let process_id = state.supervisor.cancel(request.process_id)?;
    Ok(respond(StopData {
        process_id,
        acknowledged: true,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusData {
    total_listings: i64,
    imported_listings: i64,
    pending_listings: i64,
    per_source_stats: Vec<SourceStats>,
    is_scraping: bool,
    active_run: Option<RunStatus>,
    last_run: Option<RunStatus>,
}

async fn scrape_status(State(state): State<AppState>) -> ApiResult<StatusData> {
    let stats = state.db().listing_stats().await?;
    let active_run = state
        .supervisor
        .active_run()
        .and_then(|id| state.supervisor.status(Some(id)));
    Ok(respond(StatusData {
        total_listings: stats.total,
        imported_listings: stats.imported,
        pending_listings: stats.pending,
        per_source_stats: stats.per_source,
        is_scraping: active_run.is_some(),
        active_run,
        last_run: state.supervisor.status(None),
    }))
}

async fn list_runs(State(state): State<AppState>) -> ApiResult<Vec<RunStatus>> {
    Ok(respond(state.supervisor.runs()))
}

async fn get_run(State(state): State<AppState>, Path(id): Path<RunId>) -> ApiResult<RunStatus> {
    state
        .supervisor
        .status(Some(id))
        .map(respond)
        .ok_or_else(|| SupervisorError::NotFound(id).into())
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub since: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogsData {
    process_id: RunId,
    lines: Vec<LogLine>,
    next_offset: usize,
}

async fn run_logs(
    State(state): State<AppState>,
    Path(id): Path<RunId>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<LogsData> {
    let since = query.since.unwrap_or(0);
    let lines = state.supervisor.logs_since(id, since)?;
    let next_offset = lines.last().map(|line| line.seq + 1).unwrap_or(since);
    Ok(respond(LogsData {
        process_id: id,
        lines,
        next_offset,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListingsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub source: Option<String>,
    pub imported: Option<bool>,
}

async fn list_listings(
    State(state): State<AppState>,
    Query(query): Query<ListingsQuery>,
) -> ApiResult<ListingPage> {
    let source = query
        .source
        .as_deref()
        .map(str::parse::<SourceId>)
        .transpose()?;
    let defaults = ListingFilter::default();
    let filter = ListingFilter {
        source,
        imported: query.imported,
        page: query.page.unwrap_or(defaults.page),
        limit: query.limit.unwrap_or(defaults.limit),
    };
    Ok(respond(state.db().list_listings(&filter).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    #[serde(default)]
    pub batch_size: Option<u32>,
}

async fn trigger_import(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> ApiResult<ImportReport> {
    let batch_size = request.batch_size.unwrap_or(DEFAULT_IMPORT_BATCH);
    Ok(respond(state.importer.import_batch(batch_size).await?))
}

async fn scrape_config(State(state): State<AppState>) -> ApiResult<ConfigDescriptor> {
    Ok(respond(state.supervisor.config_descriptor()))
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct HealthData {
    status: &'static str,
    database: &'static str,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.db().ping().await {
        Ok(()) => (
            StatusCode::OK,
            respond(HealthData {
                status: "ok",
                database: "ok",
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                respond(HealthData {
                    status: "degraded",
                    database: "unavailable",
                }),
            )
        }
    }
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/scrape/start", post(start_scrape))
        .route("/api/scrape/stop", post(stop_scrape))
        .route("/api/scrape/status", get(scrape_status))
        .route("/api/scrape/config", get(scrape_config))
        .route("/api/scrape/runs", get(list_runs))
        .route("/api/scrape/runs/{id}", get(get_run))
        .route("/api/scrape/logs/{id}", get(run_logs))
        .route("/api/listings", get(list_listings))
        .route("/api/import", post(trigger_import))
        .layer(build_cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
