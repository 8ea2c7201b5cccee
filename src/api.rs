//! HTTP API.
//!
//! A thin JSON layer over the store and the pipelines. Scans and monitor runs
//! are spawned onto the runtime and the request returns immediately; their
//! outcome only shows up in the logs and, later, in `/events`.
//!
//! Errors are returned as `{"detail": "..."}` with a status derived from the
//! [`Error`] variant.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, instrument};
use url::Url;

use crate::error::{Error, Result};
use crate::models::{Event, PromptTemplate, Source, SourceSummary};
use crate::pipeline::Pipeline;
use crate::pipeline::monitor::DEFAULT_MONITOR_URL;
use crate::report;

#[derive(Clone)]
pub struct AppState {
    pipeline: Pipeline,
}

/// [`Error`] as an HTTP response.
pub struct AppError(Error);

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::InvalidInput(_) | Error::InvalidUrl(_) | Error::Prompt(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, AppError>;

pub fn router(pipeline: Pipeline) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/websites", get(list_websites).post(add_website))
        .route("/websites/{id}", delete(delete_website))
        .route("/events", get(list_events))
        .route("/scan/{id}", post(scan_website))
        .route("/monitor", post(start_monitor))
        .route("/prompts", get(list_prompts))
        .route("/prompts/{name}", get(get_prompt).post(update_prompt))
        .route("/report/daily", get(daily_report))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { pipeline })
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(pipeline: Pipeline, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "API listening");
    axum::serve(listener, router(pipeline)).await?;
    Ok(())
}

// --- websites ---

async fn list_websites(State(state): State<AppState>) -> ApiResult<Json<Vec<SourceSummary>>> {
    Ok(Json(state.pipeline.store().sources_with_counts().await?))
}

#[derive(Debug, Deserialize)]
struct NewSource {
    #[serde(default)]
    id: Option<String>,
    name: String,
    url: String,
    #[serde(default)]
    description: Option<String>,
}

fn validate_source_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw.trim())?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::InvalidInput(format!("unsupported URL scheme '{other}'"))),
    }
}

#[instrument(level = "info", skip_all, fields(name = %body.name, url = %body.url))]
async fn add_website(
    State(state): State<AppState>,
    Json(body): Json<NewSource>,
) -> ApiResult<Json<Source>> {
    if body.name.trim().is_empty() {
        return Err(Error::InvalidInput("name must not be empty".to_string()).into());
    }
    validate_source_url(&body.url)?;

    let mut source = Source::new(body.name.trim(), body.url.trim(), body.description.as_deref());
    if let Some(id) = body.id.filter(|id| !id.trim().is_empty()) {
        source.id = id;
    }
    Ok(Json(state.pipeline.store().add_source(source).await?))
}

async fn delete_website(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.pipeline.store().delete_source(&id).await?;
    Ok(Json(json!({ "status": "success" })))
}

// --- events and runs ---

async fn list_events(State(state): State<AppState>) -> ApiResult<Json<Vec<Event>>> {
    Ok(Json(state.pipeline.store().events().await?))
}

async fn scan_website(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let source = state.pipeline.store().source(&id).await?;
    let name = source.name.clone();
    info!(%name, "Starting background scan");

    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        pipeline.scan_source(&source).await;
    });
    Ok(Json(json!({ "status": "Scan started", "website": name })))
}

#[derive(Debug, Deserialize)]
struct MonitorRequest {
    #[serde(default)]
    source_url: Option<String>,
}

/// The body is optional; an empty body watches [`DEFAULT_MONITOR_URL`].
async fn start_monitor(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let request: Option<MonitorRequest> = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(
            serde_json::from_slice(&body)
                .map_err(|e| Error::InvalidInput(format!("invalid monitor request: {e}")))?,
        )
    };
    let source_url = request
        .and_then(|req| req.source_url)
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| DEFAULT_MONITOR_URL.to_string());
    validate_source_url(&source_url)?;
    info!(%source_url, "Starting background monitor run");

    let pipeline = state.pipeline.clone();
    let url = source_url.clone();
    tokio::spawn(async move {
        pipeline.monitor(&url).await;
    });
    Ok(Json(json!({ "status": "Monitor started", "source_url": source_url })))
}

// --- prompts ---

async fn list_prompts(State(state): State<AppState>) -> ApiResult<Json<Vec<PromptTemplate>>> {
    Ok(Json(state.pipeline.store().prompts().await?))
}

async fn get_prompt(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<PromptTemplate>> {
    Ok(Json(state.pipeline.store().prompt(&name).await?))
}

/// Accepts the full template object as sent back by a client; only
/// `template` and `description` are applied.
#[derive(Debug, Deserialize)]
struct PromptUpdate {
    template: String,
    #[serde(default)]
    description: Option<String>,
}

#[instrument(level = "info", skip(state, body))]
async fn update_prompt(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<PromptUpdate>,
) -> ApiResult<Json<PromptTemplate>> {
    let store = state.pipeline.store();
    let current = store.prompt(&name).await?;

    // Reject templates that the pipelines could not fill.
    let mut candidate = current.clone();
    candidate.template = body.template.clone();
    let vars: Vec<(&str, &str)> = current
        .input_variables
        .iter()
        .map(|v| (v.as_str(), ""))
        .collect();
    candidate.render(&vars)?;

    Ok(Json(store.update_prompt(&name, body.template, body.description).await?))
}

// --- report ---

#[derive(Debug, Deserialize)]
struct ReportQuery {
    #[serde(default)]
    date: Option<NaiveDate>,
}

async fn daily_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<String> {
    Ok(report::daily_report(state.pipeline.store(), query.date).await?)
}
