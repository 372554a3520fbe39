// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! HTTP server and API handlers.
//!
//! Routes:
//! - `HEAD/GET /data/dataset.parquet` - dataset bytes, byte ranges honored.
//! - `GET /data/metadata.json` - column roles plus the database descriptor.
//! - `GET/POST /data/cache/:name` - session entries of this dataset.
//! - `GET/POST /data/query` - SQL against the dataset.
//! - `POST /data/selection` - export of matching rows.
//! - `GET /data/archive.zip` - offline bundle.
//! - everything else - the static frontend, `index.html` for unknown paths.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, error, info, warn};

use crate::config::{AUTO_PORT_ATTEMPTS, DatabaseMode, ServerConfig};
use crate::dataset::{DatasetError, DatasetStore};
use crate::query::{QueryEngine, QueryError, QueryOutput, QueryRequest, SelectionRequest};
use crate::ranged::MemoizedContent;
use crate::session::{SessionCache, SessionError};

/// Application state shared across handlers.
pub struct AppState {
    pub dataset: Arc<DatasetStore>,
    pub engine: Arc<QueryEngine>,
    pub sessions: SessionCache,
    pub database: DatabaseMode,
    pub static_dir: PathBuf,
    dataset_bytes: MemoizedContent,
}

impl AppState {
    pub fn new(dataset: Arc<DatasetStore>, config: &ServerConfig) -> Self {
        let engine = Arc::new(QueryEngine::new(dataset.clone(), config.scratch_dir.clone()));
        let source = dataset.clone();
        let dataset_bytes = MemoizedContent::new("application/octet-stream", move || {
            Ok(source.parquet_bytes()?)
        });
        Self {
            dataset,
            engine,
            sessions: SessionCache::new(&config.cache_root),
            database: config.database.clone(),
            static_dir: config.static_dir.clone(),
            dataset_bytes,
        }
    }

    fn dataset_id(&self) -> String {
        self.dataset.identifier().as_str().to_string()
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&state.static_dir)
        .fallback(ServeFile::new(state.static_dir.join("index.html")));

    Router::new()
        .route("/data/dataset.parquet", get(dataset_handler))
        .route("/data/metadata.json", get(metadata_handler))
        .route("/data/cache/:name", get(get_cache_handler).post(set_cache_handler))
        .route("/data/query", get(get_query_handler).post(post_query_handler))
        .route("/data/selection", post(selection_handler))
        .route("/data/archive.zip", get(archive_handler))
        .fallback_service(static_files)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server and serve until `shutdown` resolves.
pub async fn run_server<F>(
    state: Arc<AppState>,
    config: &ServerConfig,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = bind(config).await?;
    let port = listener.local_addr()?.port();

    info!(url = %format!("http://{}:{}", config.host, port), "Server running");
    eprintln!("Press Ctrl+C to stop\n");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Bind `host:port`, or the first free port after it when auto-port is enabled.
pub async fn bind(config: &ServerConfig) -> anyhow::Result<TcpListener> {
    let attempts = if config.auto_port { AUTO_PORT_ATTEMPTS } else { 1 };
    let mut last_error = None;
    for offset in 0..attempts {
        let Some(port) = config.port.checked_add(offset) else {
            break;
        };
        match TcpListener::bind((config.host.as_str(), port)).await {
            Ok(listener) => {
                if offset > 0 {
                    info!(
                        requested = config.port,
                        port,
                        "Requested port busy, using next free port"
                    );
                }
                return Ok(listener);
            }
            Err(e) => {
                debug!(port, error = %e, "Port unavailable");
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) => Err(anyhow::anyhow!(
            "cannot bind {}:{} ({} attempts): {}",
            config.host,
            config.port,
            attempts,
            e
        )),
        None => Err(anyhow::anyhow!("no port available after {}", config.port)),
    }
}

/// Run a blocking job on the worker pool.
pub async fn run_blocking<T, E, F>(job: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    match tokio::task::spawn_blocking(job).await {
        Ok(result) => result.map_err(Into::into),
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler errors with their HTTP status.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request body or parameter.
    BadRequest(String),
    /// The analytic engine rejected the statement.
    Query(QueryError),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => {
                debug!(error = %message, "Rejected request");
                (StatusCode::BAD_REQUEST, message)
            }
            ApiError::Query(e) => {
                warn!(error = %e, "Query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::Internal(e) => {
                error!(error = %e, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        ApiError::Query(e)
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidName(_) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<DatasetError> for ApiError {
    fn from(e: DatasetError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl From<JoinError> for ApiError {
    fn from(e: JoinError) -> Self {
        ApiError::Internal(anyhow::anyhow!("worker task failed: {}", e))
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid request body: {}", e)))
}

// ============================================================================
// Handlers
// ============================================================================

async fn dataset_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    state.dataset_bytes.respond(&headers).await
}

async fn metadata_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut metadata = state.dataset.metadata_json()?;
    if let Some(object) = metadata.as_object_mut() {
        object.insert("database".to_string(), state.database.descriptor());
    }
    Ok(Json(metadata))
}

async fn set_cache_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let value: serde_json::Value = parse_body(&body)?;
    let id = state.dataset_id();
    run_blocking(move || state.sessions.set(&id, &name, &value)).await?;
    Ok(Json(serde_json::json!({})))
}

async fn get_cache_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let id = state.dataset_id();
    let entry = run_blocking(move || state.sessions.get(&id, &name)).await?;
    Ok(match entry {
        Some(value) => Json(value).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    })
}

#[derive(Deserialize)]
struct QueryParams {
    query: String,
}

async fn get_query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Response, ApiError> {
    let request = parse_body(params.query.as_bytes())?;
    run_query(state, request).await
}

async fn post_query_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = parse_body(&body)?;
    run_query(state, request).await
}

async fn run_query(state: Arc<AppState>, request: QueryRequest) -> Result<Response, ApiError> {
    debug!(format = ?request.format, sql = %request.sql, "Query");
    let engine = state.engine.clone();
    let output = run_blocking(move || engine.execute(&request.sql, request.format)).await?;
    Ok(match output {
        QueryOutput::Ack => Json(serde_json::json!({})).into_response(),
        QueryOutput::Arrow(bytes) => {
            ([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response()
        }
        QueryOutput::Json(bytes) => {
            ([(header::CONTENT_TYPE, "application/json")], bytes).into_response()
        }
    })
}

async fn selection_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: SelectionRequest = parse_body(&body)?;
    let engine = state.engine.clone();
    let bytes =
        run_blocking(move || engine.select(request.predicate.as_deref(), request.format)).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
}

async fn archive_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let dataset = state.dataset.clone();
    let static_dir = state.static_dir.clone();
    let bytes = run_blocking(move || dataset.package(&static_dir)).await?;
    Ok(([(header::CONTENT_TYPE, "application/zip")], bytes).into_response())
}
