//! HTTP server.
//!
//! A thin JSON layer over the ingestion pipeline and the store's read
//! views. Puppet masters point their `reporturl` at `POST /upload`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload` | Ingest one raw YAML report |
//! | `GET`  | `/counts` | Node counts per current status |
//! | `GET`  | `/reports` | Report rows; query `host`, `status`, `unresponsive` |
//! | `GET`  | `/reports/{id}` | Report metadata and compressed payload |
//! | `GET`  | `/health` | Health check (returns version and schema) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "malformed_report", "message": "malformed report: missing field: host" } }
//! ```
//!
//! Error codes: `malformed_report` (400), `not_found` (404),
//! `consistency_violation` (409), `internal` (500).
//!
//! The store is opened, and its schema brought up to date, before the
//! listener binds. A schema that never becomes ready fails startup.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::error::ReportError;
use crate::get::ReportResponse;
use crate::ingest::{self, IngestContext, IngestOutcome};
use crate::models::{Counts, ReportFilter, ReportRow};
use crate::store::ReportStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: ReportStore,
}

/// Open the store and serve until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = ReportStore::open(config).await?;
    let bind_addr = config.server.bind.clone();

    let state = AppState {
        config: Arc::new(config.clone()),
        store,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/upload", post(handle_upload))
        .route("/counts", get(handle_counts))
        .route("/reports", get(handle_reports))
        .route("/reports/{id}", get(handle_report))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!(bind = %bind_addr, "listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ReportError> for AppError {
    fn from(err: ReportError) -> Self {
        let (status, code) = match &err {
            ReportError::MalformedReport(_) => (StatusCode::BAD_REQUEST, "malformed_report"),
            e if e.is_not_found() => (StatusCode::NOT_FOUND, "not_found"),
            ReportError::ConsistencyViolation { .. } => {
                (StatusCode::CONFLICT, "consistency_violation")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    schema_version: i64,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        schema_version: state.store.schema_status().version,
    })
}

async fn handle_upload(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<IngestOutcome>, AppError> {
    let ctx = IngestContext::new(&state.store, &state.config.ingest);
    let outcome = ingest::ingest(&ctx, &body).await?;
    Ok(Json(outcome))
}

async fn handle_counts(State(state): State<AppState>) -> Result<Json<Counts>, AppError> {
    Ok(Json(state.store.aggregate_counts().await?))
}

#[derive(Serialize)]
struct ReportsResponse {
    reports: Vec<ReportRow>,
}

async fn handle_reports(
    State(state): State<AppState>,
    Query(filter): Query<ReportFilter>,
) -> Result<Json<ReportsResponse>, AppError> {
    let reports = state.store.tabular(&filter).await?;
    Ok(Json(ReportsResponse { reports }))
}

async fn handle_report(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ReportResponse>, AppError> {
    let report = state.store.fetch_report(id).await?;
    Ok(Json(report.into()))
}
