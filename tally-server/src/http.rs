//! Tally invoice viewer
//!
//! Axum-based HTTP server that pages through processed invoices: the source
//! PDF on one side, the data the model extracted on the other.
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, serde_json::Value)`, so the logic is testable
//! without going through the router.
//!
//! Endpoints:
//! - GET /                       : viewer page
//! - GET /health                 : results file status
//! - GET /version                : server version info
//! - GET /api/invoices           : record list, ordered by source
//! - GET /api/invoices/:index    : one record with its PDF URL
//! - GET /api/invoices/:index/pdf: the downloaded PDF
//! - GET /api/report             : batch report over all records

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tally_core::storage::local_path_for_key;
use tally_core::{BatchReport, InvoiceRecord, ResultStore, TallyConfig};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::io::ReaderStream;

const VIEWER_HTML: &str = include_str!("../assets/viewer.html");

/// Shared state for all HTTP handlers
#[derive(Debug, Clone)]
pub struct HttpState {
    pub store: ResultStore,
    pub download_dir: PathBuf,
}

impl HttpState {
    pub fn from_config(config: &TallyConfig) -> Self {
        Self {
            store: ResultStore::new(config.output.results_path()),
            download_dir: config.output.download_dir(),
        }
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/invoices", get(list_handler))
        .route("/api/invoices/:index", get(detail_handler))
        .route("/api/invoices/:index/pdf", get(pdf_handler))
        .route("/api/report", get(report_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    config: TallyConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState::from_config(&config));

    tracing::info!(
        results = %state.store.path().display(),
        download_dir = %state.download_dir.display(),
        "Serving invoice results"
    );

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Tally viewer listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

/// Standard error body.
pub fn error_body(msg: impl Into<String>) -> Value {
    json!({
        "error": msg.into(),
        "status": "error",
    })
}

/// Records ordered by source, or the error response to send.
async fn load_records(state: &HttpState) -> Result<Vec<InvoiceRecord>, (StatusCode, Value)> {
    match state.store.load().await {
        Ok(mut records) => {
            records.sort_by(|a, b| a.source.cmp(&b.source));
            Ok(records)
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to read results file");
            Err((StatusCode::INTERNAL_SERVER_ERROR, error_body(e.to_string())))
        }
    }
}

async fn pdf_exists(state: &HttpState, record: &InvoiceRecord) -> bool {
    match local_path_for_key(&state.download_dir, &record.file_name) {
        Some(path) => tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false),
        None => false,
    }
}

fn pdf_url(index: usize) -> String {
    format!("/api/invoices/{}/pdf", index)
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": "tally-viewer",
    })
}

/// Inner health: reports whether the results file is readable.
pub async fn health_inner(state: &HttpState) -> (StatusCode, Value) {
    let download_dir_present = tokio::fs::metadata(&state.download_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);

    match state.store.load().await {
        Ok(records) => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "records": records.len(),
                "results_path": state.store.path().display().to_string(),
                "download_dir": state.download_dir.display().to_string(),
                "download_dir_present": download_dir_present,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "status": "unhealthy",
                "error": e.to_string(),
                "results_path": state.store.path().display().to_string(),
            }),
        ),
    }
}

/// Inner list: one summary line per record.
pub async fn list_inner(state: &HttpState) -> (StatusCode, Value) {
    let records = match load_records(state).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let mut invoices = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        invoices.push(json!({
            "index": index,
            "source": record.source,
            "file_name": record.file_name,
            "has_pdf": pdf_exists(state, record).await,
            "summary": record.summary,
        }));
    }

    (
        StatusCode::OK,
        json!({
            "count": records.len(),
            "invoices": invoices,
        }),
    )
}

/// Inner detail: the full record at `index` plus its PDF URL.
pub async fn detail_inner(state: &HttpState, index: usize) -> (StatusCode, Value) {
    let records = match load_records(state).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let count = records.len();

    let Some(record) = records.into_iter().nth(index) else {
        return (
            StatusCode::NOT_FOUND,
            error_body(format!("No invoice at index {} ({} records)", index, count)),
        );
    };

    let has_pdf = pdf_exists(state, &record).await;
    let mut body = match serde_json::to_value(&record) {
        Ok(v) => v,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, error_body(e.to_string())),
    };
    if let Some(obj) = body.as_object_mut() {
        obj.insert("index".to_string(), json!(index));
        obj.insert("count".to_string(), json!(count));
        obj.insert("has_pdf".to_string(), json!(has_pdf));
        obj.insert("pdf_url".to_string(), json!(pdf_url(index)));
    }

    (StatusCode::OK, body)
}

/// Inner report: totals, vendors and invoice numbers across all records.
pub async fn report_inner(state: &HttpState) -> (StatusCode, Value) {
    let records = match load_records(state).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match serde_json::to_value(BatchReport::from_records(&records)) {
        Ok(v) => (StatusCode::OK, v),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, error_body(e.to_string())),
    }
}

/// Inner PDF lookup: local path of the PDF for the record at `index`.
pub async fn pdf_path_inner(
    state: &HttpState,
    index: usize,
) -> Result<PathBuf, (StatusCode, Value)> {
    let records = load_records(state).await?;
    let record = records.get(index).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            error_body(format!("No invoice at index {}", index)),
        )
    })?;

    let path = local_path_for_key(&state.download_dir, &record.file_name).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            error_body(format!("Unsafe file name: {}", record.file_name)),
        )
    })?;

    if !pdf_exists(state, record).await {
        return Err((
            StatusCode::NOT_FOUND,
            error_body(format!("PDF not downloaded: {}", record.file_name)),
        ));
    }

    Ok(path)
}

// ============================================================================
// Axum handler wrappers (thin, delegating to inner functions)
// ============================================================================

pub async fn index_handler() -> Html<&'static str> {
    Html(VIEWER_HTML)
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn list_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = list_inner(&state).await;
    (status, Json(body))
}

pub async fn detail_handler(
    State(state): State<Arc<HttpState>>,
    Path(index): Path<usize>,
) -> impl IntoResponse {
    let (status, body) = detail_inner(&state, index).await;
    (status, Json(body))
}

pub async fn report_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = report_inner(&state).await;
    (status, Json(body))
}

pub async fn pdf_handler(
    State(state): State<Arc<HttpState>>,
    Path(index): Path<usize>,
) -> Response {
    let path = match pdf_path_inner(&state, index).await {
        Ok(p) => p,
        Err((status, body)) => return (status, Json(body)).into_response(),
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to open PDF");
            return (StatusCode::NOT_FOUND, Json(error_body(e.to_string()))).into_response();
        }
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().replace('"', ""))
        .unwrap_or_else(|| "invoice.pdf".to_string());

    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", file_name),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}

// ============================================================================
// Unit Tests (inner functions called directly)
// ============================================================================
