//! HTTP surface over the engine.
//!
//! Exposes the public operations as a JSON API suitable for a local web UI
//! or tool integration. All endpoints delegate to [`Engine`]; validation
//! errors surface as the single-line `<kind>: <detail>` contract inside a
//! structured envelope:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/tools/ingest` | Direct content ingest |
//! | `POST` | `/tools/search` | Tag-Walker search with inflated context |
//! | `GET`  | `/tools/buckets` | Known bucket labels |
//! | `POST` | `/tools/dream` | Re-tagging + engram rebuild |
//! | `POST` | `/tools/backup` | Eject a snapshot (YAML body) |
//! | `GET`  | `/tools/stats` | Store counts |
//! | `GET`  | `/tools/scribe` | Current session state |
//! | `POST` | `/tools/scribe/update` | Fold turns into the session state |
//! | `POST` | `/tools/scribe/clear` | Drop the session state |
//! | `POST` | `/chat` | Generation with Context Weaving |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! CORS allows all origins to support browser-based local clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::engine::{ChatTurn, Engine, SearchResponse, StatsReport};
use crate::error::EngineError;
use crate::models::IngestOutcome;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

/// Start the HTTP server on the configured port; runs until terminated.
pub async fn run_server(engine: Arc<Engine>) -> anyhow::Result<()> {
    let port = engine.config().server.port;
    let state = AppState { engine };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/tools/ingest", post(handle_ingest))
        .route("/tools/search", post(handle_search))
        .route("/tools/buckets", get(handle_buckets))
        .route("/tools/dream", post(handle_dream))
        .route("/tools/backup", post(handle_backup))
        .route("/tools/stats", get(handle_stats))
        .route("/tools/scribe", get(handle_scribe_get))
        .route("/tools/scribe/update", post(handle_scribe_update))
        .route("/tools/scribe/clear", post(handle_scribe_clear))
        .route("/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    let bind_addr = format!("127.0.0.1:{port}");
    println!("context engine listening on http://{bind_addr}");

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

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        let status = match e.code() {
            "bad_request" => StatusCode::BAD_REQUEST,
            "not_found" => StatusCode::NOT_FOUND,
            "timeout" => StatusCode::GATEWAY_TIMEOUT,
            "generator_error" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: e.code(),
            message: e.to_string(),
        }
    }
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

// ============ POST /tools/ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    content: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    buckets: Option<Vec<String>>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestOutcome>, AppError> {
    let outcome = state
        .engine
        .ingest(
            &req.content,
            req.source.as_deref(),
            req.kind.as_deref(),
            req.buckets,
        )
        .await?;
    Ok(Json(outcome))
}

// ============ POST /tools/search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    buckets: Option<Vec<String>>,
    #[serde(default = "default_max_chars")]
    max_chars: usize,
    #[serde(default)]
    provenance: Option<String>,
}

fn default_max_chars() -> usize {
    2500
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let response = state
        .engine
        .search(
            &req.query,
            req.buckets,
            req.max_chars,
            req.provenance.as_deref(),
        )
        .await?;
    Ok(Json(response))
}

// ============ GET /tools/buckets ============

#[derive(Serialize)]
struct BucketsResponse {
    buckets: Vec<String>,
}

async fn handle_buckets(
    State(state): State<AppState>,
) -> Result<Json<BucketsResponse>, AppError> {
    let buckets = state.engine.buckets().await?;
    Ok(Json(BucketsResponse { buckets }))
}

// ============ POST /tools/dream ============

async fn handle_dream(
    State(state): State<AppState>,
) -> Result<Json<crate::dream::DreamReport>, AppError> {
    let report = state.engine.dream().await?;
    Ok(Json(report))
}

// ============ POST /tools/backup ============

async fn handle_backup(State(state): State<AppState>) -> Result<Response, AppError> {
    let (document, path) = state.engine.backup().await?;
    let mut response = (StatusCode::OK, document).into_response();
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/yaml"),
    );
    if let Ok(value) = axum::http::HeaderValue::from_str(&path.display().to_string()) {
        response.headers_mut().insert("x-backup-path", value);
    }
    Ok(response)
}

// ============ GET /tools/stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StatsReport>, AppError> {
    let report = state.engine.stats().await?;
    Ok(Json(report))
}

// ============ Scribe ============

#[derive(Serialize)]
struct ScribeState {
    summary: String,
}

async fn handle_scribe_get(State(state): State<AppState>) -> Result<Json<ScribeState>, AppError> {
    let summary = state.engine.scribe_get().await?;
    Ok(Json(ScribeState { summary }))
}

#[derive(Deserialize)]
struct ScribeUpdateRequest {
    history: Vec<ChatTurn>,
}

async fn handle_scribe_update(
    State(state): State<AppState>,
    Json(req): Json<ScribeUpdateRequest>,
) -> Result<Json<ScribeState>, AppError> {
    let turns: Vec<(String, String)> = req
        .history
        .into_iter()
        .map(|t| (t.role, t.content))
        .collect();
    let summary = state.engine.scribe_update(&turns).await?;
    Ok(Json(ScribeState { summary }))
}

async fn handle_scribe_clear(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.engine.scribe_clear().await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    messages: Vec<ChatTurn>,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let response = state.engine.chat(&req.messages).await?;
    Ok(Json(ChatResponse { response }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
