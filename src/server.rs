//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/healthz` | Health check (returns version) |
//! | `POST` | `/search` | Search placeholder; returns fixed results |
//! | `POST` | `/index` | Fetch Reddit posts for a query and index them |
//!
//! # Error Contract
//!
//! All error responses share one shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "limit must be >= 1" } }
//! ```
//!
//! Error codes: `bad_request` (400), `upstream_error` (502),
//! `vector_store_error` (502), `unavailable` (503).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

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
use tower_http::trace::TraceLayer;

use reddit_index_core::sink::{CommentOptions, IndexedPost, SearchRequest};
use reddit_index_core::sync::{IndexSynchronizer, LexicalOutcome, SyncError};

use crate::config::Config;
use crate::embedding::resolve_model_ref;
use crate::ingest::build_synchronizer;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    /// `None` when the backends could not be configured; `/index` then
    /// answers 503 while the rest of the API keeps working.
    synchronizer: Option<Arc<IndexSynchronizer>>,
}

impl AppState {
    pub fn new(config: Arc<Config>, synchronizer: Option<Arc<IndexSynchronizer>>) -> Self {
        Self {
            config,
            synchronizer,
        }
    }
}

/// Build the router with all routes and layers.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(handle_health))
        .route("/search", post(handle_search))
        .route("/index", post(handle_index))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server on `[server].bind`.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embed_model = resolve_model_ref(&config.embedding.model);
    let synchronizer = match build_synchronizer(config, &config.index.collection, &embed_model) {
        Ok(sync) => Some(Arc::new(sync)),
        Err(e) => {
            tracing::warn!(error = %e, "indexing disabled");
            None
        }
    };

    let state = AppState::new(Arc::new(config.clone()), synchronizer);
    let app = router(state);

    tracing::info!(bind = %config.server.bind, "listening");
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
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
    /// Machine-readable error code (e.g., `"bad_request"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "unavailable",
        message: message.into(),
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        let code = match err {
            SyncError::Fetch(_) => "upstream_error",
            SyncError::VectorStore { .. } => "vector_store_error",
        };
        tracing::error!(error = %err, "index request failed");
        AppError {
            status: StatusCode::BAD_GATEWAY,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /healthz ============

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

// ============ POST /search ============

#[derive(Deserialize)]
pub struct SearchBody {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    10
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct SearchItem {
    pub title: String,
    pub url: String,
    pub score: f64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchItem>,
}

/// Placeholder search: echoes the query with three fixed results, capped
/// at `top_k`.
async fn handle_search(Json(body): Json<SearchBody>) -> Json<SearchResponse> {
    let results = [(1, 0.95), (2, 0.92), (3, 0.88)]
        .into_iter()
        .take(body.top_k)
        .map(|(n, score)| SearchItem {
            title: format!("Stubbed result {}", n),
            url: format!("https://example.com/stubbed-result-{}", n),
            score,
        })
        .collect();
    Json(SearchResponse {
        query: body.query,
        results,
    })
}

// ============ POST /index ============

#[derive(Deserialize)]
pub struct IndexBody {
    pub query: String,
    #[serde(default)]
    pub subreddit: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub include_comments: Option<bool>,
    #[serde(default)]
    pub comments_limit: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct IndexResponse {
    pub query: String,
    pub collection: String,
    pub indexed: usize,
    pub vector_documents: usize,
    pub posts: Vec<IndexedPost>,
    pub lexical: serde_json::Value,
}

async fn handle_index(
    State(state): State<AppState>,
    Json(body): Json<IndexBody>,
) -> Result<Json<IndexResponse>, AppError> {
    let synchronizer = state
        .synchronizer
        .as_ref()
        .ok_or_else(|| unavailable("indexing backends are not configured"))?;

    let limit = body.limit.unwrap_or(state.config.index.limit);
    if limit == 0 {
        return Err(bad_request("limit must be >= 1"));
    }

    let mut comments = state.config.index.comment_options();
    match body.include_comments {
        Some(false) => comments = CommentOptions::none(),
        Some(true) if !comments.include => {
            comments = state.config.index.enabled_comment_options();
        }
        _ => {}
    }
    if body.comments_limit.is_some() {
        comments.comments_limit = body.comments_limit;
    }

    let mut request = SearchRequest::new(body.query.clone())
        .with_limit(limit)
        .with_comments(comments);
    if let Some(sub) = body.subreddit {
        request = request.with_subreddit(sub);
    }

    let outcome = synchronizer.sync(&request).await?;
    let lexical = lexical_json(&outcome.lexical);

    Ok(Json(IndexResponse {
        query: body.query,
        collection: synchronizer.collection().to_string(),
        indexed: outcome.posts.len(),
        vector_documents: outcome.vector_documents,
        posts: outcome.posts.iter().map(IndexedPost::from).collect(),
        lexical,
    }))
}

fn lexical_json(outcome: &LexicalOutcome) -> serde_json::Value {
    serde_json::to_value(outcome).unwrap_or(serde_json::Value::Null)
}
