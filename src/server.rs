//! HTTP API around the answer engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/strategies` | List strategies with aliases |
//! | `GET`  | `/stats` | Counts for the configured store |
//! | `POST` | `/chat` | Answer `{message, strategy?, polish?}` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `internal` (500). Backend failures
//! during `/chat` are not errors: the engine answers through its fallback
//! chain and reports the failure in the result's `error` field.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! chat front ends.

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
use tracing::info;

use crate::config::Config;
use crate::engine::{Engine, StrategyInfo};
use crate::models::ChatResult;
use crate::vector_index::{IndexError, IndexStats};

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
    /// Strategy used when a request names none.
    default_strategy: String,
    default_polish: bool,
}

/// Build the router. Exposed separately from [`run_server`] for embedding.
pub fn router(engine: Arc<Engine>, config: &Config) -> Router {
    let state = AppState {
        engine,
        default_strategy: config.answer.strategy.clone(),
        default_polish: config.answer.polish,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/strategies", get(handle_strategies))
        .route("/stats", get(handle_stats))
        .route("/chat", post(handle_chat))
        .layer(cors)
        .with_state(state)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config, engine: Arc<Engine>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(engine, config);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
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

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<IndexError> for AppError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::InvalidStoreName(_) => bad_request(err.to_string()),
            other => internal(other.to_string()),
        }
    }
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

// ============ GET /strategies ============

#[derive(Serialize)]
struct StrategyListResponse {
    strategies: Vec<StrategyInfo>,
}

async fn handle_strategies(State(state): State<AppState>) -> Json<StrategyListResponse> {
    Json(StrategyListResponse {
        strategies: state.engine.strategies(),
    })
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<IndexStats>, AppError> {
    let services = state.engine.services();
    let stats = services.index.stats(&services.store).await?;
    Ok(Json(stats))
}

// ============ POST /chat ============

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    strategy: Option<String>,
    #[serde(default)]
    polish: Option<bool>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResult>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let strategy = req.strategy.as_deref().unwrap_or(&state.default_strategy);
    let polish = req.polish.unwrap_or(state.default_polish);
    let result = state.engine.answer(&req.message, strategy, polish).await;
    Ok(Json(result))
}
