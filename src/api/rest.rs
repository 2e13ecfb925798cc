// =============================================================================
// REST Status Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/` and are read-only. CORS is configured
// permissively for development; tighten `allowed_origins` in production.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::config::EngineConfig;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::store::{SignalStore, TraderRepository};

/// Shared state behind every handler.
pub struct ApiState {
    pub config: Arc<EngineConfig>,
    pub metrics: Arc<EngineMetrics>,
    pub store: Arc<dyn SignalStore>,
    pub traders: Arc<dyn TraderRepository>,
    pub started_at: Instant,
}

/// Build the status API router with CORS middleware and shared state.
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/traders", get(traders))
        .route("/api/v1/signals", get(signals))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Engine state
// =============================================================================

#[derive(Serialize)]
struct StateResponse {
    uptime_secs: u64,
    server_time: i64,
    metrics: MetricsSnapshot,
    config: EngineConfigSummary,
}

#[derive(Serialize)]
struct EngineConfigSummary {
    symbol_workers: usize,
    max_trader_concurrency: usize,
    sandbox_timeout_ms: u64,
    default_kline_lookback: usize,
    dedup_window_multiplier: f64,
    analysis_queue_capacity: usize,
    use_exchange_universe: bool,
    reference_symbol: String,
}

async fn full_state(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let config = &state.config;
    Json(StateResponse {
        uptime_secs: state.started_at.elapsed().as_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
        metrics: state.metrics.snapshot(),
        config: EngineConfigSummary {
            symbol_workers: config.symbol_workers,
            max_trader_concurrency: config.max_trader_concurrency,
            sandbox_timeout_ms: config.sandbox_timeout_ms,
            default_kline_lookback: config.default_kline_lookback,
            dedup_window_multiplier: config.dedup_window_multiplier,
            analysis_queue_capacity: config.analysis_queue_capacity,
            use_exchange_universe: config.use_exchange_universe,
            reference_symbol: config.reference_symbol.clone(),
        },
    })
}

// =============================================================================
// Traders
// =============================================================================

async fn traders(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    match state.traders.list_all().await {
        Ok(traders) => Json(traders).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": format!("{e:#}") })),
        )
            .into_response(),
    }
}

// =============================================================================
// Signals
// =============================================================================

#[derive(Deserialize)]
struct SignalsQuery {
    #[serde(default = "default_signals_limit")]
    limit: usize,
}

fn default_signals_limit() -> usize {
    100
}

async fn signals(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<SignalsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.min(1000);
    match state.store.recent_signals(limit).await {
        Ok(signals) => Json(signals).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": format!("{e:#}") })),
        )
            .into_response(),
    }
}
