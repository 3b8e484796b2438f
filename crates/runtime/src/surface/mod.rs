//! Component N — the diagnostics/stream surface offered to the UI collaborator only. Grounded
//! on the teacher's `HttpApiServer`/`create_router` composition in `api/server.rs`: an
//! unauthenticated health route, functional routes behind `auth_middleware`, `TraceLayer` +
//! `CorsLayer` layered over the whole router.

pub mod middleware;
pub mod routes;

use crate::event_store::EventStore;
use crate::mode_heuristic::ModeHeuristic;
use crate::orchestrator::Orchestrator;
use crate::rate_limiter::RateLimiter;
use crate::registry::ToolRegistry;
use crate::settings::{ApiConfig, RateLimitScope};
use crate::telemetry_hints::TelemetryHintInjector;
use crate::tool_executor::ToolExecutor;
use crate::upstream::UpstreamClient;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Process-wide counters backing `GET /metrics` (SPEC_FULL §4.N).
#[derive(Default)]
pub struct SurfaceMetrics {
    pub total_requests: AtomicU64,
    pub total_streams: AtomicU64,
    pub total_tool_calls: AtomicU64,
    pub total_rate_limited: AtomicU64,
}

impl SurfaceMetrics {
    fn snapshot(&self) -> serde_json::Value {
        json!({
            "total_requests": self.total_requests.load(Ordering::Relaxed),
            "total_streams": self.total_streams.load(Ordering::Relaxed),
            "total_tool_calls": self.total_tool_calls.load(Ordering::Relaxed),
            "total_rate_limited": self.total_rate_limited.load(Ordering::Relaxed),
        })
    }
}

/// Every mode the mode heuristic (Component L) can resolve to, paired with the orchestrator
/// that serves it.
pub struct Orchestrators {
    pub standard: Arc<dyn Orchestrator>,
    pub review: Arc<dyn Orchestrator>,
    pub chunked: Arc<dyn Orchestrator>,
    pub combined: Arc<dyn Orchestrator>,
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ToolRegistry>,
    pub tool_executor: Arc<ToolExecutor>,
    pub event_store: Arc<EventStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub rate_limit_scope: RateLimitScope,
    pub orchestrators: Arc<Orchestrators>,
    pub mode_heuristic: Arc<ModeHeuristic>,
    pub telemetry_hints: Arc<TelemetryHintInjector>,
    pub upstream: Arc<UpstreamClient>,
    pub metrics: Arc<SurfaceMetrics>,
    pub api_token: Option<Arc<str>>,
    pub start_time: Instant,
}

pub fn create_router(state: AppState, api: &ApiConfig) -> Router {
    let protected = Router::new()
        .route("/api/tools", get(routes::list_tools))
        .route("/api/tools/run", post(routes::run_tool))
        .route("/api/tools/executions", get(routes::tool_executions))
        .route("/api/ctx/tail", get(routes::ctx_tail))
        .route("/api/ctx/stream", get(routes::ctx_stream))
        .route("/api/chat", post(routes::chat))
        .route("/api/chat/stream", post(routes::chat_stream))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::auth_middleware))
        .with_state(state.clone());

    let health_router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state);

    let mut router = health_router.merge(protected);

    if api.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }
    if api.enable_tracing {
        router = router.layer(TraceLayer::new_for_http());
    }
    router
}

async fn health(axum::extract::State(state): axum::extract::State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

async fn metrics(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(state.metrics.snapshot()))
}
