//! Observability HTTP Routes
//!
//! Health check and push statistics.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::observability::MetricsSnapshot;
use crate::push::{Channel, PushManager};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Push statistics response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub channels: Vec<Channel>,
    pub live_channel_ids: usize,
    pub connections: usize,
    pub users: usize,
    pub shut_down: bool,
    pub metrics: MetricsSnapshot,
}

/// Create observability routes
pub fn observability_routes(manager: PushManager) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/stats", get(stats_handler))
        .with_state(manager)
}

/// Health check handler
async fn health_handler(State(manager): State<PushManager>) -> impl IntoResponse {
    let (status, label) = if manager.is_shut_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
    } else {
        (StatusCode::OK, "ok")
    };

    let response = HealthResponse {
        status: label.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status, Json(response))
}

/// Stats handler - registry sizes and counters as JSON
async fn stats_handler(State(manager): State<PushManager>) -> Json<StatsResponse> {
    let sessions = manager.session_registry();

    Json(StatsResponse {
        channels: manager.channels(),
        live_channel_ids: sessions.channel_count(),
        connections: sessions.total_connections(),
        users: manager.channel_registry().user_count(),
        shut_down: manager.is_shut_down(),
        metrics: manager.metrics().snapshot(),
    })
}
