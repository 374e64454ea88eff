//! Health check routes.

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde::Serialize;

use crate::api::server::AppState;
use crate::database::models::QueueStats;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/live", get(liveness_check))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub dispatcher_running: bool,
    pub connections: usize,
    pub online_users: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueStats>,
}

/// Reports `degraded` with HTTP 503 when the queue store cannot be read.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let queue = match state.dispatcher.stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            tracing::warn!("Health check could not read queue stats: {}", e);
            None
        }
    };

    let (code, status) = if queue.is_some() {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let response = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        dispatcher_running: state.dispatcher.is_running(),
        connections: state.gateway.connection_count(),
        online_users: state.gateway.online_user_count(),
        queue,
    };

    (code, Json(response))
}

/// Liveness check - is the process up?
async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, "alive")
}
