//! Gateway administration: presence, forced disconnects, maintenance.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::error::ApiResult;
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/online", get(online))
        .route("/users/{user_id}", get(user_presence))
        .route("/users/{user_id}/disconnect", post(disconnect_user))
        .route("/rooms/{room}/emit", post(emit_to_room))
        .route("/maintenance", post(maintenance))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineResponse {
    pub online_users: usize,
    pub connections: usize,
    pub user_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub user_id: String,
    pub online: bool,
    pub connections: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceRequest {
    pub message: String,
    #[serde(default)]
    pub disconnect_after: bool,
}

#[derive(Debug, Deserialize)]
pub struct EmitRequest {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: usize,
}

async fn online(State(state): State<AppState>) -> Json<OnlineResponse> {
    let user_ids = state.gateway.online_user_ids();
    Json(OnlineResponse {
        online_users: user_ids.len(),
        connections: state.gateway.connection_count(),
        user_ids,
    })
}

async fn user_presence(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<PresenceResponse> {
    Json(PresenceResponse {
        online: state.gateway.is_user_online(&user_id),
        connections: state.gateway.user_connection_count(&user_id),
        user_id,
    })
}

/// Force-close every session of a user; returns how many were closed.
async fn disconnect_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<CountResponse> {
    Json(CountResponse {
        count: state.gateway.disconnect_user(&user_id),
    })
}

async fn emit_to_room(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Json(request): Json<EmitRequest>,
) -> ApiResult<Json<CountResponse>> {
    let count = state
        .gateway
        .send_to_room(&room, &request.event, request.data)?;
    Ok(Json(CountResponse { count }))
}

/// Notify every connection; returns how many were notified.
async fn maintenance(
    State(state): State<AppState>,
    Json(request): Json<MaintenanceRequest>,
) -> Json<CountResponse> {
    Json(CountResponse {
        count: state
            .gateway
            .broadcast_maintenance(&request.message, request.disconnect_after),
    })
}
