//! Mail queue administration.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::database::models::{MailQueueDbModel, QueueStats};
use crate::dispatcher::{CycleReport, EnqueueRequest};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(enqueue))
        .route("/stats", get(stats))
        .route("/process", post(process))
        .route("/retry", post(retry_failed))
        .route("/cleanup", post(cleanup))
        .route("/{id}", get(get_message))
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    /// Restrict the reset to these ids; all failed messages when absent.
    #[serde(default)]
    pub ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRequest {
    #[serde(default = "default_cleanup_days")]
    pub older_than_days: u32,
}

fn default_cleanup_days() -> u32 {
    30
}

#[derive(Debug, Serialize)]
pub struct AffectedResponse {
    pub affected: u64,
}

async fn enqueue(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> ApiResult<(StatusCode, Json<EnqueueResponse>)> {
    let id = state.dispatcher.enqueue(request).await?;
    Ok((StatusCode::CREATED, Json(EnqueueResponse { id })))
}

async fn stats(State(state): State<AppState>) -> ApiResult<Json<QueueStats>> {
    Ok(Json(state.dispatcher.stats().await?))
}

/// Run one dispatch cycle now.
async fn process(State(state): State<AppState>) -> ApiResult<Json<CycleReport>> {
    Ok(Json(state.dispatcher.trigger().await?))
}

async fn retry_failed(
    State(state): State<AppState>,
    request: Option<Json<RetryRequest>>,
) -> ApiResult<Json<AffectedResponse>> {
    let ids = request.and_then(|Json(request)| request.ids);
    let affected = state.dispatcher.retry_failed(ids.as_deref()).await?;
    Ok(Json(AffectedResponse { affected }))
}

async fn cleanup(
    State(state): State<AppState>,
    Json(request): Json<CleanupRequest>,
) -> ApiResult<Json<AffectedResponse>> {
    let affected = state.dispatcher.cleanup_sent(request.older_than_days).await?;
    Ok(Json(AffectedResponse { affected }))
}

async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MailQueueDbModel>> {
    Ok(Json(state.dispatcher.get_message(&id).await?))
}
