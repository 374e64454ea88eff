//! Orchestrator ingress.

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::database::models::{NotificationDbModel, NotificationKind};
use crate::gateway::Identity;
use crate::orchestrator::{BatchDelivery, NewNotification};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(send_notification))
        .route("/users/{user_id}", get(list_for_user))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub kind: Option<NotificationKind>,
    #[serde(flatten)]
    pub notification: NewNotification,
}

impl SendNotificationRequest {
    fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.user_id.iter().cloned().collect();
        for user_id in &self.user_ids {
            if !targets.contains(user_id) {
                targets.push(user_id.clone());
            }
        }
        targets
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: u32,
}

fn default_history_limit() -> u32 {
    50
}

/// Persist and deliver a notification. The caller becomes the sender unless
/// the body names one. Users that could not be reached are listed under
/// `failures`.
async fn send_notification(
    State(state): State<AppState>,
    Extension(caller): Extension<Identity>,
    Json(request): Json<SendNotificationRequest>,
) -> ApiResult<(StatusCode, Json<BatchDelivery>)> {
    let targets = request.targets();
    let kind = request.kind.unwrap_or(NotificationKind::Message);

    let mut notification = request.notification;
    if notification.sender_id.is_none() {
        notification.sender_id = Some(caller.user_id);
        notification.sender_name = Some(caller.username);
    }

    let orchestrator = &state.orchestrator;
    let batch = match kind {
        NotificationKind::Announcement => BatchDelivery {
            reports: vec![orchestrator.announce(&notification).await?],
            failures: Vec::new(),
        },
        _ if targets.is_empty() => {
            return Err(ApiError::validation("At least one target user is required")
                .with_details(json!({ "fields": ["userId", "userIds"] })));
        }
        NotificationKind::Message => orchestrator.notify_users(&targets, &notification).await?,
        NotificationKind::System => {
            orchestrator
                .system_alert_users(&targets, &notification)
                .await?
        }
    };

    Ok((StatusCode::CREATED, Json(batch)))
}

async fn list_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<NotificationDbModel>>> {
    let limit = query.limit.clamp(1, 500);
    Ok(Json(state.orchestrator.history(&user_id, limit).await?))
}
