//! Runtime log filter.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::logging::LoggingConfig;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(current_filter).put(replace_filter))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilterView {
    pub filter: String,
    pub log_dir: String,
}

#[derive(Debug, Deserialize)]
pub struct LogFilterUpdate {
    pub filter: String,
}

fn installed(state: &AppState) -> ApiResult<&Arc<LoggingConfig>> {
    state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Logging is not managed by this process"))
}

fn view(config: &LoggingConfig) -> LogFilterView {
    LogFilterView {
        filter: config.get_filter(),
        log_dir: config.log_dir().display().to_string(),
    }
}

async fn current_filter(State(state): State<AppState>) -> ApiResult<Json<LogFilterView>> {
    Ok(Json(view(installed(&state)?)))
}

async fn replace_filter(
    State(state): State<AppState>,
    Json(update): Json<LogFilterUpdate>,
) -> ApiResult<Json<LogFilterView>> {
    let config = installed(&state)?;
    config.set_filter(&update.filter)?;
    Ok(Json(view(config)))
}
