//! Push endpoint.

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
    routing::get,
};
use serde::Deserialize;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::gateway::auth::extract_token;
use crate::gateway::ws::run_connection;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(upgrade))
}

/// Handshake parameters. Browsers cannot set headers on a WebSocket
/// request, so the token may come in the query string instead.
#[derive(Debug, Deserialize)]
pub struct WsAuthParams {
    pub token: Option<String>,
}

/// Authenticate, then upgrade. A rejected handshake never reaches the registry.
async fn upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let token = extract_token(params.token.as_deref(), &headers)?;
    let identity = state.gateway.authenticate(&token)?;

    let gateway = state.gateway.clone();
    Ok(ws.on_upgrade(move |socket| run_connection(socket, gateway, identity)))
}
