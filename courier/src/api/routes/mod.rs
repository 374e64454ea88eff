//! API route modules.
//!
//! `/ws` and `/api/health` are public; everything else requires a bearer token.

pub mod gateway;
pub mod health;
pub mod logging;
pub mod mail_queue;
pub mod notifications;
pub mod ws;

use axum::{Router, middleware};

use crate::api::middleware::require_auth;
use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let admin = Router::new()
        .nest("/api/mail-queue", mail_queue::router())
        .nest("/api/notifications", notifications::router())
        .nest("/api/gateway", gateway::router())
        .nest("/api/logging", logging::router())
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .nest("/ws", ws::router())
        .nest("/api/health", health::router())
        .merge(admin)
        .with_state(state)
}
