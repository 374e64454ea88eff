//! Bearer-token authentication for admin routes.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::api::error::ApiError;
use crate::api::server::AppState;
use crate::gateway::AuthError;

/// Extract Bearer token from Authorization header.
fn extract_bearer_token(request: &Request) -> Result<&str, AuthError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| AuthError::InvalidFormat)?;

    auth_str
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::InvalidFormat)
}

/// Rejects the request with 401 unless it carries a token the gateway's
/// verifier accepts. The resolved identity is put in request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(&request)?;
    let identity = state.gateway.verifier().verify(token)?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
