//! Error responses for HTTP handlers.
//!
//! Failures are answered with `{ code, message, details? }` and a status
//! derived from the domain error.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::gateway::AuthError;

/// Handler error. Serializes to the response body; the status travels
/// alongside.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    /// Stable machine-readable code such as `NOT_FOUND`.
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiError {
    fn with_status(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(self, details: Value) -> Self {
        Self {
            details: Some(details),
            ..self
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Well-formed request whose content failed domain checks.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        if let AuthError::Signing(reason) = &err {
            tracing::error!(%reason, "Could not sign token");
            return ApiError::internal("Token signing failed");
        }
        ApiError::unauthorized(err.to_string())
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { entity_type, id } => {
                ApiError::not_found(format!("{} '{}' does not exist", entity_type, id))
            }
            Error::Validation(reason) => ApiError::validation(reason),
            Error::Auth(auth) => auth.into(),
            Error::Configuration(reason) => ApiError::bad_request(reason),
            Error::DatabaseSqlx(_) | Error::Database(_) => {
                tracing::error!(error = %err, "Storage failure while handling request");
                ApiError::internal("Storage is unavailable")
            }
            other => {
                tracing::error!(error = %other, "Request failed");
                ApiError::internal("Internal error")
            }
        }
    }
}

/// Handler return type.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_map_to_statuses() {
        let api_err: ApiError = Error::not_found("MailQueueMessage", "m-123").into();
        assert_eq!(api_err.status, StatusCode::NOT_FOUND);
        assert!(api_err.message.contains("m-123"));

        let api_err: ApiError = Error::validation("Recipient is required").into();
        assert_eq!(api_err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(api_err.code, "VALIDATION_ERROR");

        let api_err: ApiError = Error::Auth(AuthError::Expired).into();
        assert_eq!(api_err.status, StatusCode::UNAUTHORIZED);

        let api_err: ApiError = Error::Database("locked".to_string()).into();
        assert_eq!(api_err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api_err.message.contains("locked"));
    }

    #[test]
    fn test_body_omits_status_and_empty_details() {
        let body = serde_json::to_value(ApiError::bad_request("nope")).unwrap();
        assert_eq!(body, serde_json::json!({ "code": "BAD_REQUEST", "message": "nope" }));

        let err = ApiError::bad_request("nope").with_details(serde_json::json!({"field": "ids"}));
        assert_eq!(err.details.unwrap()["field"], "ids");
    }
}
