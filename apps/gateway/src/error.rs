use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// REST error envelope
// ---------------------------------------------------------------------------

/// Structured API error returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Application-level error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<Vec<FieldError>>,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn validation(details: Vec<FieldError>) -> Self {
        Self {
            details: Some(details),
            ..Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "Validation failed")
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Credential errors
// ---------------------------------------------------------------------------

/// Why a bearer credential was refused.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,
    #[error("malformed credential")]
    Malformed,
    #[error("credential expired")]
    Expired,
    #[error("invalid credential")]
    Invalid,
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let message = match err {
            AuthError::Missing => "Missing bearer token",
            AuthError::Malformed => "Malformed bearer token",
            AuthError::Expired => "Token expired",
            AuthError::Invalid => "Invalid token",
        };
        Self::unauthorized(message)
    }
}

// ---------------------------------------------------------------------------
// Persistence errors
// ---------------------------------------------------------------------------

/// A failed call into the persistence collaborator.
///
/// These never undo in-memory effects; callers log and carry on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] diesel_async::pooled_connection::deadpool::PoolError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(%err, "persistence error");
        Self::internal("An internal error occurred")
    }
}

// ---------------------------------------------------------------------------
// Gateway request errors
// ---------------------------------------------------------------------------

/// Failure of a single inbound gateway request.
///
/// Reported to the originating connection only. A delivery miss is not an
/// error: `Hub::send_to_user` returns `false` and the caller falls back to
/// notifications.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("rate limit exceeded, retry in {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

impl GatewayError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Stable machine-readable code sent in `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "UNAUTHORIZED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Persistence(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Auth(e) => e.into(),
            GatewayError::RateLimited { .. } => Self::too_many_requests(err.to_string()),
            GatewayError::NotFound(_) => Self::not_found(err.to_string()),
            GatewayError::InvalidState(m) => Self::conflict(m),
            GatewayError::BadRequest(m) => Self::bad_request(m),
            GatewayError::Persistence(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_map_to_http_statuses() {
        let cases = [
            (GatewayError::NotFound("call"), StatusCode::NOT_FOUND),
            (GatewayError::invalid_state("call already ended"), StatusCode::CONFLICT),
            (GatewayError::bad_request("empty"), StatusCode::BAD_REQUEST),
            (GatewayError::Auth(AuthError::Expired), StatusCode::UNAUTHORIZED),
            (
                GatewayError::RateLimited { retry_after: Duration::from_secs(1) },
                StatusCode::TOO_MANY_REQUESTS,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn not_found_message_names_the_target() {
        assert_eq!(GatewayError::NotFound("stream").to_string(), "stream not found");
    }
}
