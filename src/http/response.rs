//! Error taxonomy and the single error responder.
//!
//! # Responsibilities
//! - Classify every failure in the chain into one stable error code
//! - Render the `{error, message, status}` envelope for clients
//! - Convert panics caught by the middleware stack into `internal_error`
//!
//! # Design Decisions
//! - Filters and the forwarder return `GatewayError`; only `IntoResponse`
//!   below writes a body
//! - Messages are fixed per code; upstream bodies and internal error text are
//!   never echoed to the client

use std::any::Any;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Where a credential was expected to arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// `Authorization: Bearer <token>` header.
    Header,
    /// `?token=` query parameter.
    Query,
}

/// Every failure the gateway can report to a client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("credential missing from {0:?}")]
    MissingToken(CredentialSource),
    #[error("credential expired")]
    TokenExpired,
    #[error("credential invalid")]
    InvalidToken,
    #[error("identity header missing before usage check")]
    MissingUserId,
    #[error("usage limit exceeded")]
    UsageLimitExceeded,
    #[error("user unknown to usage service")]
    UserNotFound,
    #[error("usage service returned status {0}")]
    UsageCheckFailed(u16),
    #[error("usage service unreachable")]
    UsageCheckError,
    #[error("backend unavailable")]
    ServiceUnavailable,
    #[error("no route matched")]
    RouteNotFound,
    #[error("malformed websocket upgrade")]
    InvalidUpgrade,
    #[error("request body over the configured limit")]
    PayloadTooLarge,
    #[error("internal error")]
    Internal,
}

impl GatewayError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken(_) | Self::TokenExpired | Self::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            Self::MissingUserId | Self::InvalidUpgrade => StatusCode::BAD_REQUEST,
            Self::UsageLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::UserNotFound | Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::UsageCheckFailed(_) | Self::UsageCheckError | Self::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingToken(_) => "missing_token",
            Self::TokenExpired => "token_expired",
            Self::InvalidToken => "invalid_token",
            Self::MissingUserId => "missing_user_id",
            Self::UsageLimitExceeded => "usage_limit_exceeded",
            Self::UserNotFound => "user_not_found",
            Self::UsageCheckFailed(_) => "usage_check_failed",
            Self::UsageCheckError => "usage_check_error",
            Self::ServiceUnavailable => "service_unavailable",
            Self::RouteNotFound => "route_not_found",
            Self::InvalidUpgrade => "invalid_upgrade",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Internal => "internal_error",
        }
    }

    /// Human-readable message shown to clients.
    pub fn message(&self) -> &'static str {
        match self {
            Self::MissingToken(CredentialSource::Header) => {
                "Authorization header is missing or invalid"
            }
            Self::MissingToken(CredentialSource::Query) => "Token query parameter is required",
            Self::TokenExpired => "Token has expired",
            Self::InvalidToken => "Invalid token",
            Self::MissingUserId => "User ID is required",
            Self::UsageLimitExceeded => "Usage limit exceeded. Please try again later.",
            Self::UserNotFound => "User not found",
            Self::UsageCheckFailed(_) => "Failed to check usage limit",
            Self::UsageCheckError => "An error occurred while checking usage limit",
            Self::ServiceUnavailable => "Service is temporarily unavailable",
            Self::RouteNotFound => "No matching route found",
            Self::InvalidUpgrade => "Invalid WebSocket upgrade request",
            Self::PayloadTooLarge => "Request body is too large",
            Self::Internal => "Internal server error",
        }
    }

    /// Build the client-facing envelope.
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: self.code().to_string(),
            message: self.message().to_string(),
            status: self.status().as_u16(),
        }
    }
}

/// The only body shape written to clients on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub message: String,
    pub status: u16,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, Json(self.envelope())).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Panic handler for `CatchPanicLayer`.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    tracing::error!(panic = %detail, "Request handler panicked");
    GatewayError::Internal.into_response()
}
