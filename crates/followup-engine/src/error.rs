//! Error taxonomy for the followup engine.
//!
//! Business errors (400/404) are surfaced directly to the caller with no
//! retry value. Infrastructure errors (503) wrap CRM/composer failures and
//! circuit-open conditions. Per-task failures are absorbed into the
//! task's `failed` state rather than propagated here — this enum is only
//! for batch-boundary and control-API failures.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum FollowupError {
    #[error("draft not found: {0}")]
    DraftNotFound(String),

    #[error("draft {0} has not been sent (status={1})")]
    DraftNotSent(String, String),

    #[error("draft {0} is missing sent_at")]
    MissingSentAt(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("rate limit exceeded, retry after {retry_after}s")]
    RateLimitExceeded { retry_after: u64 },

    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error("external service error: {service} returned {detail}")]
    ExternalService { service: String, detail: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl FollowupError {
    pub fn error_type(&self) -> &'static str {
        match self {
            FollowupError::DraftNotFound(_) => "draft_not_found",
            FollowupError::DraftNotSent(_, _) => "draft_not_sent",
            FollowupError::MissingSentAt(_) => "missing_sent_at",
            FollowupError::Validation(_) => "validation_error",
            FollowupError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            FollowupError::CircuitOpen(_) => "circuit_breaker_open",
            FollowupError::ExternalService { .. } => "external_service_error",
            FollowupError::Internal(_) => "internal_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            FollowupError::DraftNotFound(_) => StatusCode::NOT_FOUND,
            FollowupError::DraftNotSent(_, _)
            | FollowupError::MissingSentAt(_)
            | FollowupError::Validation(_) => StatusCode::BAD_REQUEST,
            FollowupError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            FollowupError::CircuitOpen(_) | FollowupError::ExternalService { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            FollowupError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    error_type: &'static str,
}

impl IntoResponse for FollowupError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if matches!(self, FollowupError::Internal(_)) {
            tracing::error!(error = %self, "unhandled internal error");
        }

        let body = ErrorBody {
            success: false,
            error: self.to_string(),
            error_type: self.error_type(),
        };

        let mut response = (status, Json(body)).into_response();
        if let FollowupError::RateLimitExceeded { retry_after } = self {
            response.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                retry_after.to_string().parse().expect("retry_after is ASCII digits"),
            );
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, FollowupError>;
