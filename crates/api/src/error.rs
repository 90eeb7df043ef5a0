//! API error type and HTTP response mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pagesmith_metering::MeteringError;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Metering(#[from] MeteringError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Metering(err) => match err {
                MeteringError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
                MeteringError::PlanNotFound(_) | MeteringError::UsageNotFound { .. } => {
                    StatusCode::NOT_FOUND
                }
                MeteringError::InvalidAmount(_)
                | MeteringError::InvalidTrialDays(_)
                | MeteringError::InvalidTier(_)
                | MeteringError::InvalidPeriod(_)
                | MeteringError::WebhookPayload(_) => StatusCode::BAD_REQUEST,
                MeteringError::WebhookSignature(_) => StatusCode::UNAUTHORIZED,
                MeteringError::Database(_) | MeteringError::Config(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal failures get logged with detail but respond generically
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_credits_maps_to_payment_required() {
        let err = ApiError::Metering(MeteringError::InsufficientCredits {
            required: 5,
            available: 2,
        });
        assert_eq!(err.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn test_plan_not_found_maps_to_not_found() {
        let err = ApiError::Metering(MeteringError::PlanNotFound(
            pagesmith_shared::UserId::new(),
        ));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_invalid_tier_maps_to_bad_request() {
        let err = ApiError::Metering(MeteringError::InvalidTier("platinum".to_string()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_webhook_signature_maps_to_unauthorized() {
        let err = ApiError::Metering(MeteringError::WebhookSignature("stale".to_string()));
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_database_error_hides_detail() {
        let err = ApiError::Metering(MeteringError::Database("connection refused".to_string()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
