//! Metering error types

use pagesmith_shared::UserId;
use thiserror::Error;

/// Errors produced by the metering subsystem.
///
/// `InsufficientCredits` is an expected business condition: the consume
/// path converts it into a structured unsuccessful outcome instead of
/// surfacing it as a failure. Everything else is fatal for the request
/// that triggered it.
#[derive(Debug, Error)]
pub enum MeteringError {
    #[error("Insufficient credits. Required: {required}, Available: {available}")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Plan not found for user {0}")]
    PlanNotFound(UserId),

    #[error("Usage record not found for user {user_id} in period {period}")]
    UsageNotFound { user_id: UserId, period: String },

    #[error("Credit amount must be non-negative, got {0}")]
    InvalidAmount(i64),

    #[error("Trial days must be between 1 and 730, got {0}")]
    InvalidTrialDays(i64),

    #[error("Invalid tier: {0}")]
    InvalidTier(String),

    #[error("Invalid usage period '{0}', expected YYYY-MM")]
    InvalidPeriod(String),

    #[error("Webhook signature verification failed: {0}")]
    WebhookSignature(String),

    #[error("Webhook payload error: {0}")]
    WebhookPayload(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type MeteringResult<T> = Result<T, MeteringError>;
