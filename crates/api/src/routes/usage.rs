//! Usage reporting routes

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use serde::Deserialize;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};
use pagesmith_metering::{current_period, UsageEvent, UsageStats};

const DEFAULT_EVENT_LIMIT: i64 = 20;
const MAX_EVENT_LIMIT: i64 = 100;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    /// Billing period as YYYY-MM; defaults to the current period
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<i64>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Usage statistics for one billing period
pub async fn get_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<UsageQuery>,
) -> ApiResult<Json<UsageStats>> {
    let requested = query.period.clone();
    let stats = state
        .metering
        .get_usage_stats(auth_user.user_id, query.period)
        .await?;

    match stats {
        Some(stats) => Ok(Json(stats)),
        None => {
            let period = requested.unwrap_or_else(current_period);
            Err(ApiError::NotFound(format!(
                "No usage recorded for period {period}"
            )))
        }
    }
}

/// Most recent usage events, newest first
pub async fn get_events(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Vec<UsageEvent>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .clamp(1, MAX_EVENT_LIMIT);
    let events = state
        .metering
        .get_recent_usage_events(auth_user.user_id, limit)
        .await?;
    Ok(Json(events))
}
