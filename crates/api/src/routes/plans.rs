//! Plan routes
//!
//! Read the caller's plan, move between tiers, and run trials. Tier
//! changes re-seed the current period's credit allotment immediately.

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};
use pagesmith_metering::{BillingLinkage, LimitCheck, PlanRecord};
use pagesmith_shared::{FeatureKey, LimitKey, PlanTier};

pub const DEFAULT_TRIAL_DAYS: i64 = 14;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct UpgradePlanRequest {
    pub tier: PlanTier,
    pub billing_customer_id: Option<String>,
    pub billing_subscription_id: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub period_start: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub period_end: Option<OffsetDateTime>,
}

#[derive(Debug, Deserialize)]
pub struct DowngradePlanRequest {
    pub tier: PlanTier,
}

#[derive(Debug, Deserialize)]
pub struct StartTrialRequest {
    pub tier: PlanTier,
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct EndTrialRequest {
    #[serde(default)]
    pub convert: bool,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub current: Option<i64>,
}

#[derive(Debug, serde::Serialize)]
pub struct FeatureResponse {
    pub feature: FeatureKey,
    pub enabled: bool,
}

// =============================================================================
// Handlers
// =============================================================================

/// Current plan for the authenticated user, created with Free defaults
/// on first access
pub async fn get_plan(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<PlanRecord>> {
    let plan = state.metering.get_user_plan(auth_user.user_id).await?;
    Ok(Json(plan))
}

/// Upgrade to a paid tier, optionally linking billing identifiers
pub async fn upgrade_plan(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<UpgradePlanRequest>,
) -> ApiResult<Json<PlanRecord>> {
    let billing = if req.billing_customer_id.is_some()
        || req.billing_subscription_id.is_some()
        || req.period_start.is_some()
    {
        Some(BillingLinkage {
            customer_id: req.billing_customer_id,
            subscription_id: req.billing_subscription_id,
            period_start: req.period_start,
            period_end: req.period_end,
        })
    } else {
        None
    };

    let plan = state
        .metering
        .upgrade_plan(auth_user.user_id, req.tier, billing)
        .await?;
    Ok(Json(plan))
}

/// Downgrade to a lower tier; the current period's allotment shrinks
/// immediately
pub async fn downgrade_plan(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<DowngradePlanRequest>,
) -> ApiResult<Json<PlanRecord>> {
    let plan = state
        .metering
        .downgrade_plan(auth_user.user_id, req.tier)
        .await?;
    Ok(Json(plan))
}

/// Start a trial of a paid tier
pub async fn start_trial(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<StartTrialRequest>,
) -> ApiResult<Json<PlanRecord>> {
    let days = req.days.unwrap_or(DEFAULT_TRIAL_DAYS);
    let plan = state
        .metering
        .start_trial(auth_user.user_id, req.tier, days)
        .await?;
    Ok(Json(plan))
}

/// End the caller's trial, converting to the trialed tier or reverting
/// to Free
pub async fn end_trial(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<EndTrialRequest>,
) -> ApiResult<Json<PlanRecord>> {
    state
        .metering
        .end_trial(auth_user.user_id, req.convert)
        .await?;
    let plan = state.metering.get_user_plan(auth_user.user_id).await?;
    Ok(Json(plan))
}

/// Whether the caller's tier includes a feature
pub async fn get_feature(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(key): Path<FeatureKey>,
) -> ApiResult<Json<FeatureResponse>> {
    let enabled = state.metering.has_feature(auth_user.user_id, key).await;
    Ok(Json(FeatureResponse {
        feature: key,
        enabled,
    }))
}

/// Whether `current` usage of a countable resource fits the caller's
/// tier limit
pub async fn check_limit(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(key): Path<LimitKey>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<LimitCheck>> {
    let current = query.current.unwrap_or(0);
    let check = state
        .metering
        .check_limit(auth_user.user_id, key, current)
        .await;
    Ok(Json(check))
}
