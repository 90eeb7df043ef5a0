//! Credit routes
//!
//! Balance reads and the consume entry point. A business rejection
//! (insufficient credits) is not an error shape: it comes back as the
//! same structured outcome with `success: false` and HTTP 402 so
//! clients can render the remaining balance.

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};
use pagesmith_metering::{CreditBalance, UsageContext};
use pagesmith_shared::{ProjectId, UsageKind};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    pub kind: UsageKind,
    /// Credits to charge; defaults to the kind's standard price
    pub credits: Option<i64>,
    pub tokens_used: Option<i64>,
    pub cost_cents: Option<i64>,
    pub duration_ms: Option<i64>,
    pub project_id: Option<ProjectId>,
    pub section_id: Option<String>,
    pub element_id: Option<String>,
}

impl ConsumeRequest {
    fn context(&self) -> UsageContext {
        UsageContext {
            tokens_used: self.tokens_used,
            cost_cents: self.cost_cents,
            duration_ms: self.duration_ms,
            project_id: self.project_id,
            section_id: self.section_id.clone(),
            element_id: self.element_id.clone(),
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Current credit balance for the authenticated user
pub async fn get_balance(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<CreditBalance>> {
    let balance = state.metering.get_credit_balance(auth_user.user_id).await?;
    Ok(Json(balance))
}

/// Check, deduct and audit one credit-consuming operation
pub async fn consume(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ConsumeRequest>,
) -> ApiResult<Response> {
    let required = req.credits.unwrap_or_else(|| req.kind.default_credit_cost());
    let context = req.context();

    let outcome = state
        .metering
        .consume_credits(auth_user.user_id, req.kind, required, context)
        .await?;

    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::PAYMENT_REQUIRED
    };
    Ok((status, Json(outcome)).into_response())
}
