//! Billing provider webhook endpoint

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};
use time::OffsetDateTime;

use crate::{error::ApiResult, state::AppState};
use pagesmith_metering::MeteringError;

/// Header carrying the `t=<unix>,v1=<hex>` signature
pub const SIGNATURE_HEADER: &str = "Billing-Signature";

/// Verify and apply one billing provider event.
/// Unauthenticated; trust comes from the HMAC signature alone.
pub async fn billing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            MeteringError::WebhookSignature("missing Billing-Signature header".to_string())
        })?;

    let now = OffsetDateTime::now_utc().unix_timestamp();
    state
        .metering
        .webhooks
        .verify_signature(&body, signature, now)?;

    let outcome = state.metering.webhooks.process_payload(&body).await?;

    Ok(Json(json!({
        "received": true,
        "handled": outcome.handled,
        "action": outcome.action,
    })))
}
