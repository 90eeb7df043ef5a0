//! Per-endpoint rate limiting middleware
//!
//! Wraps the in-memory fixed-window limiter from the metering crate.
//! Requests are keyed by authenticated user id when available, otherwise
//! by client IP. Rejections return 429 with a Retry-After hint; admitted
//! requests carry X-RateLimit-* headers so clients can pace themselves.

use axum::{
    extract::{Request, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use pagesmith_shared::PlanTier;
use serde_json::json;

use crate::{
    auth::{middleware::extract_ip_address, AuthUser},
    state::AppState,
};
use pagesmith_metering::{
    user_key, Clock, FailurePolicy, RateLimitConfig, RateLimitDecision, RateLimitPreset,
    SystemClock,
};

static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Rate limiting middleware, parameterized by endpoint preset.
///
/// Wire it with `middleware::from_fn_with_state((state, preset), rate_limit_middleware)`
/// inside the auth layer so the user identity is already attached.
pub async fn rate_limit_middleware(
    State((state, preset)): State<(AppState, RateLimitPreset)>,
    request: Request,
    next: Next,
) -> Response {
    let auth_user = request.extensions().get::<AuthUser>().copied();

    let key = match auth_user {
        Some(user) => user_key(user.user_id),
        None => match extract_ip_address(&request) {
            Some(ip) => format!("ip:{ip}"),
            None => "ip:unknown".to_string(),
        },
    };

    let mut config = preset.config();
    if config.tier_based {
        // None marks a failed lookup; anonymous callers are Free by
        // definition, not by fallback.
        let tier = match auth_user {
            Some(user) => match state.metering.get_user_plan(user.user_id).await {
                Ok(plan) => Some(plan.tier),
                Err(e) => {
                    tracing::error!(
                        user_id = %user.user_id,
                        preset = preset.as_str(),
                        error = %e,
                        "Plan lookup failed during rate limiting"
                    );
                    None
                }
            },
            None => Some(PlanTier::Free),
        };
        config = match config_after_tier_lookup(config, tier, SystemClock.now_ms()) {
            Ok(resolved) => resolved,
            Err(decision) => return rate_limited_response(&decision),
        };
    }

    let decision = state.metering.rate_limiter.check(&key, &config);

    if !decision.allowed {
        tracing::warn!(
            key = %key,
            preset = preset.as_str(),
            retry_after_secs = decision.retry_after_secs,
            "Rate limit exceeded"
        );
        return rate_limited_response(&decision);
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &decision);
    response
}

/// Effective config once the caller's tier is known (or not). A failed
/// lookup resolves per the preset's declared failure policy: admit with
/// the free-tier allowance, or deny with a retry hint for a full window.
fn config_after_tier_lookup(
    config: RateLimitConfig,
    tier: Option<PlanTier>,
    now_ms: i64,
) -> Result<RateLimitConfig, RateLimitDecision> {
    match tier {
        Some(tier) => Ok(config.resolve_for_tier(tier)),
        None => match config.on_internal_error {
            FailurePolicy::Admit => Ok(config.resolve_for_tier(PlanTier::Free)),
            FailurePolicy::Deny => Err(config.on_error_decision(now_ms)),
        },
    }
}

fn rate_limited_response(decision: &RateLimitDecision) -> Response {
    let body = Json(json!({
        "error": "Rate limit exceeded. Please try again later.",
        "code": StatusCode::TOO_MANY_REQUESTS.as_u16(),
        "retry_after": decision.retry_after_secs,
    }));

    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(decision.retry_after_secs));
    apply_rate_limit_headers(headers, decision);
    response
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(&X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(&X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    // Reset is reported in unix seconds
    headers.insert(
        &X_RATELIMIT_RESET,
        HeaderValue::from(decision.reset_at_ms / 1000),
    );
}
