//! HTTP routes
//!
//! All authenticated routes live under `/api/v1` behind `require_auth`
//! plus a rate-limit preset: the AI consume path uses the strict
//! AiGeneration preset, everything else the General one. The billing
//! webhook and health check stay outside the auth layer.

pub mod credits;
pub mod health;
pub mod plans;
pub mod usage;
pub mod webhooks;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

use crate::{auth::require_auth, rate_limit::rate_limit_middleware, state::AppState};
use pagesmith_metering::RateLimitPreset;

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    let consume_routes = Router::new()
        .route("/credits/consume", post(credits::consume))
        .route_layer(from_fn_with_state(
            (state.clone(), RateLimitPreset::AiGeneration),
            rate_limit_middleware,
        ));

    let general_routes = Router::new()
        .route("/plan", get(plans::get_plan))
        .route("/plan/upgrade", post(plans::upgrade_plan))
        .route("/plan/downgrade", post(plans::downgrade_plan))
        .route("/plan/trial/start", post(plans::start_trial))
        .route("/plan/trial/end", post(plans::end_trial))
        .route("/plan/features/{key}", get(plans::get_feature))
        .route("/plan/limits/{key}", get(plans::check_limit))
        .route("/credits", get(credits::get_balance))
        .route("/usage", get(usage::get_usage))
        .route("/usage/events", get(usage::get_events))
        .route_layer(from_fn_with_state(
            (state.clone(), RateLimitPreset::General),
            rate_limit_middleware,
        ));

    let authed = general_routes
        .merge(consume_routes)
        .route_layer(from_fn_with_state(state.auth_state(), require_auth));

    let public = Router::new()
        .route("/webhooks/billing", post(webhooks::billing_webhook))
        .route("/health", get(health::health));

    Router::new()
        .nest("/api/v1", authed.merge(public))
        .with_state(state)
}
