// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Pagesmith API Library
//!
//! HTTP surface for the Pagesmith metering subsystem: JWT auth
//! middleware, per-endpoint rate limiting, and routes for plans,
//! credits, usage reporting, and billing webhooks.

pub mod auth;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
