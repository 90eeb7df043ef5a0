#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Pagesmith Shared Types
//!
//! Common domain types used across the API server, metering crate, and
//! background worker: typed ids, plan tiers and statuses, the credit
//! limit type, usage event kinds, and database pool construction.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{
    AnalyticsLevel, FeatureKey, Limit, LimitKey, PlanStatus, PlanTier, ProjectId, UsageKind,
    UserId,
};
