// Metering crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Pagesmith Metering Module
//!
//! Plan entitlements, credit metering, and rate limiting for the page
//! builder.
//!
//! ## Features
//!
//! - **Plan Catalog**: static per-tier entitlements (credits, resource
//!   limits, feature flags, rate allowances)
//! - **Plan Store**: per-user plan records with upgrade, downgrade and
//!   trial lifecycle
//! - **Usage Ledger**: per-period credit accounting with atomic
//!   deduction
//! - **Usage Events**: append-only audit log of AI operations
//! - **Rate Limiter**: fixed-window admission control with per-tier
//!   allowances
//! - **Webhooks**: apply billing provider subscription events

pub mod catalog;
pub mod error;
pub mod events;
pub mod plans;
pub mod rate_limit;
pub mod usage;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Catalog
pub use catalog::{PlanConfig, PlanFeatures, RateAllowance, ResourceLimits};

// Error
pub use error::{MeteringError, MeteringResult};

// Events
pub use events::{UsageContext, UsageEvent, UsageEventDraft, UsageEventLogger};

// Plans
pub use plans::{BillingLinkage, LimitCheck, PlanRecord, PlanService};

// Rate Limit
pub use rate_limit::{
    ip_key, user_key, Clock, FailurePolicy, InMemoryStore, ManualClock, RateLimitConfig,
    RateLimitDecision, RateLimitPreset, RateLimiter, SystemClock, WindowSnapshot, WindowStore,
};

// Usage
pub use usage::{
    current_period, next_reset_after, percent_used, period_for, ConsumeOutcome, CreditBalance,
    CreditCheck, CreditsSnapshot, OperationCounts, UsageLedger, UsageRecord, UsageStats,
};

// Webhooks
pub use webhooks::{
    BillingWebhookEvent, WebhookOutcome, WebhookProcessor, SIGNATURE_TOLERANCE_SECS,
};

use pagesmith_shared::{FeatureKey, LimitKey, PlanTier, UsageKind, UserId};
use sqlx::PgPool;

/// Environment-driven metering settings.
#[derive(Debug, Clone)]
pub struct MeteringConfig {
    pub environment: String,
    pub bypass_limits: bool,
    pub webhook_secret: String,
}

impl MeteringConfig {
    pub fn from_env() -> Self {
        let environment = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let bypass_limits = std::env::var("PAGESMITH_BYPASS_LIMITS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let webhook_secret = std::env::var("BILLING_WEBHOOK_SECRET").unwrap_or_default();

        Self {
            environment,
            bypass_limits,
            webhook_secret,
        }
    }

    /// Limit bypass is a development convenience; it never applies in
    /// production no matter what the flag says.
    pub fn effective_bypass(&self) -> bool {
        self.bypass_limits && self.environment != "production"
    }
}

/// Main metering service that combines all metering functionality
#[derive(Clone)]
pub struct MeteringService {
    pub plans: PlanService,
    pub usage: UsageLedger,
    pub events: UsageEventLogger,
    pub rate_limiter: RateLimiter,
    pub webhooks: WebhookProcessor,
}

impl MeteringService {
    /// Create a new metering service from environment variables
    pub fn from_env(pool: PgPool) -> Self {
        Self::new(MeteringConfig::from_env(), pool)
    }

    /// Create a new metering service with explicit config
    pub fn new(config: MeteringConfig, pool: PgPool) -> Self {
        if config.webhook_secret.is_empty() {
            tracing::warn!(
                "BILLING_WEBHOOK_SECRET not set - inbound billing webhooks will be rejected"
            );
        }

        let plans = PlanService::with_limit_bypass(pool.clone(), config.effective_bypass());
        let events = UsageEventLogger::new(pool.clone());
        let usage = UsageLedger::new(pool, plans.clone(), events.clone());
        let webhooks =
            WebhookProcessor::new(plans.clone(), usage.clone(), config.webhook_secret);

        Self {
            plans,
            usage,
            events,
            rate_limiter: RateLimiter::new_in_memory(),
            webhooks,
        }
    }

    /// Current plan record, created on first access.
    pub async fn get_user_plan(&self, user_id: UserId) -> MeteringResult<PlanRecord> {
        self.plans.get_or_create_plan(user_id).await
    }

    /// Move a user onto a paid tier and align the current period's
    /// credit allotment with it.
    pub async fn upgrade_plan(
        &self,
        user_id: UserId,
        tier: PlanTier,
        billing: Option<BillingLinkage>,
    ) -> MeteringResult<PlanRecord> {
        let plan = self.plans.upgrade_plan(user_id, tier, billing).await?;
        self.usage.sync_limit_to_plan(user_id).await?;
        Ok(plan)
    }

    /// Move a user down a tier. The current period's allotment shrinks
    /// immediately; already-spent credits are not refunded.
    pub async fn downgrade_plan(
        &self,
        user_id: UserId,
        tier: PlanTier,
    ) -> MeteringResult<PlanRecord> {
        let plan = self.plans.downgrade_plan(user_id, tier).await?;
        self.usage.sync_limit_to_plan(user_id).await?;
        Ok(plan)
    }

    /// Start a time-boxed trial of a paid tier.
    pub async fn start_trial(
        &self,
        user_id: UserId,
        tier: PlanTier,
        days: i64,
    ) -> MeteringResult<PlanRecord> {
        let plan = self.plans.start_trial(user_id, tier, days).await?;
        self.usage.sync_limit_to_plan(user_id).await?;
        Ok(plan)
    }

    /// End a trial, converting to the trialed tier or reverting to
    /// free.
    pub async fn end_trial(&self, user_id: UserId, convert: bool) -> MeteringResult<()> {
        self.plans.end_trial(user_id, convert).await?;
        if !convert {
            self.usage.sync_limit_to_plan(user_id).await?;
        }
        Ok(())
    }

    /// Whether the user's tier includes a feature. Fails closed.
    pub async fn has_feature(&self, user_id: UserId, key: FeatureKey) -> bool {
        self.plans.has_feature(user_id, key).await
    }

    /// Whether `current` usage of a countable resource is within the
    /// tier's limit. Fails closed.
    pub async fn check_limit(&self, user_id: UserId, key: LimitKey, current: i64) -> LimitCheck {
        self.plans.check_limit(user_id, key, current).await
    }

    /// Check, deduct and audit one credit-consuming operation.
    pub async fn consume_credits(
        &self,
        user_id: UserId,
        kind: UsageKind,
        required: i64,
        context: UsageContext,
    ) -> MeteringResult<ConsumeOutcome> {
        self.usage
            .consume_credits(user_id, kind, required, context)
            .await
    }

    /// Read-only credit check without deduction.
    pub async fn check_credits(&self, user_id: UserId, required: i64) -> MeteringResult<CreditCheck> {
        self.usage.check_credits(user_id, required).await
    }

    pub async fn get_credit_balance(&self, user_id: UserId) -> MeteringResult<CreditBalance> {
        self.usage.get_credit_balance(user_id).await
    }

    pub async fn get_usage_stats(
        &self,
        user_id: UserId,
        period: Option<String>,
    ) -> MeteringResult<Option<UsageStats>> {
        self.usage.get_usage_stats(user_id, period).await
    }

    pub async fn get_recent_usage_events(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> MeteringResult<Vec<UsageEvent>> {
        self.events.recent_events(user_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_defaults_without_env() {
        std::env::remove_var("APP_ENV");
        std::env::remove_var("PAGESMITH_BYPASS_LIMITS");
        std::env::remove_var("BILLING_WEBHOOK_SECRET");

        let config = MeteringConfig::from_env();
        assert_eq!(config.environment, "development");
        assert!(!config.bypass_limits);
        assert!(config.webhook_secret.is_empty());
        assert!(!config.effective_bypass());
    }

    #[test]
    #[serial]
    fn test_bypass_flag_parsed_from_env() {
        std::env::set_var("APP_ENV", "development");
        std::env::set_var("PAGESMITH_BYPASS_LIMITS", "true");

        let config = MeteringConfig::from_env();
        assert!(config.effective_bypass());

        std::env::set_var("PAGESMITH_BYPASS_LIMITS", "1");
        assert!(MeteringConfig::from_env().effective_bypass());

        std::env::set_var("PAGESMITH_BYPASS_LIMITS", "no");
        assert!(!MeteringConfig::from_env().effective_bypass());

        std::env::remove_var("APP_ENV");
        std::env::remove_var("PAGESMITH_BYPASS_LIMITS");
    }

    #[test]
    #[serial]
    fn test_bypass_never_applies_in_production() {
        std::env::set_var("APP_ENV", "production");
        std::env::set_var("PAGESMITH_BYPASS_LIMITS", "true");

        let config = MeteringConfig::from_env();
        assert!(config.bypass_limits);
        assert!(!config.effective_bypass());

        std::env::remove_var("APP_ENV");
        std::env::remove_var("PAGESMITH_BYPASS_LIMITS");
    }
}
