//! Plan store
//!
//! One plan record per user, created with Free defaults on first access.
//! Tier transitions (upgrade, downgrade, trial start/end) rewrite the
//! whole limits/feature snapshot from the catalog in a single statement;
//! billing callbacks only ever touch status and period fields.

use pagesmith_shared::{
    AnalyticsLevel, FeatureKey, Limit, LimitKey, PlanStatus, PlanTier, UserId,
};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

use crate::catalog::{PlanConfig, PlanFeatures, ResourceLimits};
use crate::error::{MeteringError, MeteringResult};

/// External billing identifiers attached on upgrade
#[derive(Debug, Clone, Default)]
pub struct BillingLinkage {
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub period_start: Option<OffsetDateTime>,
    pub period_end: Option<OffsetDateTime>,
}

/// A user's current plan
#[derive(Debug, Clone, Serialize)]
pub struct PlanRecord {
    pub user_id: UserId,
    pub tier: PlanTier,
    pub status: PlanStatus,
    pub credits_limit: Limit,
    pub limits: ResourceLimits,
    pub features: PlanFeatures,
    pub is_trialing: bool,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub billing_customer_id: Option<String>,
    pub billing_subscription_id: Option<String>,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Raw row shape; limit columns stay BIGINT until the domain conversion.
#[derive(Debug, Clone, FromRow)]
struct PlanRow {
    user_id: UserId,
    tier: PlanTier,
    status: PlanStatus,
    credits_limit: i64,
    published_pages: i64,
    draft_projects: i64,
    custom_domains: i64,
    form_submissions: i64,
    team_members: i64,
    remove_branding: bool,
    custom_code: bool,
    ai_copywriter: bool,
    export_html: bool,
    priority_support: bool,
    analytics: AnalyticsLevel,
    is_trialing: bool,
    trial_start: Option<OffsetDateTime>,
    trial_end: Option<OffsetDateTime>,
    billing_customer_id: Option<String>,
    billing_subscription_id: Option<String>,
    current_period_start: Option<OffsetDateTime>,
    current_period_end: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<PlanRow> for PlanRecord {
    fn from(row: PlanRow) -> Self {
        PlanRecord {
            user_id: row.user_id,
            tier: row.tier,
            status: row.status,
            credits_limit: Limit::from_raw(row.credits_limit),
            limits: ResourceLimits {
                published_pages: Limit::from_raw(row.published_pages),
                draft_projects: Limit::from_raw(row.draft_projects),
                custom_domains: Limit::from_raw(row.custom_domains),
                form_submissions: Limit::from_raw(row.form_submissions),
                team_members: Limit::from_raw(row.team_members),
            },
            features: PlanFeatures {
                remove_branding: row.remove_branding,
                custom_code: row.custom_code,
                ai_copywriter: row.ai_copywriter,
                export_html: row.export_html,
                priority_support: row.priority_support,
                analytics: row.analytics,
            },
            is_trialing: row.is_trialing,
            trial_start: row.trial_start,
            trial_end: row.trial_end,
            billing_customer_id: row.billing_customer_id,
            billing_subscription_id: row.billing_subscription_id,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Result of a resource limit check
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LimitCheck {
    pub allowed: bool,
    pub limit: Limit,
    pub current: i64,
}

impl LimitCheck {
    /// Pure evaluation: unlimited short-circuits to allowed, otherwise
    /// one more unit is allowed while `current < limit`.
    pub fn evaluate(limit: Limit, current: i64) -> Self {
        Self {
            allowed: limit.allows(current),
            limit,
            current,
        }
    }

    fn bypassed(current: i64) -> Self {
        Self {
            allowed: true,
            limit: Limit::Unlimited,
            current,
        }
    }
}

/// Plan lifecycle service
#[derive(Clone)]
pub struct PlanService {
    pool: PgPool,
    bypass_limits: bool,
}

impl PlanService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            bypass_limits: false,
        }
    }

    /// `bypass_limits` must already be gated on a non-production
    /// environment by the caller; this service trusts the flag.
    pub fn with_limit_bypass(pool: PgPool, bypass_limits: bool) -> Self {
        if bypass_limits {
            tracing::warn!("Plan limit checks are bypassed for this process");
        }
        Self {
            pool,
            bypass_limits,
        }
    }

    async fn fetch_plan(&self, user_id: UserId) -> MeteringResult<Option<PlanRow>> {
        sqlx::query_as::<_, PlanRow>("SELECT * FROM user_plans WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MeteringError::Database(e.to_string()))
    }

    /// Fetch the user's plan, creating a Free-tier record on first access.
    ///
    /// Concurrent first calls are safe: the insert is `ON CONFLICT DO
    /// NOTHING` against the user_id uniqueness constraint.
    pub async fn get_or_create_plan(&self, user_id: UserId) -> MeteringResult<PlanRecord> {
        if let Some(row) = self.fetch_plan(user_id).await? {
            return Ok(row.into());
        }

        let config = PlanConfig::free();
        let inserted = sqlx::query(
            r#"
            INSERT INTO user_plans (
                user_id, tier, status, credits_limit,
                published_pages, draft_projects, custom_domains, form_submissions, team_members,
                remove_branding, custom_code, ai_copywriter, export_html, priority_support, analytics
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(config.tier)
        .bind(PlanStatus::Active)
        .bind(config.credits_per_month.to_raw())
        .bind(config.limits.published_pages.to_raw())
        .bind(config.limits.draft_projects.to_raw())
        .bind(config.limits.custom_domains.to_raw())
        .bind(config.limits.form_submissions.to_raw())
        .bind(config.limits.team_members.to_raw())
        .bind(config.features.remove_branding)
        .bind(config.features.custom_code)
        .bind(config.features.ai_copywriter)
        .bind(config.features.export_html)
        .bind(config.features.priority_support)
        .bind(config.features.analytics)
        .execute(&self.pool)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))?
        .rows_affected();

        if inserted > 0 {
            tracing::info!(user_id = %user_id, "Created default free plan");
        }

        let row = self
            .fetch_plan(user_id)
            .await?
            .ok_or(MeteringError::PlanNotFound(user_id))?;
        Ok(row.into())
    }

    /// Move the user to `new_tier`, rewriting the whole snapshot from the
    /// catalog and optionally attaching billing identifiers. Status is
    /// always forced to Active and any trial window is cleared.
    pub async fn upgrade_plan(
        &self,
        user_id: UserId,
        new_tier: PlanTier,
        billing: Option<BillingLinkage>,
    ) -> MeteringResult<PlanRecord> {
        tracing::info!(user_id = %user_id, new_tier = %new_tier, "Upgrading plan");

        // Ensure the record exists before the snapshot rewrite
        self.get_or_create_plan(user_id).await?;

        let config = PlanConfig::for_tier(new_tier);
        let linkage = billing.unwrap_or_default();

        let row = sqlx::query_as::<_, PlanRow>(
            r#"
            UPDATE user_plans SET
                tier = $2,
                status = $3,
                credits_limit = $4,
                published_pages = $5,
                draft_projects = $6,
                custom_domains = $7,
                form_submissions = $8,
                team_members = $9,
                remove_branding = $10,
                custom_code = $11,
                ai_copywriter = $12,
                export_html = $13,
                priority_support = $14,
                analytics = $15,
                is_trialing = FALSE,
                trial_start = NULL,
                trial_end = NULL,
                billing_customer_id = COALESCE($16, billing_customer_id),
                billing_subscription_id = COALESCE($17, billing_subscription_id),
                current_period_start = COALESCE($18, current_period_start),
                current_period_end = COALESCE($19, current_period_end),
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(config.tier)
        .bind(PlanStatus::Active)
        .bind(config.credits_per_month.to_raw())
        .bind(config.limits.published_pages.to_raw())
        .bind(config.limits.draft_projects.to_raw())
        .bind(config.limits.custom_domains.to_raw())
        .bind(config.limits.form_submissions.to_raw())
        .bind(config.limits.team_members.to_raw())
        .bind(config.features.remove_branding)
        .bind(config.features.custom_code)
        .bind(config.features.ai_copywriter)
        .bind(config.features.export_html)
        .bind(config.features.priority_support)
        .bind(config.features.analytics)
        .bind(linkage.customer_id)
        .bind(linkage.subscription_id)
        .bind(linkage.period_start)
        .bind(linkage.period_end)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))?
        .ok_or(MeteringError::PlanNotFound(user_id))?;

        tracing::info!(
            user_id = %user_id,
            tier = %row.tier,
            credits_limit = row.credits_limit,
            "Plan upgraded"
        );
        Ok(row.into())
    }

    /// Same snapshot rewrite as upgrade, but billing linkage is cleared.
    pub async fn downgrade_plan(
        &self,
        user_id: UserId,
        new_tier: PlanTier,
    ) -> MeteringResult<PlanRecord> {
        tracing::info!(user_id = %user_id, new_tier = %new_tier, "Downgrading plan");

        self.get_or_create_plan(user_id).await?;

        let config = PlanConfig::for_tier(new_tier);
        let row = sqlx::query_as::<_, PlanRow>(
            r#"
            UPDATE user_plans SET
                tier = $2,
                status = $3,
                credits_limit = $4,
                published_pages = $5,
                draft_projects = $6,
                custom_domains = $7,
                form_submissions = $8,
                team_members = $9,
                remove_branding = $10,
                custom_code = $11,
                ai_copywriter = $12,
                export_html = $13,
                priority_support = $14,
                analytics = $15,
                is_trialing = FALSE,
                trial_start = NULL,
                trial_end = NULL,
                billing_customer_id = NULL,
                billing_subscription_id = NULL,
                current_period_start = NULL,
                current_period_end = NULL,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(config.tier)
        .bind(PlanStatus::Active)
        .bind(config.credits_per_month.to_raw())
        .bind(config.limits.published_pages.to_raw())
        .bind(config.limits.draft_projects.to_raw())
        .bind(config.limits.custom_domains.to_raw())
        .bind(config.limits.form_submissions.to_raw())
        .bind(config.limits.team_members.to_raw())
        .bind(config.features.remove_branding)
        .bind(config.features.custom_code)
        .bind(config.features.ai_copywriter)
        .bind(config.features.export_html)
        .bind(config.features.priority_support)
        .bind(config.features.analytics)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))?
        .ok_or(MeteringError::PlanNotFound(user_id))?;

        tracing::info!(user_id = %user_id, tier = %row.tier, "Plan downgraded");
        Ok(row.into())
    }

    /// Put the user on a timed trial of `tier`.
    pub async fn start_trial(
        &self,
        user_id: UserId,
        tier: PlanTier,
        trial_days: i64,
    ) -> MeteringResult<PlanRecord> {
        if !(1..=730).contains(&trial_days) {
            return Err(MeteringError::InvalidTrialDays(trial_days));
        }

        tracing::info!(user_id = %user_id, tier = %tier, trial_days, "Starting trial");

        self.get_or_create_plan(user_id).await?;

        let config = PlanConfig::for_tier(tier);
        let now = OffsetDateTime::now_utc();
        let trial_end = now + time::Duration::days(trial_days);

        let row = sqlx::query_as::<_, PlanRow>(
            r#"
            UPDATE user_plans SET
                tier = $2,
                status = $3,
                credits_limit = $4,
                published_pages = $5,
                draft_projects = $6,
                custom_domains = $7,
                form_submissions = $8,
                team_members = $9,
                remove_branding = $10,
                custom_code = $11,
                ai_copywriter = $12,
                export_html = $13,
                priority_support = $14,
                analytics = $15,
                is_trialing = TRUE,
                trial_start = $16,
                trial_end = $17,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(config.tier)
        .bind(PlanStatus::Trialing)
        .bind(config.credits_per_month.to_raw())
        .bind(config.limits.published_pages.to_raw())
        .bind(config.limits.draft_projects.to_raw())
        .bind(config.limits.custom_domains.to_raw())
        .bind(config.limits.form_submissions.to_raw())
        .bind(config.limits.team_members.to_raw())
        .bind(config.features.remove_branding)
        .bind(config.features.custom_code)
        .bind(config.features.ai_copywriter)
        .bind(config.features.export_html)
        .bind(config.features.priority_support)
        .bind(config.features.analytics)
        .bind(now)
        .bind(trial_end)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))?
        .ok_or(MeteringError::PlanNotFound(user_id))?;

        tracing::info!(
            user_id = %user_id,
            tier = %row.tier,
            trial_end = %trial_end,
            "Trial started"
        );
        Ok(row.into())
    }

    /// Finish a trial: convert to a paying Active plan on the same tier,
    /// or fall back to Free.
    pub async fn end_trial(&self, user_id: UserId, convert: bool) -> MeteringResult<()> {
        if !convert {
            self.downgrade_plan(user_id, PlanTier::Free).await?;
            tracing::info!(user_id = %user_id, "Trial ended without conversion");
            return Ok(());
        }

        let rows = sqlx::query(
            "UPDATE user_plans SET status = $2, is_trialing = FALSE, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(PlanStatus::Active)
        .execute(&self.pool)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))?
        .rows_affected();

        if rows == 0 {
            return Err(MeteringError::PlanNotFound(user_id));
        }

        tracing::info!(user_id = %user_id, "Trial converted to active plan");
        Ok(())
    }

    /// Feature gate. Fails closed: any lookup error denies the feature.
    pub async fn has_feature(&self, user_id: UserId, key: FeatureKey) -> bool {
        match self.get_or_create_plan(user_id).await {
            Ok(plan) => plan.features.is_enabled(key),
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    feature = %key,
                    error = %e,
                    "Feature check failed, denying"
                );
                false
            }
        }
    }

    /// Resource limit gate. Fails closed on lookup errors; the
    /// development bypass (already environment-gated) reports unlimited.
    pub async fn check_limit(&self, user_id: UserId, key: LimitKey, current: i64) -> LimitCheck {
        if self.bypass_limits {
            tracing::warn!(user_id = %user_id, limit = %key, "Limit check bypassed");
            return LimitCheck::bypassed(current);
        }

        match self.get_or_create_plan(user_id).await {
            Ok(plan) => LimitCheck::evaluate(plan.limits.get(key), current),
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    limit = %key,
                    error = %e,
                    "Limit check failed, denying"
                );
                LimitCheck {
                    allowed: false,
                    limit: Limit::Finite(0),
                    current,
                }
            }
        }
    }

    /// Narrow status update used by billing callbacks. Never touches the
    /// limits/feature snapshot.
    pub async fn update_plan_status(
        &self,
        user_id: UserId,
        status: PlanStatus,
    ) -> MeteringResult<()> {
        let rows = sqlx::query(
            "UPDATE user_plans SET status = $2, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))?
        .rows_affected();

        if rows == 0 {
            return Err(MeteringError::PlanNotFound(user_id));
        }

        tracing::info!(user_id = %user_id, status = %status, "Plan status updated");
        Ok(())
    }

    /// Narrow billing period update used by billing callbacks.
    pub async fn update_billing_period(
        &self,
        user_id: UserId,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
    ) -> MeteringResult<()> {
        let rows = sqlx::query(
            r#"
            UPDATE user_plans SET
                current_period_start = $2,
                current_period_end = $3,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(period_start)
        .bind(period_end)
        .execute(&self.pool)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))?
        .rows_affected();

        if rows == 0 {
            return Err(MeteringError::PlanNotFound(user_id));
        }

        tracing::info!(
            user_id = %user_id,
            period_start = %period_start,
            period_end = %period_end,
            "Billing period updated"
        );
        Ok(())
    }

    /// Users whose trial window has lapsed while still marked trialing.
    /// The worker sweeps these back to Free.
    pub async fn find_expired_trials(&self) -> MeteringResult<Vec<UserId>> {
        sqlx::query_scalar::<_, UserId>(
            r#"
            SELECT user_id FROM user_plans
            WHERE status = 'trialing' AND trial_end IS NOT NULL AND trial_end < NOW()
            ORDER BY trial_end
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))
    }

    /// Every user with a plan record, oldest first. Used by the monthly
    /// reset job.
    pub async fn plan_user_ids(&self) -> MeteringResult<Vec<UserId>> {
        sqlx::query_scalar::<_, UserId>("SELECT user_id FROM user_plans ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MeteringError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_check_unlimited_always_allows() {
        let check = LimitCheck::evaluate(Limit::Unlimited, 0);
        assert!(check.allowed);
        let check = LimitCheck::evaluate(Limit::Unlimited, 1_000_000);
        assert!(check.allowed);
        assert_eq!(check.limit, Limit::Unlimited);
    }

    #[test]
    fn test_limit_check_finite_boundary() {
        assert!(LimitCheck::evaluate(Limit::Finite(3), 2).allowed);
        assert!(!LimitCheck::evaluate(Limit::Finite(3), 3).allowed);
        assert!(!LimitCheck::evaluate(Limit::Finite(3), 4).allowed);
        assert!(!LimitCheck::evaluate(Limit::Finite(0), 0).allowed);
    }

    #[test]
    fn test_limit_check_bypass_reports_unlimited() {
        let check = LimitCheck::bypassed(42);
        assert!(check.allowed);
        assert_eq!(check.limit, Limit::Unlimited);
        assert_eq!(check.current, 42);
    }

    #[test]
    fn test_plan_row_conversion_maps_sentinels() {
        let now = OffsetDateTime::now_utc();
        let row = PlanRow {
            user_id: UserId::new(),
            tier: PlanTier::Enterprise,
            status: PlanStatus::Active,
            credits_limit: -1,
            published_pages: -1,
            draft_projects: 10,
            custom_domains: 0,
            form_submissions: -1,
            team_members: 5,
            remove_branding: true,
            custom_code: true,
            ai_copywriter: true,
            export_html: true,
            priority_support: true,
            analytics: AnalyticsLevel::Advanced,
            is_trialing: false,
            trial_start: None,
            trial_end: None,
            billing_customer_id: None,
            billing_subscription_id: None,
            current_period_start: None,
            current_period_end: None,
            created_at: now,
            updated_at: now,
        };

        let record: PlanRecord = row.into();
        assert!(record.credits_limit.is_unlimited());
        assert!(record.limits.published_pages.is_unlimited());
        assert_eq!(record.limits.draft_projects, Limit::Finite(10));
        assert_eq!(record.limits.custom_domains, Limit::Finite(0));
        assert!(record.limits.form_submissions.is_unlimited());
    }
}
