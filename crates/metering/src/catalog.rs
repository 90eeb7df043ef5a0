//! Plan catalog
//!
//! The single source of truth for what each tier grants. Every
//! plan-mutating operation copies its snapshot from here so limits and
//! feature flags can never drift from tier semantics. Pure lookup, no
//! I/O.

use pagesmith_shared::{AnalyticsLevel, FeatureKey, Limit, LimitKey, PlanTier};
use serde::Serialize;

/// Default rate-limit allowance for a tier (requests per fixed window)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateAllowance {
    pub max_requests: u32,
    pub window_ms: i64,
}

/// Countable resource ceilings granted by a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceLimits {
    pub published_pages: Limit,
    pub draft_projects: Limit,
    pub custom_domains: Limit,
    pub form_submissions: Limit,
    pub team_members: Limit,
}

impl ResourceLimits {
    pub fn get(&self, key: LimitKey) -> Limit {
        match key {
            LimitKey::PublishedPages => self.published_pages,
            LimitKey::DraftProjects => self.draft_projects,
            LimitKey::CustomDomains => self.custom_domains,
            LimitKey::FormSubmissions => self.form_submissions,
            LimitKey::TeamMembers => self.team_members,
        }
    }
}

/// Feature flags granted by a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanFeatures {
    pub remove_branding: bool,
    pub custom_code: bool,
    pub ai_copywriter: bool,
    pub export_html: bool,
    pub priority_support: bool,
    pub analytics: AnalyticsLevel,
}

impl PlanFeatures {
    /// Truthiness check used by feature gates. Boolean flags are taken
    /// as-is; the tri-state analytics flag counts as enabled above `none`.
    pub fn is_enabled(&self, key: FeatureKey) -> bool {
        match key {
            FeatureKey::RemoveBranding => self.remove_branding,
            FeatureKey::CustomCode => self.custom_code,
            FeatureKey::AiCopywriter => self.ai_copywriter,
            FeatureKey::ExportHtml => self.export_html,
            FeatureKey::PrioritySupport => self.priority_support,
            FeatureKey::Analytics => self.analytics.is_enabled(),
        }
    }
}

/// Immutable per-tier plan configuration
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PlanConfig {
    pub tier: PlanTier,
    pub name: &'static str,
    pub monthly_price_cents: i64,
    pub annual_price_cents: i64,
    pub credits_per_month: Limit,
    pub limits: ResourceLimits,
    pub features: PlanFeatures,
    pub rate_allowance: RateAllowance,
}

impl PlanConfig {
    /// Free tier: 30 credits, 1 published page, builder branding
    pub fn free() -> Self {
        Self {
            tier: PlanTier::Free,
            name: "Free",
            monthly_price_cents: 0,
            annual_price_cents: 0,
            credits_per_month: Limit::Finite(30),
            limits: ResourceLimits {
                published_pages: Limit::Finite(1),
                draft_projects: Limit::Finite(3),
                custom_domains: Limit::Finite(0),
                form_submissions: Limit::Finite(50),
                team_members: Limit::Finite(1),
            },
            features: PlanFeatures {
                remove_branding: false,
                custom_code: false,
                ai_copywriter: false,
                export_html: false,
                priority_support: false,
                analytics: AnalyticsLevel::None,
            },
            rate_allowance: RateAllowance {
                max_requests: 60,
                window_ms: 60_000,
            },
        }
    }

    /// Pro tier: 200 credits, 10 published pages, no branding
    pub fn pro() -> Self {
        Self {
            tier: PlanTier::Pro,
            name: "Pro",
            monthly_price_cents: 2_900,
            annual_price_cents: 29_000,
            credits_per_month: Limit::Finite(200),
            limits: ResourceLimits {
                published_pages: Limit::Finite(10),
                draft_projects: Limit::Finite(25),
                custom_domains: Limit::Finite(3),
                form_submissions: Limit::Finite(5_000),
                team_members: Limit::Finite(3),
            },
            features: PlanFeatures {
                remove_branding: true,
                custom_code: true,
                ai_copywriter: true,
                export_html: false,
                priority_support: false,
                analytics: AnalyticsLevel::Basic,
            },
            rate_allowance: RateAllowance {
                max_requests: 300,
                window_ms: 60_000,
            },
        }
    }

    /// Agency tier: 1000 credits, 50 published pages, advanced analytics
    pub fn agency() -> Self {
        Self {
            tier: PlanTier::Agency,
            name: "Agency",
            monthly_price_cents: 7_900,
            annual_price_cents: 79_000,
            credits_per_month: Limit::Finite(1_000),
            limits: ResourceLimits {
                published_pages: Limit::Finite(50),
                draft_projects: Limit::Finite(100),
                custom_domains: Limit::Finite(20),
                form_submissions: Limit::Finite(50_000),
                team_members: Limit::Finite(10),
            },
            features: PlanFeatures {
                remove_branding: true,
                custom_code: true,
                ai_copywriter: true,
                export_html: true,
                priority_support: true,
                analytics: AnalyticsLevel::Advanced,
            },
            rate_allowance: RateAllowance {
                max_requests: 600,
                window_ms: 60_000,
            },
        }
    }

    /// Enterprise tier: unlimited everything, custom pricing
    pub fn enterprise() -> Self {
        Self {
            tier: PlanTier::Enterprise,
            name: "Enterprise",
            monthly_price_cents: 0,
            annual_price_cents: 0,
            credits_per_month: Limit::Unlimited,
            limits: ResourceLimits {
                published_pages: Limit::Unlimited,
                draft_projects: Limit::Unlimited,
                custom_domains: Limit::Unlimited,
                form_submissions: Limit::Unlimited,
                team_members: Limit::Unlimited,
            },
            features: PlanFeatures {
                remove_branding: true,
                custom_code: true,
                ai_copywriter: true,
                export_html: true,
                priority_support: true,
                analytics: AnalyticsLevel::Advanced,
            },
            rate_allowance: RateAllowance {
                max_requests: 1_200,
                window_ms: 60_000,
            },
        }
    }

    pub fn for_tier(tier: PlanTier) -> Self {
        match tier {
            PlanTier::Free => Self::free(),
            PlanTier::Pro => Self::pro(),
            PlanTier::Agency => Self::agency(),
            PlanTier::Enterprise => Self::enterprise(),
        }
    }

    /// Full catalog, cheapest tier first
    pub fn all() -> Vec<PlanConfig> {
        PlanTier::all().into_iter().map(Self::for_tier).collect()
    }
}
