//! Core domain types shared across crates
//!
//! Typed identifiers, plan tiers/statuses, the credit limit type, and
//! usage event kinds. These types round-trip through both serde (JSON
//! API bodies) and sqlx (VARCHAR/BIGINT columns).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// User identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Landing-page project identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ProjectId(pub Uuid);

impl ProjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Agency,
    Enterprise,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Agency => "agency",
            PlanTier::Enterprise => "enterprise",
        }
    }

    pub fn is_paid(&self) -> bool {
        !matches!(self, PlanTier::Free)
    }

    /// All tiers, cheapest first
    pub fn all() -> [PlanTier; 4] {
        [
            PlanTier::Free,
            PlanTier::Pro,
            PlanTier::Agency,
            PlanTier::Enterprise,
        ]
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "pro" => Ok(PlanTier::Pro),
            "agency" => Ok(PlanTier::Agency),
            "enterprise" => Ok(PlanTier::Enterprise),
            _ => Err(format!("Unknown plan tier: {}", s)),
        }
    }
}

/// Subscription status
///
/// `Cancelled` and `PastDue` plans keep their tier snapshot; downgrades
/// are always explicit tier transitions, never implied by status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Active,
    Trialing,
    Cancelled,
    PastDue,
    Incomplete,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Active => "active",
            PlanStatus::Trialing => "trialing",
            PlanStatus::Cancelled => "cancelled",
            PlanStatus::PastDue => "past_due",
            PlanStatus::Incomplete => "incomplete",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(PlanStatus::Active),
            "trialing" => Ok(PlanStatus::Trialing),
            "cancelled" | "canceled" => Ok(PlanStatus::Cancelled),
            "past_due" => Ok(PlanStatus::PastDue),
            "incomplete" => Ok(PlanStatus::Incomplete),
            _ => Err(format!("Unknown plan status: {}", s)),
        }
    }
}

/// Analytics feature level (tri-state feature flag)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
pub enum AnalyticsLevel {
    #[default]
    None,
    Basic,
    Advanced,
}

impl AnalyticsLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticsLevel::None => "none",
            AnalyticsLevel::Basic => "basic",
            AnalyticsLevel::Advanced => "advanced",
        }
    }

    /// Truthiness for feature checks: anything above `none` counts as enabled.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, AnalyticsLevel::None)
    }
}

impl fmt::Display for AnalyticsLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnalyticsLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(AnalyticsLevel::None),
            "basic" => Ok(AnalyticsLevel::Basic),
            "advanced" => Ok(AnalyticsLevel::Advanced),
            _ => Err(format!("Unknown analytics level: {}", s)),
        }
    }
}

/// A resource or credit ceiling
///
/// Stored and serialized as a raw integer where any negative value means
/// unlimited; that encoding exists only at the serde/sql boundary. All
/// domain logic works with the two variants so that arithmetic on the
/// sentinel cannot happen by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Limit {
    Finite(i64),
    Unlimited,
}

impl Limit {
    pub const UNLIMITED_RAW: i64 = -1;

    pub fn from_raw(raw: i64) -> Self {
        if raw < 0 {
            Limit::Unlimited
        } else {
            Limit::Finite(raw)
        }
    }

    pub fn to_raw(self) -> i64 {
        match self {
            Limit::Finite(n) => n,
            Limit::Unlimited => Self::UNLIMITED_RAW,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }

    pub fn as_finite(&self) -> Option<i64> {
        match self {
            Limit::Finite(n) => Some(*n),
            Limit::Unlimited => None,
        }
    }

    /// Whether one more unit is allowed at the given current count.
    pub fn allows(&self, current: i64) -> bool {
        match self {
            Limit::Unlimited => true,
            Limit::Finite(n) => current < *n,
        }
    }
}

impl From<i64> for Limit {
    fn from(raw: i64) -> Self {
        Limit::from_raw(raw)
    }
}

impl From<Limit> for i64 {
    fn from(limit: Limit) -> Self {
        limit.to_raw()
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Finite(n) => write!(f, "{}", n),
            Limit::Unlimited => write!(f, "unlimited"),
        }
    }
}

/// Kind of metered AI operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
pub enum UsageKind {
    /// Full landing-page generation from a prompt
    PageGeneration,
    /// Regenerate one section of an existing page
    SectionRegeneration,
    /// Regenerate a single element within a section
    ElementRegeneration,
    /// Infer copy for one field (headline, CTA text, etc.)
    FieldInference,
}

impl UsageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageKind::PageGeneration => "page_generation",
            UsageKind::SectionRegeneration => "section_regeneration",
            UsageKind::ElementRegeneration => "element_regeneration",
            UsageKind::FieldInference => "field_inference",
        }
    }

    /// Default credit price charged when the caller does not override it.
    pub fn default_credit_cost(&self) -> i64 {
        match self {
            UsageKind::PageGeneration => 10,
            UsageKind::SectionRegeneration => 3,
            UsageKind::ElementRegeneration => 1,
            UsageKind::FieldInference => 1,
        }
    }
}

impl fmt::Display for UsageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UsageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "page_generation" => Ok(UsageKind::PageGeneration),
            "section_regeneration" => Ok(UsageKind::SectionRegeneration),
            "element_regeneration" => Ok(UsageKind::ElementRegeneration),
            "field_inference" => Ok(UsageKind::FieldInference),
            _ => Err(format!("Unknown usage kind: {}", s)),
        }
    }
}

/// Feature flag keys exposed on a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKey {
    RemoveBranding,
    CustomCode,
    AiCopywriter,
    ExportHtml,
    PrioritySupport,
    Analytics,
}

impl FeatureKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKey::RemoveBranding => "remove_branding",
            FeatureKey::CustomCode => "custom_code",
            FeatureKey::AiCopywriter => "ai_copywriter",
            FeatureKey::ExportHtml => "export_html",
            FeatureKey::PrioritySupport => "priority_support",
            FeatureKey::Analytics => "analytics",
        }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FeatureKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remove_branding" => Ok(FeatureKey::RemoveBranding),
            "custom_code" => Ok(FeatureKey::CustomCode),
            "ai_copywriter" => Ok(FeatureKey::AiCopywriter),
            "export_html" => Ok(FeatureKey::ExportHtml),
            "priority_support" => Ok(FeatureKey::PrioritySupport),
            "analytics" => Ok(FeatureKey::Analytics),
            _ => Err(format!("Unknown feature key: {}", s)),
        }
    }
}

/// Countable resource limit keys on a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKey {
    PublishedPages,
    DraftProjects,
    CustomDomains,
    FormSubmissions,
    TeamMembers,
}

impl LimitKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKey::PublishedPages => "published_pages",
            LimitKey::DraftProjects => "draft_projects",
            LimitKey::CustomDomains => "custom_domains",
            LimitKey::FormSubmissions => "form_submissions",
            LimitKey::TeamMembers => "team_members",
        }
    }
}

impl fmt::Display for LimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LimitKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "published_pages" => Ok(LimitKey::PublishedPages),
            "draft_projects" => Ok(LimitKey::DraftProjects),
            "custom_domains" => Ok(LimitKey::CustomDomains),
            "form_submissions" => Ok(LimitKey::FormSubmissions),
            "team_members" => Ok(LimitKey::TeamMembers),
            _ => Err(format!("Unknown limit key: {}", s)),
        }
    }
}
