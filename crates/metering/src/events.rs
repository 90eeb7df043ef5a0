//! Usage event log
//!
//! Append-only audit trail of metered operations. Writes here are
//! fire-and-forget from the caller's perspective: the consume path
//! warn-logs and swallows any failure so telemetry can never fail a
//! paying operation.

use pagesmith_shared::{ProjectId, UsageKind, UserId};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{MeteringError, MeteringResult};

/// Telemetry and correlation fields supplied by the caller of a metered
/// operation.
#[derive(Debug, Clone, Default)]
pub struct UsageContext {
    pub tokens_used: Option<i64>,
    pub cost_cents: Option<i64>,
    pub duration_ms: Option<i64>,
    pub project_id: Option<ProjectId>,
    pub section_id: Option<String>,
    pub element_id: Option<String>,
}

/// A recorded usage event
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UsageEvent {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: UsageKind,
    pub credits_charged: i64,
    pub tokens_used: Option<i64>,
    pub cost_cents: Option<i64>,
    pub duration_ms: Option<i64>,
    pub project_id: Option<ProjectId>,
    pub section_id: Option<String>,
    pub element_id: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Builder for a usage event about to be appended
#[derive(Debug, Clone)]
pub struct UsageEventDraft {
    user_id: UserId,
    kind: UsageKind,
    credits_charged: i64,
    context: UsageContext,
    success: bool,
    error_message: Option<String>,
}

impl UsageEventDraft {
    pub fn new(user_id: UserId, kind: UsageKind) -> Self {
        Self {
            user_id,
            kind,
            credits_charged: 0,
            context: UsageContext::default(),
            success: true,
            error_message: None,
        }
    }

    pub fn credits(mut self, charged: i64) -> Self {
        self.credits_charged = charged;
        self
    }

    pub fn context(mut self, context: UsageContext) -> Self {
        self.context = context;
        self
    }

    /// Mark the event failed; failed events always charge zero credits.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.credits_charged = 0;
        self.error_message = Some(error.into());
        self
    }
}

/// Appender and reader for the usage event log
#[derive(Clone)]
pub struct UsageEventLogger {
    pool: PgPool,
}

impl UsageEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one event. Callers on the hot path wrap this in
    /// `if let Err(e) = ... { tracing::warn!(...) }` rather than `?`.
    pub async fn log_event(&self, draft: UsageEventDraft) -> MeteringResult<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO usage_events (
                user_id, kind, credits_charged,
                tokens_used, cost_cents, duration_ms,
                project_id, section_id, element_id,
                success, error_message
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(draft.user_id)
        .bind(draft.kind)
        .bind(draft.credits_charged)
        .bind(draft.context.tokens_used)
        .bind(draft.context.cost_cents)
        .bind(draft.context.duration_ms)
        .bind(draft.context.project_id)
        .bind(draft.context.section_id)
        .bind(draft.context.element_id)
        .bind(draft.success)
        .bind(draft.error_message)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))?;

        tracing::debug!(
            user_id = %draft.user_id,
            kind = %draft.kind,
            credits = draft.credits_charged,
            success = draft.success,
            "Usage event logged"
        );
        Ok(id)
    }

    /// Newest events first.
    pub async fn recent_events(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> MeteringResult<Vec<UsageEvent>> {
        let capped = limit.clamp(1, 200);
        sqlx::query_as::<_, UsageEvent>(
            r#"
            SELECT * FROM usage_events
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(capped)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))
    }
}
