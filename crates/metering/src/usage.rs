//! Usage ledger
//!
//! Per-user-per-period credit counters. Records are created lazily and
//! never deleted; each calendar month gets a fresh record seeded from
//! the plan's current credit limit. Deduction is the one operation that
//! needs cross-request atomicity and runs check-then-write inside a
//! single transaction holding a row lock.

use pagesmith_shared::{Limit, PlanTier, UsageKind, UserId};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

use crate::error::{MeteringError, MeteringResult};
use crate::events::{UsageContext, UsageEventDraft, UsageEventLogger};
use crate::plans::PlanService;

/// Current calendar period as `YYYY-MM` (UTC).
pub fn current_period() -> String {
    period_for(OffsetDateTime::now_utc())
}

/// Period string for an arbitrary instant.
pub fn period_for(ts: OffsetDateTime) -> String {
    format!("{:04}-{:02}", ts.year(), u8::from(ts.month()))
}

/// First instant of the next calendar month (UTC), when credits re-seed.
pub fn next_reset_after(ts: OffsetDateTime) -> OffsetDateTime {
    let (year, month) = if ts.month() == time::Month::December {
        (ts.year() + 1, time::Month::January)
    } else {
        (ts.year(), ts.month().next())
    };
    time::Date::from_calendar_date(year, month, 1)
        .map(|d| d.midnight().assume_utc())
        .unwrap_or(ts)
}

/// Reject anything that is not a `YYYY-MM` period string.
pub fn validate_period(period: &str) -> MeteringResult<()> {
    let bytes = period.as_bytes();
    let well_formed = bytes.len() == 7
        && bytes[4] == b'-'
        && period[..4].chars().all(|c| c.is_ascii_digit())
        && period[5..]
            .parse::<u8>()
            .map(|m| (1..=12).contains(&m))
            .unwrap_or(false);
    if well_formed {
        Ok(())
    } else {
        Err(MeteringError::InvalidPeriod(period.to_string()))
    }
}

/// Percentage of the allotment consumed, rounded, clamped to 0..=100.
/// Unlimited plans always report zero.
pub fn percent_used(used: i64, limit: Limit) -> f64 {
    match limit {
        Limit::Unlimited => 0.0,
        Limit::Finite(0) => {
            if used > 0 {
                100.0
            } else {
                0.0
            }
        }
        Limit::Finite(n) => ((used as f64 / n as f64) * 100.0).round().clamp(0.0, 100.0),
    }
}

/// Remaining balance after a mid-period limit change: never negative,
/// and the sentinel passes straight through for unlimited.
pub fn remaining_after_limit_change(new_limit: Limit, used: i64) -> i64 {
    match new_limit {
        Limit::Unlimited => Limit::UNLIMITED_RAW,
        Limit::Finite(n) => (n - used).max(0),
    }
}

fn operation_increments(kind: UsageKind) -> (i64, i64, i64, i64) {
    match kind {
        UsageKind::PageGeneration => (1, 0, 0, 0),
        UsageKind::SectionRegeneration => (0, 1, 0, 0),
        UsageKind::ElementRegeneration => (0, 0, 1, 0),
        UsageKind::FieldInference => (0, 0, 0, 1),
    }
}

/// One user's metered usage for one calendar period
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub user_id: UserId,
    pub period: String,
    pub credits_limit: Limit,
    pub credits_used: i64,
    pub credits_remaining: Limit,
    pub page_generations: i64,
    pub section_regenerations: i64,
    pub element_regenerations: i64,
    pub field_inferences: i64,
    pub tokens_used: i64,
    pub estimated_cost_cents: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct UsageRow {
    user_id: UserId,
    period: String,
    credits_limit: i64,
    credits_used: i64,
    credits_remaining: i64,
    page_generations: i64,
    section_regenerations: i64,
    element_regenerations: i64,
    field_inferences: i64,
    tokens_used: i64,
    estimated_cost_cents: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<UsageRow> for UsageRecord {
    fn from(row: UsageRow) -> Self {
        UsageRecord {
            user_id: row.user_id,
            period: row.period,
            credits_limit: Limit::from_raw(row.credits_limit),
            credits_used: row.credits_used,
            credits_remaining: Limit::from_raw(row.credits_remaining),
            page_generations: row.page_generations,
            section_regenerations: row.section_regenerations,
            element_regenerations: row.element_regenerations,
            field_inferences: row.field_inferences,
            tokens_used: row.tokens_used,
            estimated_cost_cents: row.estimated_cost_cents,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Result of a read-only balance check
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CreditCheck {
    pub allowed: bool,
    pub remaining: Limit,
    pub required: i64,
}

impl CreditCheck {
    /// Pure evaluation. Unlimited allotments always allow; finite ones
    /// require `remaining >= required`.
    pub fn evaluate(limit: Limit, remaining: Limit, required: i64) -> Self {
        let allowed = match (limit, remaining) {
            (Limit::Unlimited, _) | (_, Limit::Unlimited) => true,
            (Limit::Finite(_), Limit::Finite(r)) => r >= required,
        };
        Self {
            allowed,
            remaining,
            required,
        }
    }
}

/// Outcome of a consume call. Business rejections land here with
/// `success=false`; infrastructure failures are returned as errors.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumeOutcome {
    pub success: bool,
    pub remaining: Limit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Balance projection for the account UI
#[derive(Debug, Clone, Serialize)]
pub struct CreditBalance {
    pub used: i64,
    pub remaining: Limit,
    pub limit: Limit,
    pub percent_used: f64,
    pub days_until_reset: i64,
    pub next_reset_date: OffsetDateTime,
    pub tier: PlanTier,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CreditsSnapshot {
    pub used: i64,
    pub remaining: Limit,
    pub limit: Limit,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct OperationCounts {
    pub page_generations: i64,
    pub section_regenerations: i64,
    pub element_regenerations: i64,
    pub field_inferences: i64,
}

/// Per-period reporting projection
#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub period: String,
    pub credits: CreditsSnapshot,
    pub operations: OperationCounts,
    pub tokens_used: i64,
    pub estimated_cost_cents: i64,
}

/// Credit metering service
#[derive(Clone)]
pub struct UsageLedger {
    pool: PgPool,
    plans: PlanService,
    events: UsageEventLogger,
}

impl UsageLedger {
    pub fn new(pool: PgPool, plans: PlanService, events: UsageEventLogger) -> Self {
        Self {
            pool,
            plans,
            events,
        }
    }

    async fn fetch_usage(&self, user_id: UserId, period: &str) -> MeteringResult<Option<UsageRow>> {
        sqlx::query_as::<_, UsageRow>(
            "SELECT * FROM usage_records WHERE user_id = $1 AND period = $2",
        )
        .bind(user_id)
        .bind(period)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))
    }

    /// Fetch the current period's record, creating and seeding it from
    /// the user's plan on first use. Concurrent first calls are safe via
    /// the (user_id, period) uniqueness constraint.
    pub async fn get_or_create_usage(&self, user_id: UserId) -> MeteringResult<UsageRecord> {
        let period = current_period();
        self.get_or_create_usage_in(user_id, &period).await
    }

    async fn get_or_create_usage_in(
        &self,
        user_id: UserId,
        period: &str,
    ) -> MeteringResult<UsageRecord> {
        if let Some(row) = self.fetch_usage(user_id, period).await? {
            return Ok(row.into());
        }

        let plan = self.plans.get_or_create_plan(user_id).await?;
        // remaining seeds to the full allotment; -1 carries through for unlimited
        let limit_raw = plan.credits_limit.to_raw();

        let inserted = sqlx::query(
            r#"
            INSERT INTO usage_records (user_id, period, credits_limit, credits_remaining)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, period) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(period)
        .bind(limit_raw)
        .bind(limit_raw)
        .execute(&self.pool)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))?
        .rows_affected();

        if inserted > 0 {
            tracing::info!(
                user_id = %user_id,
                period = %period,
                credits_limit = limit_raw,
                "Seeded usage record for new period"
            );
        }

        let row = self
            .fetch_usage(user_id, period)
            .await?
            .ok_or_else(|| MeteringError::UsageNotFound {
                user_id,
                period: period.to_string(),
            })?;
        Ok(row.into())
    }

    /// Read-only balance check; never mutates.
    pub async fn check_credits(&self, user_id: UserId, required: i64) -> MeteringResult<CreditCheck> {
        if required < 0 {
            return Err(MeteringError::InvalidAmount(required));
        }
        let usage = self.get_or_create_usage(user_id).await?;
        Ok(CreditCheck::evaluate(
            usage.credits_limit,
            usage.credits_remaining,
            required,
        ))
    }

    /// Atomically verify and burn `amount` credits.
    ///
    /// The balance check and the write happen inside one transaction with
    /// the record row locked, so two concurrent deductions can never both
    /// pass a stale check. On an insufficient balance nothing is written.
    pub async fn deduct_credits(
        &self,
        user_id: UserId,
        amount: i64,
        kind: UsageKind,
    ) -> MeteringResult<Limit> {
        if amount < 0 {
            return Err(MeteringError::InvalidAmount(amount));
        }

        let period = current_period();
        // Seed outside the transaction so the lock below always has a row
        self.get_or_create_usage_in(user_id, &period).await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MeteringError::Database(e.to_string()))?;

        let row: Option<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT credits_limit, credits_remaining FROM usage_records
            WHERE user_id = $1 AND period = $2
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(&period)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))?;

        let (limit_raw, remaining_raw) = row.ok_or_else(|| MeteringError::UsageNotFound {
            user_id,
            period: period.clone(),
        })?;
        let limit = Limit::from_raw(limit_raw);

        if let Limit::Finite(_) = limit {
            if remaining_raw < amount {
                // Dropping the transaction rolls back; nothing was written
                return Err(MeteringError::InsufficientCredits {
                    required: amount,
                    available: remaining_raw.max(0),
                });
            }
        }

        let (pages, sections, elements, fields) = operation_increments(kind);

        sqlx::query(
            r#"
            UPDATE usage_records SET
                credits_used = credits_used + $3,
                credits_remaining = CASE
                    WHEN credits_limit < 0 THEN credits_remaining
                    ELSE credits_remaining - $3
                END,
                page_generations = page_generations + $4,
                section_regenerations = section_regenerations + $5,
                element_regenerations = element_regenerations + $6,
                field_inferences = field_inferences + $7,
                updated_at = NOW()
            WHERE user_id = $1 AND period = $2
            "#,
        )
        .bind(user_id)
        .bind(&period)
        .bind(amount)
        .bind(pages)
        .bind(sections)
        .bind(elements)
        .bind(fields)
        .execute(&mut *tx)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| MeteringError::Database(e.to_string()))?;

        let remaining = match limit {
            Limit::Unlimited => Limit::Unlimited,
            Limit::Finite(_) => Limit::Finite(remaining_raw - amount),
        };

        tracing::debug!(
            user_id = %user_id,
            kind = %kind,
            amount,
            remaining = %remaining,
            "Credits deducted"
        );
        Ok(remaining)
    }

    /// Append a usage event. Exposed for callers that meter outside the
    /// consume path; failures propagate here and are swallowed at call
    /// sites that must not fail.
    pub async fn log_usage_event(&self, draft: UsageEventDraft) -> MeteringResult<()> {
        self.events.log_event(draft).await.map(|_| ())
    }

    /// The single public consumption entry point: check, deduct, log.
    ///
    /// Business rejections are returned as unsuccessful outcomes with the
    /// exact shortfall message and a failed audit event; infrastructure
    /// failures propagate after a best-effort failed-event log.
    pub async fn consume_credits(
        &self,
        user_id: UserId,
        kind: UsageKind,
        required: i64,
        context: UsageContext,
    ) -> MeteringResult<ConsumeOutcome> {
        if required < 0 {
            return Err(MeteringError::InvalidAmount(required));
        }

        let check = self.check_credits(user_id, required).await?;
        if !check.allowed {
            let available = check.remaining.as_finite().unwrap_or(0).max(0);
            return self
                .reject_consumption(user_id, kind, required, available, context)
                .await;
        }

        match self.deduct_credits(user_id, required, kind).await {
            Ok(remaining) => {
                if context.tokens_used.is_some() || context.cost_cents.is_some() {
                    if let Err(e) = self
                        .record_telemetry(
                            user_id,
                            context.tokens_used.unwrap_or(0),
                            context.cost_cents.unwrap_or(0),
                        )
                        .await
                    {
                        tracing::warn!(
                            user_id = %user_id,
                            error = %e,
                            "Failed to aggregate usage telemetry"
                        );
                    }
                }

                let draft = UsageEventDraft::new(user_id, kind)
                    .credits(required)
                    .context(context);
                if let Err(e) = self.events.log_event(draft).await {
                    tracing::warn!(user_id = %user_id, error = %e, "Failed to log usage event");
                }

                Ok(ConsumeOutcome {
                    success: true,
                    remaining,
                    error: None,
                })
            }
            // Lost the race between check and deduct; same outcome as a
            // failed check.
            Err(MeteringError::InsufficientCredits {
                required,
                available,
            }) => {
                self.reject_consumption(user_id, kind, required, available, context)
                    .await
            }
            Err(e) => {
                let draft = UsageEventDraft::new(user_id, kind)
                    .context(context)
                    .failed(e.to_string());
                if let Err(log_err) = self.events.log_event(draft).await {
                    tracing::warn!(
                        user_id = %user_id,
                        error = %log_err,
                        "Failed to log unsuccessful usage event"
                    );
                }
                Err(e)
            }
        }
    }

    async fn reject_consumption(
        &self,
        user_id: UserId,
        kind: UsageKind,
        required: i64,
        available: i64,
        context: UsageContext,
    ) -> MeteringResult<ConsumeOutcome> {
        let message = MeteringError::InsufficientCredits {
            required,
            available,
        }
        .to_string();

        let draft = UsageEventDraft::new(user_id, kind)
            .context(context)
            .failed(&message);
        if let Err(e) = self.events.log_event(draft).await {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Failed to log unsuccessful usage event"
            );
        }

        tracing::info!(
            user_id = %user_id,
            kind = %kind,
            required,
            available,
            "Credit consumption rejected"
        );

        Ok(ConsumeOutcome {
            success: false,
            remaining: Limit::Finite(available),
            error: Some(message),
        })
    }

    async fn record_telemetry(
        &self,
        user_id: UserId,
        tokens: i64,
        cost_cents: i64,
    ) -> MeteringResult<()> {
        let period = current_period();
        sqlx::query(
            r#"
            UPDATE usage_records SET
                tokens_used = tokens_used + $3,
                estimated_cost_cents = estimated_cost_cents + $4,
                updated_at = NOW()
            WHERE user_id = $1 AND period = $2
            "#,
        )
        .bind(user_id)
        .bind(&period)
        .bind(tokens)
        .bind(cost_cents)
        .execute(&self.pool)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))?;
        Ok(())
    }

    /// Re-seed the current period from the plan's limit and zero all
    /// counters. Runs at the start of each billing cycle.
    pub async fn reset_credits(&self, user_id: UserId) -> MeteringResult<UsageRecord> {
        let period = current_period();
        let plan = self.plans.get_or_create_plan(user_id).await?;
        let limit_raw = plan.credits_limit.to_raw();

        self.get_or_create_usage_in(user_id, &period).await?;

        let row = sqlx::query_as::<_, UsageRow>(
            r#"
            UPDATE usage_records SET
                credits_limit = $3,
                credits_used = 0,
                credits_remaining = $3,
                page_generations = 0,
                section_regenerations = 0,
                element_regenerations = 0,
                field_inferences = 0,
                tokens_used = 0,
                estimated_cost_cents = 0,
                updated_at = NOW()
            WHERE user_id = $1 AND period = $2
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&period)
        .bind(limit_raw)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))?
        .ok_or_else(|| MeteringError::UsageNotFound {
            user_id,
            period: period.clone(),
        })?;

        tracing::info!(
            user_id = %user_id,
            period = %period,
            credits_limit = limit_raw,
            "Credits reset for new billing cycle"
        );
        Ok(row.into())
    }

    /// Mid-period limit change: `remaining = max(0, new_limit - used)`,
    /// computed under the row lock so a concurrent deduction cannot
    /// interleave.
    pub async fn update_credit_limit(
        &self,
        user_id: UserId,
        new_limit: Limit,
    ) -> MeteringResult<UsageRecord> {
        let period = current_period();
        self.get_or_create_usage_in(user_id, &period).await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MeteringError::Database(e.to_string()))?;

        let used: Option<i64> = sqlx::query_scalar(
            "SELECT credits_used FROM usage_records WHERE user_id = $1 AND period = $2 FOR UPDATE",
        )
        .bind(user_id)
        .bind(&period)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))?;

        let used = used.ok_or_else(|| MeteringError::UsageNotFound {
            user_id,
            period: period.clone(),
        })?;
        let remaining_raw = remaining_after_limit_change(new_limit, used);

        let row = sqlx::query_as::<_, UsageRow>(
            r#"
            UPDATE usage_records SET
                credits_limit = $3,
                credits_remaining = $4,
                updated_at = NOW()
            WHERE user_id = $1 AND period = $2
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&period)
        .bind(new_limit.to_raw())
        .bind(remaining_raw)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| MeteringError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| MeteringError::Database(e.to_string()))?;

        tracing::info!(
            user_id = %user_id,
            period = %period,
            new_limit = %new_limit,
            remaining = remaining_raw,
            "Credit limit updated mid-period"
        );
        Ok(row.into())
    }

    /// Align the current period's limit with the plan. Called after any
    /// tier change so the new allotment takes effect immediately instead
    /// of waiting for the next period seed.
    pub async fn sync_limit_to_plan(&self, user_id: UserId) -> MeteringResult<UsageRecord> {
        let plan = self.plans.get_or_create_plan(user_id).await?;
        self.update_credit_limit(user_id, plan.credits_limit).await
    }

    /// Balance projection for the account UI.
    pub async fn get_credit_balance(&self, user_id: UserId) -> MeteringResult<CreditBalance> {
        let usage = self.get_or_create_usage(user_id).await?;
        let plan = self.plans.get_or_create_plan(user_id).await?;
        let now = OffsetDateTime::now_utc();
        let next_reset = next_reset_after(now);

        Ok(CreditBalance {
            used: usage.credits_used,
            remaining: usage.credits_remaining,
            limit: usage.credits_limit,
            percent_used: percent_used(usage.credits_used, usage.credits_limit),
            days_until_reset: (next_reset - now).whole_days(),
            next_reset_date: next_reset,
            tier: plan.tier,
        })
    }

    /// Reporting projection for one period (default: current). `None`
    /// when the user has no record for that period.
    pub async fn get_usage_stats(
        &self,
        user_id: UserId,
        period: Option<String>,
    ) -> MeteringResult<Option<UsageStats>> {
        let period = match period {
            Some(p) => {
                validate_period(&p)?;
                p
            }
            None => current_period(),
        };

        let row = self.fetch_usage(user_id, &period).await?;
        Ok(row.map(|r| UsageStats {
            period: r.period.clone(),
            credits: CreditsSnapshot {
                used: r.credits_used,
                remaining: Limit::from_raw(r.credits_remaining),
                limit: Limit::from_raw(r.credits_limit),
            },
            operations: OperationCounts {
                page_generations: r.page_generations,
                section_regenerations: r.section_regenerations,
                element_regenerations: r.element_regenerations,
                field_inferences: r.field_inferences,
            },
            tokens_used: r.tokens_used,
            estimated_cost_cents: r.estimated_cost_cents,
        }))
    }
}
