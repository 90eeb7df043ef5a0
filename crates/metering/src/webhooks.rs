//! Billing provider webhooks
//!
//! The billing provider is an opaque collaborator that pushes
//! subscription lifecycle events over signed HTTP. Events carry a
//! `t=<unix>,v1=<hex>` signature header where `v1` is HMAC-SHA256 over
//! `"{t}.{body}"` keyed with the shared secret. Requests older than the
//! tolerance are rejected to blunt replay.

use hmac::{Hmac, Mac};
use pagesmith_shared::{PlanStatus, PlanTier, UserId};
use serde::Deserialize;
use sha2::Sha256;
use time::OffsetDateTime;

use crate::error::{MeteringError, MeteringResult};
use crate::plans::PlanService;
use crate::usage::UsageLedger;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted clock skew between the provider and us.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Inbound billing event. `data` is provider-shaped and interpreted
/// per event type.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingWebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub user_id: UserId,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// What a processed event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookOutcome {
    pub handled: bool,
    pub action: &'static str,
}

/// Verifies and applies billing provider events.
#[derive(Clone)]
pub struct WebhookProcessor {
    plans: PlanService,
    usage: UsageLedger,
    secret: String,
}

impl WebhookProcessor {
    pub fn new(plans: PlanService, usage: UsageLedger, secret: String) -> Self {
        Self {
            plans,
            usage,
            secret,
        }
    }

    /// Check the `t=<unix>,v1=<hex>` signature header against the raw
    /// request body. Fails closed when no secret is configured.
    pub fn verify_signature(
        &self,
        payload: &[u8],
        header: &str,
        now_unix: i64,
    ) -> MeteringResult<()> {
        verify_signed_payload(&self.secret, payload, header, now_unix)
    }

    /// Parse and dispatch one event body.
    pub async fn process_payload(&self, payload: &[u8]) -> MeteringResult<WebhookOutcome> {
        let event: BillingWebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| MeteringError::WebhookPayload(e.to_string()))?;
        self.process_event(event).await
    }

    /// Apply one verified event to the plan store.
    pub async fn process_event(&self, event: BillingWebhookEvent) -> MeteringResult<WebhookOutcome> {
        match event.event_type.as_str() {
            "subscription.updated" => self.handle_subscription_updated(event).await,
            "subscription.cancelled" | "subscription.canceled" => {
                self.handle_subscription_cancelled(event).await
            }
            "payment.failed" => self.handle_payment_failed(event).await,
            "trial.ended" => self.handle_trial_ended(event).await,
            other => {
                tracing::info!(
                    event_type = %other,
                    user_id = %event.user_id,
                    "Ignoring unhandled billing event"
                );
                Ok(WebhookOutcome {
                    handled: false,
                    action: "ignored",
                })
            }
        }
    }

    async fn handle_subscription_updated(
        &self,
        event: BillingWebhookEvent,
    ) -> MeteringResult<WebhookOutcome> {
        let user_id = event.user_id;

        if let Some(status) = event.data.get("status").and_then(|v| v.as_str()) {
            let status: PlanStatus = status.parse().map_err(MeteringError::WebhookPayload)?;
            self.plans.update_plan_status(user_id, status).await?;
        }

        let start = unix_field(&event.data, "current_period_start")?;
        let end = unix_field(&event.data, "current_period_end")?;
        if let (Some(start), Some(end)) = (start, end) {
            self.plans.update_billing_period(user_id, start, end).await?;
        }

        Ok(WebhookOutcome {
            handled: true,
            action: "subscription_updated",
        })
    }

    async fn handle_subscription_cancelled(
        &self,
        event: BillingWebhookEvent,
    ) -> MeteringResult<WebhookOutcome> {
        self.plans.downgrade_plan(event.user_id, PlanTier::Free).await?;
        self.usage.sync_limit_to_plan(event.user_id).await?;

        tracing::info!(
            user_id = %event.user_id,
            "Subscription cancelled, plan downgraded to free"
        );
        Ok(WebhookOutcome {
            handled: true,
            action: "subscription_cancelled",
        })
    }

    async fn handle_payment_failed(
        &self,
        event: BillingWebhookEvent,
    ) -> MeteringResult<WebhookOutcome> {
        self.plans
            .update_plan_status(event.user_id, PlanStatus::PastDue)
            .await?;

        tracing::warn!(user_id = %event.user_id, "Payment failed, plan marked past due");
        Ok(WebhookOutcome {
            handled: true,
            action: "payment_failed",
        })
    }

    async fn handle_trial_ended(
        &self,
        event: BillingWebhookEvent,
    ) -> MeteringResult<WebhookOutcome> {
        let convert = event
            .data
            .get("convert")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        self.plans.end_trial(event.user_id, convert).await?;
        if !convert {
            self.usage.sync_limit_to_plan(event.user_id).await?;
        }

        Ok(WebhookOutcome {
            handled: true,
            action: "trial_ended",
        })
    }
}

fn verify_signed_payload(
    secret: &str,
    payload: &[u8],
    header: &str,
    now_unix: i64,
) -> MeteringResult<()> {
    if secret.is_empty() {
        return Err(MeteringError::Config(
            "billing webhook secret is not configured".to_string(),
        ));
    }

    let mut timestamp: Option<i64> = None;
    let mut signature: Option<&str> = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signature = Some(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        MeteringError::WebhookSignature("missing or malformed timestamp".to_string())
    })?;
    let signature = signature
        .ok_or_else(|| MeteringError::WebhookSignature("missing v1 signature".to_string()))?;

    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(MeteringError::WebhookSignature(format!(
            "timestamp outside {}s tolerance",
            SIGNATURE_TOLERANCE_SECS
        )));
    }

    let provided = hex::decode(signature)
        .map_err(|_| MeteringError::WebhookSignature("signature is not valid hex".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| MeteringError::Config(format!("invalid webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    // verify_slice is constant-time over the digest
    mac.verify_slice(&provided)
        .map_err(|_| MeteringError::WebhookSignature("signature mismatch".to_string()))
}

fn unix_field(data: &serde_json::Value, key: &str) -> MeteringResult<Option<OffsetDateTime>> {
    match data.get(key).and_then(|v| v.as_i64()) {
        None => Ok(None),
        Some(ts) => OffsetDateTime::from_unix_timestamp(ts)
            .map(Some)
            .map_err(|_| MeteringError::WebhookPayload(format!("{} out of range: {}", key, ts))),
    }
}
