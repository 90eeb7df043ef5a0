// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Metering System
//!
//! Tests critical boundary conditions and race conditions in:
//! - Credit accounting (METER-C01 to METER-C08)
//! - Rate limit windows (METER-W01 to METER-W09)
//! - Plan catalog (METER-P01 to METER-P06)
//! - Webhook signatures (METER-WH01 to METER-WH06)
//! - Period arithmetic (METER-T01 to METER-T05)
//! - Unlimited sentinel handling (METER-L01 to METER-L05)

#[cfg(test)]
mod credit_tests {
    use crate::error::MeteringError;
    use crate::usage::{percent_used, remaining_after_limit_change, CreditCheck};
    use pagesmith_shared::Limit;

    // =========================================================================
    // METER-C01: required == remaining - last affordable call must pass
    // =========================================================================
    #[test]
    fn test_exact_remaining_is_allowed() {
        let check = CreditCheck::evaluate(Limit::Finite(30), Limit::Finite(10), 10);
        assert!(check.allowed, "Spending exactly the remaining balance must pass");
    }

    // =========================================================================
    // METER-C02: required == remaining + 1 - one over must fail
    // =========================================================================
    #[test]
    fn test_one_over_remaining_is_rejected() {
        let check = CreditCheck::evaluate(Limit::Finite(30), Limit::Finite(10), 11);
        assert!(!check.allowed);
        assert_eq!(check.remaining, Limit::Finite(10));
    }

    // =========================================================================
    // METER-C03: zero-cost operations pass even at zero balance
    // =========================================================================
    #[test]
    fn test_zero_required_at_zero_balance() {
        let check = CreditCheck::evaluate(Limit::Finite(30), Limit::Finite(0), 0);
        assert!(check.allowed);
    }

    // =========================================================================
    // METER-C04: unlimited plans never reject, even for huge requests
    // =========================================================================
    #[test]
    fn test_unlimited_never_rejects() {
        let check = CreditCheck::evaluate(Limit::Unlimited, Limit::Unlimited, 1_000_000_000);
        assert!(check.allowed);
        assert_eq!(check.remaining, Limit::Unlimited);
    }

    // =========================================================================
    // METER-C05: free-tier exhaustion - 30 single-credit calls pass, the
    // 31st fails with the canonical shortfall message
    // =========================================================================
    #[test]
    fn test_free_tier_exhaustion_scenario() {
        let limit = Limit::Finite(30);
        let mut remaining = 30i64;

        for call in 1..=30 {
            let check = CreditCheck::evaluate(limit, Limit::Finite(remaining), 1);
            assert!(check.allowed, "call {} should pass", call);
            remaining -= 1;
        }
        assert_eq!(remaining, 0);

        let check = CreditCheck::evaluate(limit, Limit::Finite(remaining), 1);
        assert!(!check.allowed, "31st call must be rejected");

        let message = MeteringError::InsufficientCredits {
            required: 1,
            available: 0,
        }
        .to_string();
        assert_eq!(message, "Insufficient credits. Required: 1, Available: 0");
    }

    // =========================================================================
    // METER-C06: shortfall message carries the caller's numbers verbatim
    // =========================================================================
    #[test]
    fn test_shortfall_message_format() {
        let message = MeteringError::InsufficientCredits {
            required: 10,
            available: 3,
        }
        .to_string();
        assert_eq!(message, "Insufficient credits. Required: 10, Available: 3");
    }

    // =========================================================================
    // METER-C07: mid-period limit decrease floors remaining at zero
    // =========================================================================
    #[test]
    fn test_limit_decrease_below_used_floors_at_zero() {
        // Pro user spent 180, then downgraded to free (30)
        assert_eq!(remaining_after_limit_change(Limit::Finite(30), 180), 0);
        // and an upgrade mid-period grants the difference
        assert_eq!(remaining_after_limit_change(Limit::Finite(200), 25), 175);
        // moving to unlimited keeps the sentinel
        assert_eq!(
            remaining_after_limit_change(Limit::Unlimited, 180),
            Limit::UNLIMITED_RAW
        );
    }

    // =========================================================================
    // METER-C08: percent_used saturates instead of exceeding 100
    // =========================================================================
    #[test]
    fn test_percent_used_saturation() {
        assert_eq!(percent_used(180, Limit::Finite(30)), 100.0);
        assert_eq!(percent_used(29, Limit::Finite(30)), 97.0);
        assert_eq!(percent_used(u32::MAX as i64, Limit::Unlimited), 0.0);
    }
}

#[cfg(test)]
mod window_tests {
    use crate::rate_limit::*;
    use std::sync::Arc;

    fn deterministic_limiter(start_ms: i64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let limiter = RateLimiter::with_parts(
            Arc::new(InMemoryStore::new()),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        (limiter, clock)
    }

    // =========================================================================
    // METER-W01: first request opens a window and leaves max-1 remaining
    // =========================================================================
    #[test]
    fn test_first_request_opens_window() {
        let (limiter, _) = deterministic_limiter(0);
        let config = RateLimitConfig::new(60, 60_000);

        let decision = limiter.check("user:a", &config);
        assert!(decision.allowed, "First request should be allowed");
        assert_eq!(decision.remaining, 59, "Should have 59 remaining");
        assert_eq!(decision.reset_at_ms, 60_000);
    }

    // =========================================================================
    // METER-W02: 6th request when limit=5 - should be rejected
    // =========================================================================
    #[test]
    fn test_sixth_request_of_five_rejected() {
        let (limiter, _) = deterministic_limiter(0);
        let config = RateLimitConfig::new(5, 60_000);

        for i in 0..5 {
            let decision = limiter.check("user:a", &config);
            assert!(decision.allowed, "Request {} should be allowed", i);
        }

        let decision = limiter.check("user:a", &config);
        assert!(!decision.allowed, "6th request should be rejected");
        assert_eq!(decision.remaining, 0);
        assert!(decision.retry_after_secs >= 1, "Should have a retry hint");
    }

    // =========================================================================
    // METER-W03: first request after expiry starts fresh with requests=1
    // =========================================================================
    #[test]
    fn test_expired_window_starts_fresh() {
        let (limiter, clock) = deterministic_limiter(0);
        let config = RateLimitConfig::new(5, 60_000);

        for _ in 0..5 {
            limiter.check("user:a", &config);
        }
        assert!(!limiter.check("user:a", &config).allowed);

        clock.set(60_001);
        let decision = limiter.check("user:a", &config);
        assert!(decision.allowed, "First request of the new window should pass");
        assert_eq!(decision.remaining, 4, "Fresh window counts from one");
        assert_eq!(decision.reset_at_ms, 120_001);
    }

    // =========================================================================
    // METER-W04: rejected requests do not consume window capacity
    // =========================================================================
    #[test]
    fn test_rejections_do_not_extend_window() {
        let (limiter, clock) = deterministic_limiter(0);
        let config = RateLimitConfig::new(1, 60_000);

        assert!(limiter.check("user:a", &config).allowed);
        for _ in 0..10 {
            let rejected = limiter.check("user:a", &config);
            assert!(!rejected.allowed);
            assert_eq!(rejected.reset_at_ms, 60_000, "Hammering must not move the reset");
        }

        clock.set(60_001);
        assert!(limiter.check("user:a", &config).allowed);
    }

    // =========================================================================
    // METER-W05: exact reset instant still belongs to the old window
    // =========================================================================
    #[test]
    fn test_reset_instant_is_exclusive() {
        let (limiter, clock) = deterministic_limiter(0);
        let config = RateLimitConfig::new(1, 60_000);

        assert!(limiter.check("user:a", &config).allowed);
        clock.set(60_000);
        assert!(!limiter.check("user:a", &config).allowed);
    }

    // =========================================================================
    // METER-W06: 10 parallel requests on a limit of 10 - all admitted,
    // the 11th is not
    // =========================================================================
    #[tokio::test]
    async fn test_concurrent_requests_respect_limit() {
        use tokio::sync::Barrier;

        let (limiter, _) = deterministic_limiter(0);
        let config = RateLimitConfig::new(10, 60_000);
        let barrier = Arc::new(Barrier::new(20));

        let mut handles = vec![];
        for _ in 0..20 {
            let limiter = limiter.clone();
            let config = config.clone();
            let barrier = Arc::clone(&barrier);

            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                limiter.check("user:contended", &config)
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10, "Exactly the window capacity may pass");
    }

    // =========================================================================
    // METER-W07: user and IP keyspaces never collide
    // =========================================================================
    #[test]
    fn test_user_and_ip_keys_isolated() {
        let (limiter, _) = deterministic_limiter(0);
        let config = RateLimitConfig::new(1, 60_000);

        assert!(limiter.check("user:42", &config).allowed);
        assert!(!limiter.check("user:42", &config).allowed);
        assert!(limiter.check("ip:42", &config).allowed);
    }

    // =========================================================================
    // METER-W08: fail-open admits with a full window, fail-closed denies
    // with a retry hint
    // =========================================================================
    #[test]
    fn test_failure_policies() {
        let open = RateLimitPreset::AiGeneration.config();
        let decision = open.on_error_decision(1_000);
        assert!(decision.allowed, "AI generation fails open");

        let closed = RateLimitConfig::new(20, 60_000).on_internal_error(FailurePolicy::Deny);
        let decision = closed.on_error_decision(1_000);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_secs, 60);
    }

    // =========================================================================
    // METER-W09: cleanup sweeps only expired windows
    // =========================================================================
    #[test]
    fn test_cleanup_is_selective() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(InMemoryStore::new());
        let limiter = RateLimiter::with_parts(
            Arc::clone(&store) as Arc<dyn WindowStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );

        limiter.check("user:a", &RateLimitConfig::new(5, 1_000));
        limiter.check("user:b", &RateLimitConfig::new(5, 120_000));

        clock.set(60_000);
        assert_eq!(limiter.cleanup(), 1, "Only the expired window goes");
        // the survivor still carries its count
        let decision = limiter.check("user:b", &RateLimitConfig::new(5, 120_000));
        assert_eq!(decision.remaining, 3);
    }
}

#[cfg(test)]
mod catalog_tests {
    use crate::catalog::PlanConfig;
    use pagesmith_shared::{FeatureKey, Limit, LimitKey, PlanTier};

    // =========================================================================
    // METER-P01: free tier ships 30 credits and a single published page
    // =========================================================================
    #[test]
    fn test_free_tier_entitlements() {
        let free = PlanConfig::free();
        assert_eq!(free.credits_per_month, Limit::Finite(30));
        assert_eq!(free.limits.published_pages, Limit::Finite(1));
        assert_eq!(free.monthly_price_cents, 0);
        assert!(!free.features.remove_branding);
    }

    // =========================================================================
    // METER-P02: pro tier ships 200 credits and branding removal
    // =========================================================================
    #[test]
    fn test_pro_tier_entitlements() {
        let pro = PlanConfig::pro();
        assert_eq!(pro.credits_per_month, Limit::Finite(200));
        assert!(pro.features.remove_branding);
    }

    // =========================================================================
    // METER-P03: enterprise is unlimited across every countable resource
    // =========================================================================
    #[test]
    fn test_enterprise_is_unlimited() {
        let enterprise = PlanConfig::enterprise();
        assert_eq!(enterprise.credits_per_month, Limit::Unlimited);
        for key in [
            LimitKey::PublishedPages,
            LimitKey::DraftProjects,
            LimitKey::CustomDomains,
            LimitKey::FormSubmissions,
            LimitKey::TeamMembers,
        ] {
            assert_eq!(enterprise.limits.get(key), Limit::Unlimited, "{:?}", key);
        }
    }

    // =========================================================================
    // METER-P04: paid tiers strictly dominate free on every limit
    // =========================================================================
    #[test]
    fn test_paid_tiers_dominate_free() {
        let free = PlanConfig::free();
        for tier in [PlanTier::Pro, PlanTier::Agency] {
            let paid = PlanConfig::for_tier(tier);
            for key in [
                LimitKey::PublishedPages,
                LimitKey::DraftProjects,
                LimitKey::CustomDomains,
                LimitKey::FormSubmissions,
                LimitKey::TeamMembers,
            ] {
                let free_limit = free.limits.get(key).as_finite().unwrap_or(i64::MAX);
                let paid_limit = paid.limits.get(key).as_finite().unwrap_or(i64::MAX);
                assert!(
                    paid_limit >= free_limit,
                    "{:?} should not shrink on {:?}",
                    key,
                    tier
                );
            }
        }
    }

    // =========================================================================
    // METER-P05: rate allowances grow monotonically with tier
    // =========================================================================
    #[test]
    fn test_rate_allowances_monotonic() {
        let mut last = 0;
        for tier in PlanTier::all() {
            let allowance = PlanConfig::for_tier(tier).rate_allowance;
            assert!(
                allowance.max_requests > last,
                "{:?} allowance should exceed the previous tier",
                tier
            );
            last = allowance.max_requests;
        }
    }

    // =========================================================================
    // METER-P06: feature grants only ever widen when moving up tiers
    // =========================================================================
    #[test]
    fn test_features_widen_up_tiers() {
        let ordered = [
            PlanConfig::free(),
            PlanConfig::pro(),
            PlanConfig::agency(),
            PlanConfig::enterprise(),
        ];
        for key in [
            FeatureKey::RemoveBranding,
            FeatureKey::CustomCode,
            FeatureKey::AiCopywriter,
            FeatureKey::ExportHtml,
            FeatureKey::PrioritySupport,
        ] {
            let mut seen_enabled = false;
            for config in &ordered {
                let enabled = config.features.is_enabled(key);
                if seen_enabled {
                    assert!(enabled, "{:?} must not disappear on a higher tier", key);
                }
                seen_enabled = seen_enabled || enabled;
            }
        }
    }
}

#[cfg(test)]
mod webhook_signature_tests {
    use crate::error::MeteringError;
    use crate::webhooks::{BillingWebhookEvent, SIGNATURE_TOLERANCE_SECS};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    const SECRET: &str = "whsec_edge_case";
    const NOW: i64 = 1_755_734_400;

    fn sign_with(secret: &str, payload: &[u8], timestamp: i64) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        format!(
            "t={},v1={}",
            timestamp,
            hex::encode(mac.finalize().into_bytes())
        )
    }

    // Pool construction spawns maintenance tasks, so callers must run
    // inside a Tokio runtime even though the pool never connects.
    fn processor() -> crate::webhooks::WebhookProcessor {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/pagesmith_test")
            .unwrap();
        let plans = crate::plans::PlanService::new(pool.clone());
        let events = crate::events::UsageEventLogger::new(pool.clone());
        let usage = crate::usage::UsageLedger::new(pool, plans.clone(), events);
        crate::webhooks::WebhookProcessor::new(plans, usage, SECRET.to_string())
    }

    // =========================================================================
    // METER-WH01: well-signed payload within tolerance is accepted
    // =========================================================================
    #[tokio::test]
    async fn test_valid_signature_accepted() {
        let payload = br#"{"type":"subscription.updated"}"#;
        let header = sign_with(SECRET, payload, NOW);
        assert!(processor().verify_signature(payload, &header, NOW).is_ok());
    }

    // =========================================================================
    // METER-WH02: timestamp exactly at the tolerance edge is accepted,
    // one second past is not
    // =========================================================================
    #[tokio::test]
    async fn test_tolerance_boundary() {
        let payload = b"{}";
        let header = sign_with(SECRET, payload, NOW);
        let processor = processor();

        assert!(processor
            .verify_signature(payload, &header, NOW + SIGNATURE_TOLERANCE_SECS)
            .is_ok());
        assert!(processor
            .verify_signature(payload, &header, NOW + SIGNATURE_TOLERANCE_SECS + 1)
            .is_err());
    }

    // =========================================================================
    // METER-WH03: body tampering invalidates the signature
    // =========================================================================
    #[tokio::test]
    async fn test_tampered_body_rejected() {
        let header = sign_with(SECRET, br#"{"tier":"pro"}"#, NOW);
        let err = processor().verify_signature(br#"{"tier":"agency"}"#, &header, NOW);
        assert!(matches!(err, Err(MeteringError::WebhookSignature(_))));
    }

    // =========================================================================
    // METER-WH04: signatures minted with another secret are rejected
    // =========================================================================
    #[tokio::test]
    async fn test_foreign_secret_rejected() {
        let payload = b"{}";
        let header = sign_with("whsec_somebody_else", payload, NOW);
        let err = processor().verify_signature(payload, &header, NOW);
        assert!(matches!(err, Err(MeteringError::WebhookSignature(_))));
    }

    // =========================================================================
    // METER-WH05: headers missing either component never verify
    // =========================================================================
    #[tokio::test]
    async fn test_partial_headers_rejected() {
        let processor = processor();
        for header in ["t=1755734400", "v1=deadbeef", "", "x=1,y=2"] {
            assert!(
                processor.verify_signature(b"{}", header, NOW).is_err(),
                "{:?} should be rejected",
                header
            );
        }
    }

    // =========================================================================
    // METER-WH06: event envelope tolerates provider-side data shapes
    // =========================================================================
    #[test]
    fn test_event_envelope_parsing() {
        let event: BillingWebhookEvent = serde_json::from_str(
            r#"{
                "type": "subscription.updated",
                "user_id": "a9f0c1de-3b42-4f86-9f21-0d3c8e7b5a64",
                "data": {
                    "status": "past_due",
                    "current_period_start": 1755734400,
                    "current_period_end": 1758412800,
                    "extra_provider_field": {"nested": true}
                }
            }"#,
        )
        .unwrap();
        assert_eq!(event.event_type, "subscription.updated");
        assert_eq!(event.data["status"], "past_due");
    }
}

#[cfg(test)]
mod period_tests {
    use crate::usage::{next_reset_after, period_for, validate_period};
    use time::macros::datetime;

    // =========================================================================
    // METER-T01: period formatting pads months and years
    // =========================================================================
    #[test]
    fn test_period_zero_padding() {
        assert_eq!(period_for(datetime!(2026-01-01 00:00 UTC)), "2026-01");
        assert_eq!(period_for(datetime!(2026-09-30 23:59:59 UTC)), "2026-09");
    }

    // =========================================================================
    // METER-T02: the last instant of a month still belongs to it
    // =========================================================================
    #[test]
    fn test_month_boundary_classification() {
        assert_eq!(
            period_for(datetime!(2026-02-28 23:59:59.999 UTC)),
            "2026-02"
        );
        assert_eq!(period_for(datetime!(2026-03-01 00:00 UTC)), "2026-03");
    }

    // =========================================================================
    // METER-T03: reset lands on the first midnight of the next month
    // =========================================================================
    #[test]
    fn test_reset_date_from_mid_month() {
        assert_eq!(
            next_reset_after(datetime!(2026-08-21 09:15 UTC)),
            datetime!(2026-09-01 00:00 UTC)
        );
    }

    // =========================================================================
    // METER-T04: December resets into January of the next year
    // =========================================================================
    #[test]
    fn test_reset_across_year_boundary() {
        assert_eq!(
            next_reset_after(datetime!(2026-12-01 00:00 UTC)),
            datetime!(2027-01-01 00:00 UTC)
        );
    }

    // =========================================================================
    // METER-T05: leap-year February behaves like any other month
    // =========================================================================
    #[test]
    fn test_leap_february() {
        assert_eq!(period_for(datetime!(2028-02-29 12:00 UTC)), "2028-02");
        assert_eq!(
            next_reset_after(datetime!(2028-02-29 12:00 UTC)),
            datetime!(2028-03-01 00:00 UTC)
        );
        assert!(validate_period("2028-02").is_ok());
    }
}

#[cfg(test)]
mod limit_sentinel_tests {
    use crate::plans::LimitCheck;
    use pagesmith_shared::Limit;

    // =========================================================================
    // METER-L01: -1 on the wire means unlimited in the domain
    // =========================================================================
    #[test]
    fn test_sentinel_decodes_to_unlimited() {
        assert_eq!(Limit::from_raw(-1), Limit::Unlimited);
        assert_eq!(Limit::from_raw(0), Limit::Finite(0));
        assert_eq!(Limit::from_raw(50), Limit::Finite(50));
    }

    // =========================================================================
    // METER-L02: any negative raw value is treated as unlimited, but we
    // only ever emit -1
    // =========================================================================
    #[test]
    fn test_negative_raw_collapses_to_canonical_sentinel() {
        assert_eq!(Limit::from_raw(-7), Limit::Unlimited);
        assert_eq!(Limit::Unlimited.to_raw(), -1);
    }

    // =========================================================================
    // METER-L03: JSON carries the raw integer representation
    // =========================================================================
    #[test]
    fn test_limit_json_representation() {
        assert_eq!(serde_json::to_string(&Limit::Unlimited).unwrap(), "-1");
        assert_eq!(serde_json::to_string(&Limit::Finite(10)).unwrap(), "10");
        assert_eq!(
            serde_json::from_str::<Limit>("-1").unwrap(),
            Limit::Unlimited
        );
    }

    // =========================================================================
    // METER-L04: unlimited resource checks pass at any current usage
    // =========================================================================
    #[test]
    fn test_unlimited_resource_check_always_allows() {
        for current in [0, 1, 10_000, i64::MAX] {
            let check = LimitCheck::evaluate(Limit::Unlimited, current);
            assert!(check.allowed, "current={} must be allowed", current);
        }
    }

    // =========================================================================
    // METER-L05: finite resource checks reject only at or past the limit
    // =========================================================================
    #[test]
    fn test_finite_resource_check_boundary() {
        assert!(LimitCheck::evaluate(Limit::Finite(3), 2).allowed);
        assert!(!LimitCheck::evaluate(Limit::Finite(3), 3).allowed);
        assert!(!LimitCheck::evaluate(Limit::Finite(3), 4).allowed);
        assert!(!LimitCheck::evaluate(Limit::Finite(0), 0).allowed);
    }
}
