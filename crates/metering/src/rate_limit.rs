//! Fixed-window rate limiting
//!
//! Windows are anchored to the first request: the first hit on a key
//! opens a window of `window_ms` and every later hit inside it counts
//! against `max_requests`. An expired window is replaced by a fresh one
//! on the next hit. The counting store and the clock are injected so
//! the limiter itself stays deterministic under test; production uses
//! the in-process store and the system clock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use pagesmith_shared::{PlanTier, UserId};
use serde::Serialize;

use crate::catalog::{PlanConfig, RateAllowance};

/// Millisecond clock. Injected so window expiry is testable without
/// sleeping.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock, unix epoch milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
    }
}

/// Hand-cranked clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Post-hit view of one key's window.
#[derive(Debug, Clone, Copy)]
pub struct WindowSnapshot {
    pub admitted: bool,
    pub requests: u32,
    pub reset_at_ms: i64,
}

/// Where windows are counted. A hit must be atomic per key: check and
/// increment may not interleave with another hit on the same key.
pub trait WindowStore: Send + Sync {
    /// Count one request against `key`, opening or replacing the window
    /// as needed. Rejected hits do not increment.
    fn hit(&self, key: &str, now_ms: i64, window_ms: i64, max_requests: u32) -> WindowSnapshot;

    /// Drop expired windows; returns how many were removed.
    fn sweep(&self, now_ms: i64) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    requests: u32,
    reset_at_ms: i64,
}

/// Per-process window store. Suited to single-instance deployments;
/// counts are per process, not global.
#[derive(Default)]
pub struct InMemoryStore {
    windows: Mutex<HashMap<String, WindowEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, WindowEntry>> {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn tracked_keys(&self) -> usize {
        self.lock().len()
    }
}

impl WindowStore for InMemoryStore {
    fn hit(&self, key: &str, now_ms: i64, window_ms: i64, max_requests: u32) -> WindowSnapshot {
        let mut windows = self.lock();
        let entry = windows.entry(key.to_string()).or_insert(WindowEntry {
            requests: 0,
            reset_at_ms: now_ms + window_ms,
        });

        if now_ms > entry.reset_at_ms {
            entry.requests = 0;
            entry.reset_at_ms = now_ms + window_ms;
        }

        if entry.requests >= max_requests {
            WindowSnapshot {
                admitted: false,
                requests: entry.requests,
                reset_at_ms: entry.reset_at_ms,
            }
        } else {
            entry.requests += 1;
            WindowSnapshot {
                admitted: true,
                requests: entry.requests,
                reset_at_ms: entry.reset_at_ms,
            }
        }
    }

    fn sweep(&self, now_ms: i64) -> usize {
        let mut windows = self.lock();
        let before = windows.len();
        windows.retain(|_, entry| now_ms <= entry.reset_at_ms);
        before - windows.len()
    }
}

/// What the limiter should do when it cannot evaluate a request, e.g.
/// the tier lookup failed. Traffic shaping admits on failure; quota
/// enforcement would deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    Admit,
    Deny,
}

/// One named traffic class.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_ms: i64,
    /// Resolve the allowance from the caller's plan tier instead of the
    /// preset numbers.
    pub tier_based: bool,
    pub on_internal_error: FailurePolicy,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_ms: i64) -> Self {
        Self {
            max_requests,
            window_ms,
            tier_based: false,
            on_internal_error: FailurePolicy::default(),
        }
    }

    pub fn tier_based(mut self) -> Self {
        self.tier_based = true;
        self
    }

    pub fn on_internal_error(mut self, policy: FailurePolicy) -> Self {
        self.on_internal_error = policy;
        self
    }

    /// Same traffic class, numbers taken from a plan allowance.
    pub fn with_allowance(&self, allowance: RateAllowance) -> Self {
        Self {
            max_requests: allowance.max_requests,
            window_ms: allowance.window_ms,
            tier_based: self.tier_based,
            on_internal_error: self.on_internal_error,
        }
    }

    /// Allowance for a tier under this config; non-tier-based configs
    /// keep their own numbers for every caller.
    pub fn resolve_for_tier(&self, tier: PlanTier) -> Self {
        if self.tier_based {
            self.with_allowance(PlanConfig::for_tier(tier).rate_allowance)
        } else {
            self.clone()
        }
    }

    /// Decision to hand out when evaluation itself failed.
    pub fn on_error_decision(&self, now_ms: i64) -> RateLimitDecision {
        match self.on_internal_error {
            FailurePolicy::Admit => RateLimitDecision {
                allowed: true,
                limit: self.max_requests,
                remaining: self.max_requests,
                reset_at_ms: now_ms + self.window_ms,
                retry_after_secs: 0,
            },
            FailurePolicy::Deny => RateLimitDecision {
                allowed: false,
                limit: self.max_requests,
                remaining: 0,
                reset_at_ms: now_ms + self.window_ms,
                retry_after_secs: secs_until(now_ms, now_ms + self.window_ms),
            },
        }
    }
}

/// Built-in traffic classes. AI generation is the only tier-resolved
/// one; the rest protect endpoints with flat numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitPreset {
    /// Credit-consuming AI operations
    AiGeneration,
    /// Public form submission intake
    FormSubmission,
    /// Draft editing operations
    DraftOps,
    /// Publish/unpublish cycles
    Publishing,
    /// Everything else
    General,
}

impl RateLimitPreset {
    pub fn config(self) -> RateLimitConfig {
        match self {
            RateLimitPreset::AiGeneration => RateLimitConfig::new(10, 60_000).tier_based(),
            RateLimitPreset::FormSubmission => RateLimitConfig::new(20, 60_000),
            RateLimitPreset::DraftOps => RateLimitConfig::new(60, 60_000),
            RateLimitPreset::Publishing => RateLimitConfig::new(10, 300_000),
            RateLimitPreset::General => RateLimitConfig::new(100, 60_000),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RateLimitPreset::AiGeneration => "ai_generation",
            RateLimitPreset::FormSubmission => "form_submission",
            RateLimitPreset::DraftOps => "draft_ops",
            RateLimitPreset::Publishing => "publishing",
            RateLimitPreset::General => "general",
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at_ms: i64,
    /// Zero when allowed
    pub retry_after_secs: i64,
}

fn secs_until(now_ms: i64, reset_at_ms: i64) -> i64 {
    ((reset_at_ms - now_ms).max(0) + 999) / 1000
}

/// Probability that any single check also sweeps expired windows.
const SWEEP_PROBABILITY: f64 = 0.01;

/// Admission control over an injected store and clock.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new_in_memory() -> Self {
        Self::with_parts(Arc::new(InMemoryStore::new()), Arc::new(SystemClock))
    }

    pub fn with_parts(store: Arc<dyn WindowStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Count one request on `key` and decide. Keys from different
    /// traffic classes must not collide; callers prefix accordingly.
    pub fn check(&self, key: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let now_ms = self.clock.now_ms();

        // Amortized cleanup: roughly one check in a hundred also drops
        // every expired window.
        if rand::random::<f64>() < SWEEP_PROBABILITY {
            let removed = self.store.sweep(now_ms);
            if removed > 0 {
                tracing::debug!(removed, "Swept expired rate limit windows");
            }
        }

        let snapshot = self
            .store
            .hit(key, now_ms, config.window_ms, config.max_requests);

        let decision = RateLimitDecision {
            allowed: snapshot.admitted,
            limit: config.max_requests,
            remaining: config.max_requests.saturating_sub(snapshot.requests),
            reset_at_ms: snapshot.reset_at_ms,
            retry_after_secs: if snapshot.admitted {
                0
            } else {
                secs_until(now_ms, snapshot.reset_at_ms)
            },
        };

        if !decision.allowed {
            tracing::debug!(
                key = %key,
                limit = decision.limit,
                retry_after_secs = decision.retry_after_secs,
                "Rate limit exceeded"
            );
        }
        decision
    }

    /// Drop every expired window now.
    pub fn cleanup(&self) -> usize {
        self.store.sweep(self.clock.now_ms())
    }
}

/// Limit key for an authenticated user.
pub fn user_key(user_id: UserId) -> String {
    format!("user:{}", user_id)
}

/// Limit key for an anonymous caller.
pub fn ip_key(addr: &SocketAddr) -> String {
    format!("ip:{}", addr.ip())
}
