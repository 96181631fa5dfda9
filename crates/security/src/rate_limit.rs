//! Per-identity fixed-window rate limiting with progressive blacklisting.
//!
//! Each identity gets a counting bucket for the current window. Requests
//! over the limit count as violations; crossing the violation threshold
//! blacklists the identity for a fixed duration. An active blacklist
//! entry supersedes the bucket entirely.
//!
//! State is process-local. Several instances behind a load balancer do
//! not share buckets or blacklists.

use crate::mask::mask_identity;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use switchboard_config::{MAX_DURATION_SECS, RateLimitConfig};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of a single `check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// End of the current window, or the unblock time when blacklisted
    pub reset_time: DateTime<Utc>,
    /// Whole seconds (rounded up) until a retry can succeed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(default)]
    pub blacklisted: bool,
}

impl RateLimitDecision {
    /// User-facing text for a rejected request. `None` when allowed.
    pub fn user_message(&self) -> Option<String> {
        if self.allowed {
            return None;
        }
        if self.blacklisted {
            return Some(
                "⛔ Your account has been temporarily suspended due to excessive requests. \
                 Please try again later."
                    .into(),
            );
        }
        let wait = self.retry_after_secs.unwrap_or(1);
        Some(format!(
            "⏰ You're sending messages too quickly. Please wait {wait}s before trying again."
        ))
    }
}

/// Counts removed by one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub buckets_removed: usize,
    pub blacklist_removed: usize,
}

#[derive(Debug, Clone)]
struct Bucket {
    count: u32,
    reset_time: DateTime<Utc>,
    violations: u32,
}

#[derive(Debug, Default)]
struct LimiterState {
    buckets: HashMap<String, Bucket>,
    /// identity → unblock time
    blacklist: HashMap<String, DateTime<Utc>>,
}

/// Fixed-window request limiter keyed by caller identity.
///
/// One mutex guards both maps, so the background sweep and request
/// checks never interleave.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    blacklist_threshold: u32,
    blacklist_duration: Duration,
    state: Mutex<LimiterState>,
}

fn secs_until(target: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let ms = (target - now).num_milliseconds().max(0) as u64;
    ms.div_ceil(1000)
}

/// Configured seconds, clamped so `now + duration` stays representable.
fn bounded_seconds(secs: u64) -> Duration {
    let secs = secs.min(MAX_DURATION_SECS);
    Duration::try_seconds(secs as i64).unwrap_or(Duration::MAX)
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: bounded_seconds(config.window_secs),
            blacklist_threshold: config.blacklist_threshold.max(1),
            blacklist_duration: bounded_seconds(config.blacklist_duration_secs),
            state: Mutex::new(LimiterState::default()),
        }
    }

    fn fail_open(&self, now: DateTime<Utc>) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            remaining: self.max_requests,
            reset_time: now + self.window,
            retry_after_secs: None,
            blacklisted: false,
        }
    }

    /// Check and count one request from `identity` at `now`.
    ///
    /// Never fails: if internal state is unusable the request is allowed.
    pub fn check(&self, identity: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(_) => {
                error!(
                    identity = %mask_identity(identity),
                    "Rate limiter state poisoned, failing open"
                );
                return self.fail_open(now);
            }
        };
        let state = &mut *guard;

        if let Some(&unblock_at) = state.blacklist.get(identity) {
            if now < unblock_at {
                debug!(identity = %mask_identity(identity), "Rejected blacklisted identity");
                return RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    reset_time: unblock_at,
                    retry_after_secs: Some(secs_until(unblock_at, now)),
                    blacklisted: true,
                };
            }
            state.blacklist.remove(identity);
        }

        let max_requests = self.max_requests;
        let window = self.window;
        let bucket = state
            .buckets
            .entry(identity.to_string())
            .or_insert_with(|| Bucket { count: 0, reset_time: now + window, violations: 0 });

        if now >= bucket.reset_time {
            bucket.count = 0;
            bucket.reset_time = now + window;
        }

        if bucket.count >= max_requests {
            bucket.violations += 1;
            let violations = bucket.violations;
            let reset_time = bucket.reset_time;

            if violations >= self.blacklist_threshold {
                let unblock_at = now + self.blacklist_duration;
                state.blacklist.insert(identity.to_string(), unblock_at);
                warn!(
                    identity = %mask_identity(identity),
                    violations,
                    unblock_at = %unblock_at,
                    "Identity blacklisted after repeated rate-limit violations"
                );
                return RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    reset_time: unblock_at,
                    retry_after_secs: Some(secs_until(unblock_at, now)),
                    blacklisted: true,
                };
            }

            warn!(identity = %mask_identity(identity), violations, "Rate limit exceeded");
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_time,
                retry_after_secs: Some(secs_until(reset_time, now)),
                blacklisted: false,
            };
        }

        bucket.count += 1;
        bucket.violations = bucket.violations.saturating_sub(1);

        RateLimitDecision {
            allowed: true,
            remaining: max_requests - bucket.count,
            reset_time: bucket.reset_time,
            retry_after_secs: None,
            blacklisted: false,
        }
    }

    /// Drop stale buckets and expired blacklist entries.
    ///
    /// A bucket is stale once a full window has passed after its reset time.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepStats {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Rate limiter state poisoned, sweeping anyway");
                poisoned.into_inner()
            }
        };

        let window = self.window;
        let buckets_before = state.buckets.len();
        state.buckets.retain(|_, b| now < b.reset_time + window);
        let blacklist_before = state.blacklist.len();
        state.blacklist.retain(|_, unblock_at| now < *unblock_at);

        SweepStats {
            buckets_removed: buckets_before - state.buckets.len(),
            blacklist_removed: blacklist_before - state.blacklist.len(),
        }
    }

    /// Operator override: lift a blacklist and forget past violations.
    pub fn unblock(&self, identity: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let was_blacklisted = state.blacklist.remove(identity).is_some();
        if let Some(bucket) = state.buckets.get_mut(identity) {
            bucket.violations = 0;
        }
        info!(identity = %mask_identity(identity), was_blacklisted, "Identity unblocked");
    }

    pub fn is_blacklisted(&self, identity: &str, now: DateTime<Utc>) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.blacklist.get(identity).is_some_and(|unblock_at| now < *unblock_at)
    }

    /// Current violation count for an identity.
    pub fn violations(&self, identity: &str) -> u32 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.buckets.get(identity).map(|b| b.violations).unwrap_or(0)
    }

    /// Number of identities with a live bucket.
    pub fn tracked_identities(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.buckets.len()
    }

    /// Run `sweep` on a fixed interval until the returned handle is aborted.
    pub fn spawn_sweeper(limiter: Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let stats = limiter.sweep(Utc::now());
                if stats.buckets_removed > 0 || stats.blacklist_removed > 0 {
                    debug!(
                        buckets_removed = stats.buckets_removed,
                        blacklist_removed = stats.blacklist_removed,
                        "Rate limiter sweep"
                    );
                }
            }
        })
    }
}
