// Per-route token-bucket rate limiting evaluated atomically in the shared
// store so every replica observes one bucket per (route, principal).

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::KeyValueStore;

/// Route names used for bucket keys. Kept apart from URL paths so policy
/// keys stay stable across route refactors.
pub mod routes {
    pub const LOGIN: &str = "login";
    pub const REGISTER: &str = "register";
    pub const REFRESH: &str = "refresh";
    pub const FORGOT_PASSWORD: &str = "forgot-password";
    pub const RESET_PASSWORD: &str = "reset-password";
    pub const REQUEST_PASSWORD_RESET: &str = "request-password-reset";
}

/// One bucket's parameters: peak burst and the time to refill fully.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoutePolicy {
    pub capacity: u32,
    pub window_ms: u64,
}

impl RoutePolicy {
    pub const fn new(capacity: u32, window_ms: u64) -> Self {
        Self {
            capacity,
            window_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub enabled: bool,
    /// Deny instead of admit when the store is unreachable. Off by default:
    /// a store outage must not lock out the whole surface.
    pub fail_closed: bool,
    pub routes: HashMap<&'static str, RoutePolicy>,
    pub default: RoutePolicy,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let mut routes = HashMap::new();
        routes.insert(routes::LOGIN, RoutePolicy::new(5, 60_000));
        routes.insert(routes::REGISTER, RoutePolicy::new(10, 300_000));
        routes.insert(routes::REFRESH, RoutePolicy::new(30, 300_000));
        routes.insert(routes::FORGOT_PASSWORD, RoutePolicy::new(3, 3_600_000));
        routes.insert(routes::RESET_PASSWORD, RoutePolicy::new(5, 3_600_000));

        Self {
            enabled: true,
            fail_closed: false,
            routes,
            default: RoutePolicy::new(60, 60_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub tokens_remaining: u32,
    pub retry_after_ms: u64,
}

impl RateLimitDecision {
    fn allow(tokens_remaining: u32) -> Self {
        Self {
            allowed: true,
            tokens_remaining,
            retry_after_ms: 0,
        }
    }

    /// Seconds for the Retry-After header: ceiling, never zero on a denial.
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after_ms.div_ceil(1_000).max(1)
    }
}

pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    settings: RateLimitSettings,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: RateLimitSettings) -> Self {
        Self { store, settings }
    }

    pub fn policy_for(&self, route: &str) -> RoutePolicy {
        self.settings
            .routes
            .get(route)
            .copied()
            .unwrap_or(self.settings.default)
    }

    /// Take one token from the (route, principal) bucket. Store failures
    /// fail open unless configured otherwise.
    pub async fn take(&self, route: &str, principal: &str) -> RateLimitDecision {
        let policy = self.policy_for(route);
        if !self.settings.enabled {
            return RateLimitDecision::allow(policy.capacity);
        }

        let key = format!("rl:{}:{}", route, principal);
        match self
            .store
            .take_bucket(&key, policy.capacity, policy.window_ms)
            .await
        {
            Ok(decision) => RateLimitDecision {
                allowed: decision.allowed,
                tokens_remaining: decision.tokens_remaining,
                retry_after_ms: decision.retry_after_ms,
            },
            Err(e) if self.settings.fail_closed => {
                warn!(route, "rate limit store unavailable, failing closed: {}", e);
                RateLimitDecision {
                    allowed: false,
                    tokens_remaining: 0,
                    retry_after_ms: policy.window_ms,
                }
            }
            Err(e) => {
                warn!(route, "rate limit store unavailable, failing open: {}", e);
                RateLimitDecision::allow(policy.capacity)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ManualClock, MemoryStore};

    fn limiter_with(settings: RateLimitSettings) -> (RateLimiter, Arc<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        (RateLimiter::new(store.clone(), settings), store, clock)
    }

    #[tokio::test]
    async fn burst_up_to_capacity_then_denied_with_retry_after() {
        let (limiter, _, _) = limiter_with(RateLimitSettings::default());

        for n in (0..5).rev() {
            let decision = limiter.take(routes::LOGIN, "ip:10.0.0.1").await;
            assert!(decision.allowed);
            assert_eq!(decision.tokens_remaining, n);
        }

        let denied = limiter.take(routes::LOGIN, "ip:10.0.0.1").await;
        assert!(!denied.allowed);
        assert!(denied.retry_after_ms > 0);
        assert!(denied.retry_after_secs() >= 1);
    }

    #[tokio::test]
    async fn buckets_are_per_principal_and_per_route() {
        let (limiter, _, _) = limiter_with(RateLimitSettings::default());

        for _ in 0..5 {
            assert!(limiter.take(routes::LOGIN, "ip:10.0.0.1").await.allowed);
        }
        assert!(!limiter.take(routes::LOGIN, "ip:10.0.0.1").await.allowed);

        // different principal, same route
        assert!(limiter.take(routes::LOGIN, "ip:10.0.0.2").await.allowed);
        // same principal, different route
        assert!(limiter.take(routes::REGISTER, "ip:10.0.0.1").await.allowed);
    }

    #[tokio::test]
    async fn bucket_refills_linearly_over_the_window() {
        let (limiter, _, clock) = limiter_with(RateLimitSettings::default());

        for _ in 0..5 {
            limiter.take(routes::LOGIN, "user:1").await;
        }
        assert!(!limiter.take(routes::LOGIN, "user:1").await.allowed);

        // login refills one token per 12s
        clock.advance_ms(12_000);
        assert!(limiter.take(routes::LOGIN, "user:1").await.allowed);
        assert!(!limiter.take(routes::LOGIN, "user:1").await.allowed);
    }

    #[tokio::test]
    async fn steady_state_admits_capacity_per_window() {
        let (limiter, _, clock) = limiter_with(RateLimitSettings::default());

        // hammer the bucket every 500ms for three windows
        let mut admitted = 0u32;
        for _ in 0..360 {
            if limiter.take(routes::LOGIN, "user:9").await.allowed {
                admitted += 1;
            }
            clock.advance_ms(500);
        }

        // 3 minutes at 5/min, +capacity for the initial burst, ±1 rounding
        assert!((15..=21).contains(&admitted), "admitted {}", admitted);
    }

    #[tokio::test]
    async fn store_failure_fails_open_with_full_capacity() {
        let (limiter, store, _) = limiter_with(RateLimitSettings::default());
        store.set_failing(true);

        let decision = limiter.take(routes::LOGIN, "ip:10.0.0.1").await;
        assert!(decision.allowed);
        assert_eq!(decision.tokens_remaining, 5);
    }

    #[tokio::test]
    async fn fail_closed_denies_on_store_failure() {
        let settings = RateLimitSettings {
            fail_closed: true,
            ..Default::default()
        };
        let (limiter, store, _) = limiter_with(settings);
        store.set_failing(true);

        let decision = limiter.take(routes::LOGIN, "ip:10.0.0.1").await;
        assert!(!decision.allowed);
        assert!(decision.retry_after_secs() >= 1);
    }

    #[tokio::test]
    async fn disabled_limiter_always_admits() {
        let settings = RateLimitSettings {
            enabled: false,
            ..Default::default()
        };
        let (limiter, _, _) = limiter_with(settings);

        for _ in 0..100 {
            assert!(limiter.take(routes::LOGIN, "ip:10.0.0.1").await.allowed);
        }
    }

    #[tokio::test]
    async fn unknown_routes_use_the_default_policy() {
        let (limiter, _, _) = limiter_with(RateLimitSettings::default());
        let decision = limiter.take("metrics", "ip:10.0.0.1").await;
        assert!(decision.allowed);
        assert_eq!(decision.tokens_remaining, 59);
    }
}
