// Key-value store contract consumed by the token, one-time-token, and
// rate-limiting services. Implementations: Redis (production) and an
// in-memory substitute for tests and standalone runs.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::{RedisStore, StoreConfig};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store command timed out")]
    Timeout,
}

/// Outcome of an atomic token-bucket evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketDecision {
    pub allowed: bool,
    pub tokens_remaining: u32,
    pub retry_after_ms: u64,
}

/// Minimal contract over the shared key-value store: strings with
/// millisecond TTLs plus the two operations that must be atomic across
/// replicas (single-use consumption and the rate-limit bucket).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// SET with a millisecond TTL. TTLs are strictly positive.
    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<(), StoreError>;

    /// Returns true when a key was actually removed.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn pexpire(&self, key: &str, ttl_ms: u64) -> Result<bool, StoreError>;

    /// Atomic GET + DEL. At most one caller can observe a given value.
    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomic token-bucket take: refill from elapsed time, consume one
    /// token if available, persist `{tokens, last_update}` with the window
    /// as TTL.
    async fn take_bucket(
        &self,
        key: &str,
        capacity: u32,
        window_ms: u64,
    ) -> Result<BucketDecision, StoreError>;
}

/// Injectable time source. Store TTL bookkeeping and token lifetimes run on
/// this clock so tests can steer time without sleeping.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch, UTC.
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for tests.
pub struct ManualClock {
    now_ms: std::sync::atomic::AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: std::sync::atomic::AtomicI64::new(start_ms),
        }
    }

    pub fn starting_now() -> Self {
        Self::new(chrono::Utc::now().timestamp_millis())
    }

    pub fn advance_ms(&self, delta: i64) {
        self.now_ms
            .fetch_add(delta, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set_ms(&self, now_ms: i64) {
        self.now_ms
            .store(now_ms, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Token-bucket math with linear refill. The Redis Lua script mirrors this
/// exactly; the in-memory store calls it directly.
///
/// Returns the decision plus the fractional token count to persist.
pub fn bucket_take(
    state: Option<(f64, i64)>,
    now_ms: i64,
    capacity: u32,
    window_ms: u64,
) -> (BucketDecision, f64) {
    let cap = capacity as f64;
    let (mut tokens, last_update) = state.unwrap_or((cap, now_ms));

    let elapsed = (now_ms - last_update).max(0) as f64;
    tokens = (tokens + elapsed * cap / window_ms as f64).min(cap);

    if tokens >= 1.0 {
        tokens -= 1.0;
        (
            BucketDecision {
                allowed: true,
                tokens_remaining: tokens.floor() as u32,
                retry_after_ms: 0,
            },
            tokens,
        )
    } else {
        let retry_after_ms = ((1.0 - tokens) * window_ms as f64 / cap).ceil() as u64;
        (
            BucketDecision {
                allowed: false,
                tokens_remaining: 0,
                retry_after_ms,
            },
            tokens,
        )
    }
}
