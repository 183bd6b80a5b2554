// In-memory implementation of the store contract. Tests substitute it for
// Redis; the standalone binary never uses it (token state must be shared
// across replicas).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{bucket_take, BucketDecision, Clock, KeyValueStore, StoreError, SystemClock};

struct Entry {
    value: String,
    expires_at_ms: i64,
}

struct BucketState {
    tokens: f64,
    last_update_ms: i64,
    expires_at_ms: i64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    buckets: HashMap<String, BucketState>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
            failing: AtomicBool::new(false),
        }
    }

    /// Make every subsequent operation fail with a backend error. Used to
    /// exercise fail-open rate limiting and circuit-breaker trips.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        let inner = self.inner.lock().expect("memory store poisoned");
        inner
            .entries
            .values()
            .filter(|e| e.expires_at_ms > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_failing(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Backend("injected store failure".into()))
        } else {
            Ok(())
        }
    }

    fn purge(inner: &mut Inner, now_ms: i64) {
        inner.entries.retain(|_, e| e.expires_at_ms > now_ms);
        inner.buckets.retain(|_, b| b.expires_at_ms > now_ms);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_failing()?;
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().expect("memory store poisoned");
        Self::purge(&mut inner, now);
        Ok(inner.entries.get(key).map(|e| e.value.clone()))
    }

    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<(), StoreError> {
        self.check_failing()?;
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at_ms: now + ttl_ms as i64,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        self.check_failing()?;
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().expect("memory store poisoned");
        Self::purge(&mut inner, now);
        Ok(inner.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check_failing()?;
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().expect("memory store poisoned");
        Self::purge(&mut inner, now);
        Ok(inner.entries.contains_key(key))
    }

    async fn pexpire(&self, key: &str, ttl_ms: u64) -> Result<bool, StoreError> {
        self.check_failing()?;
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().expect("memory store poisoned");
        Self::purge(&mut inner, now);
        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at_ms = now + ttl_ms as i64;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_failing()?;
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().expect("memory store poisoned");
        Self::purge(&mut inner, now);
        Ok(inner.entries.remove(key).map(|e| e.value))
    }

    async fn take_bucket(
        &self,
        key: &str,
        capacity: u32,
        window_ms: u64,
    ) -> Result<BucketDecision, StoreError> {
        self.check_failing()?;
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock().expect("memory store poisoned");
        Self::purge(&mut inner, now);

        let state = inner
            .buckets
            .get(key)
            .map(|b| (b.tokens, b.last_update_ms));
        let (decision, tokens) = bucket_take(state, now, capacity, window_ms);

        inner.buckets.insert(
            key.to_string(),
            BucketState {
                tokens,
                last_update_ms: now,
                expires_at_ms: now + window_ms as i64,
            },
        );

        Ok(decision)
    }
}
