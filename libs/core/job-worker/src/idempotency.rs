//! Completed-job cache
//!
//! A concurrent, TTL-bounded set of job ids. Entries expire passively and are
//! evicted least-recently-used first once capacity is reached. Cloning yields
//! another handle to the same cache.

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use std::time::Duration;

#[derive(Clone)]
pub struct IdempotencyCache {
    inner: Cache<String, ()>,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { inner }
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.inner.contains_key(job_id)
    }

    /// Mark a job as completed.
    pub fn insert(&self, job_id: impl Into<String>) {
        self.inner.insert(job_id.into(), ());
    }

    /// Approximate number of live entries.
    pub fn len(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), 10_000)
    }
}

impl std::fmt::Debug for IdempotencyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}
