//! Shared test utilities for the worker crates
//!
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `TestDataBuilder`: deterministic job ids and stream names (always available)
//!
//! # Redis Testing
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```
//!
//! ```rust,ignore
//! use test_utils::{TestDataBuilder, TestRedis};
//!
//! #[tokio::test]
//! #[ignore = "requires Docker"]
//! async fn my_stream_test() {
//!     let redis = TestRedis::new().await;
//!     let names = TestDataBuilder::from_test_name("my_stream_test");
//!     let stream = names.stream("stt.jobs");
//!     // connect with redis.connection_string()
//! }
//! ```

use uuid::Uuid;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// Deterministic test data derived from a seed.
///
/// Tests sharing one Redis container use it to keep stream names and
/// job ids apart without random state.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Seed from a hash of the test name.
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Job id as a UUID string, stable for a given seed and index.
    pub fn job_id(&self, index: u64) -> String {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.seed.to_le_bytes());
        bytes[8..].copy_from_slice(&index.to_le_bytes());
        Uuid::from_bytes(bytes).to_string()
    }

    /// Stream name scoped to this seed, e.g. `stt.jobs.test-1234`.
    pub fn stream(&self, base: &str) -> String {
        format!("{}.test-{}", base, self.seed)
    }

    /// Consumer group name scoped to this seed.
    pub fn group(&self, base: &str) -> String {
        format!("{}-{}", base, self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_builder_deterministic() {
        let a = TestDataBuilder::new(42);
        let b = TestDataBuilder::new(42);

        assert_eq!(a.job_id(0), b.job_id(0));
        assert_eq!(a.stream("stt.jobs"), b.stream("stt.jobs"));
        assert_eq!(a.stream("stt.jobs"), "stt.jobs.test-42");
        assert_eq!(a.group("stt-worker"), "stt-worker-42");
    }

    #[test]
    fn test_job_ids_differ_by_index() {
        let builder = TestDataBuilder::from_test_name("ids");
        assert_ne!(builder.job_id(0), builder.job_id(1));
        assert!(Uuid::parse_str(&builder.job_id(7)).is_ok());
    }

    #[test]
    fn test_different_names_give_different_streams() {
        let a = TestDataBuilder::from_test_name("test1");
        let b = TestDataBuilder::from_test_name("test2");
        assert_ne!(a.stream("stt.jobs"), b.stream("stt.jobs"));
    }
}
