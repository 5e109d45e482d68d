use crate::{ConfigError, FromEnv, env_or_default};

/// Redis configuration
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub url: String,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl FromEnv for RedisConfig {
    /// Reads `REDIS_URL`, defaulting to a local instance.
    fn from_env() -> Result<Self, ConfigError> {
        let url = env_or_default("REDIS_URL", "redis://127.0.0.1:6379");
        if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
            return Err(ConfigError::ParseError {
                key: "REDIS_URL".to_string(),
                details: format!("expected a redis:// or rediss:// URL, got '{url}'"),
            });
        }
        Ok(Self { url })
    }
}
