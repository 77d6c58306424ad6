//! Ephemeral key-value storage
//!
//! Short-lived entries with a per-key time-to-live. Backs the token
//! blacklist, one-time codes and OAuth2 `state` values. Expiry is owned by
//! the store itself; callers never sweep.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

/// Ephemeral store errors
#[derive(Debug, thiserror::Error)]
pub enum EphemeralError {
    #[error("Ephemeral store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid time-to-live: {0:?}")]
    InvalidTtl(Duration),
}

impl From<::redis::RedisError> for EphemeralError {
    fn from(err: ::redis::RedisError) -> Self {
        EphemeralError::Unavailable(err.to_string())
    }
}

/// Contract for a TTL-aware key-value store
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value. A zero `ttl`
    /// is rejected.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), EphemeralError>;

    async fn get(&self, key: &str) -> Result<Option<String>, EphemeralError>;

    /// Remove `key`. Returns `true` only for the caller that actually removed
    /// a live entry, which makes delete usable as a single-use gate.
    async fn delete(&self, key: &str) -> Result<bool, EphemeralError>;

    async fn exists(&self, key: &str) -> Result<bool, EphemeralError>;
}

fn ttl_millis(ttl: Duration) -> Result<u64, EphemeralError> {
    let millis = u64::try_from(ttl.as_millis()).map_err(|_| EphemeralError::InvalidTtl(ttl))?;
    if millis == 0 {
        return Err(EphemeralError::InvalidTtl(ttl));
    }
    Ok(millis)
}
