//! Access-token blacklist
//!
//! Neutralizes an access token before its natural expiry (logout). Entries
//! live in the ephemeral store for the token's remaining lifetime and vanish
//! on their own.
//!
//! Known gap: `contains` fails open. When the ephemeral store is unreachable a
//! blacklisted token is accepted until it expires, so authenticated traffic
//! keeps flowing during a store outage.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::db::repositories::fingerprint;
use crate::core::ephemeral::{EphemeralError, EphemeralStore};

const KEY_PREFIX: &str = "blacklist:token:";
const SENTINEL: &str = "1";

#[derive(Clone)]
pub struct TokenBlacklist {
    store: Arc<dyn EphemeralStore>,
}

impl TokenBlacklist {
    pub fn new(store: Arc<dyn EphemeralStore>) -> Self {
        Self { store }
    }

    fn key(token: &str) -> String {
        format!("{KEY_PREFIX}{token}")
    }

    /// Blacklist `token` for `ttl`. A zero `ttl` means the token is already
    /// expired and nothing is stored.
    pub async fn add(&self, token: &str, ttl: Duration) -> Result<(), EphemeralError> {
        if ttl.is_zero() {
            debug!(token = %fingerprint(token), "Token already expired, not blacklisted");
            return Ok(());
        }

        self.store.set(&Self::key(token), SENTINEL, ttl).await?;
        debug!(token = %fingerprint(token), ttl_secs = ttl.as_secs(), "Token blacklisted");
        Ok(())
    }

    /// Whether `token` is blacklisted. Returns `false` when the store cannot
    /// be reached.
    pub async fn contains(&self, token: &str) -> bool {
        match self.store.exists(&Self::key(token)).await {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    error = %e,
                    token = %fingerprint(token),
                    "Blacklist lookup failed, allowing token (fail-open)"
                );
                false
            }
        }
    }
}
