//! Redis-backed ephemeral store

use std::time::Duration;

use async_trait::async_trait;
use redis::Client;
use redis::aio::MultiplexedConnection;
use tracing::info;

use super::{EphemeralError, EphemeralStore, ttl_millis};

/// Ephemeral store over a multiplexed Redis connection
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Open a client and establish the shared connection
    pub async fn connect(url: &str) -> Result<Self, EphemeralError> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis ephemeral store");
        Ok(Self { conn })
    }

    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }

    /// A clone of the underlying connection, for sharing with other Redis users
    pub fn connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

#[async_trait]
impl EphemeralStore for RedisStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), EphemeralError> {
        let millis = ttl_millis(ttl)?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, EphemeralError> {
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool, EphemeralError> {
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, EphemeralError> {
        let count: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(count > 0)
    }
}
