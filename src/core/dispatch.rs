//! Asynchronous notification dispatch
//!
//! The engine never sends mail itself. It enqueues an [`EmailMessage`] onto a
//! topic and returns; a separate consumer renders and delivers it. Enqueue is
//! fire-and-forget from the caller's point of view.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// Payload consumed by the mail worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub content: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Dispatch transport unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for DispatchError {
    fn from(err: redis::RedisError) -> Self {
        DispatchError::Unavailable(err.to_string())
    }
}

/// Durable async dispatch collaborator
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn enqueue(&self, topic: &str, message: &EmailMessage) -> Result<(), DispatchError>;
}

/// Appends messages to a Redis stream (`XADD <topic> * payload <json>`)
#[derive(Clone)]
pub struct RedisStreamDispatcher {
    conn: MultiplexedConnection,
}

impl RedisStreamDispatcher {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Dispatcher for RedisStreamDispatcher {
    async fn enqueue(&self, topic: &str, message: &EmailMessage) -> Result<(), DispatchError> {
        let payload = serde_json::to_string(message)?;
        let id: String = redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .query_async(&mut self.conn.clone())
            .await?;

        debug!(topic = %topic, message_id = %id, "Notification enqueued");
        Ok(())
    }
}

/// Records messages in memory. Can be switched into a failing mode to
/// exercise the swallow-on-failure paths.
#[derive(Default)]
pub struct MemoryDispatcher {
    sent: Mutex<Vec<(String, EmailMessage)>>,
    failing: AtomicBool,
}

impl MemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All `(topic, message)` pairs enqueued so far
    pub async fn sent(&self) -> Vec<(String, EmailMessage)> {
        self.sent.lock().await.clone()
    }

    /// Most recent message addressed to `to`
    pub async fn last_to(&self, to: &str) -> Option<EmailMessage> {
        self.sent
            .lock()
            .await
            .iter()
            .rev()
            .find(|(_, m)| m.to == to)
            .map(|(_, m)| m.clone())
    }
}

#[async_trait]
impl Dispatcher for MemoryDispatcher {
    async fn enqueue(&self, topic: &str, message: &EmailMessage) -> Result<(), DispatchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::Unavailable("dispatcher offline".to_string()));
        }
        self.sent
            .lock()
            .await
            .push((topic.to_string(), message.clone()));
        Ok(())
    }
}
