//! Refresh session repository
//!
//! Stores refresh credentials as SHA-256 hashes. Rotation (revoke the current
//! session, insert the next one) runs inside a single transaction holding the
//! owning user's row lock, and a partial unique index on
//! `refresh_sessions(user_id) WHERE NOT revoked` backs the
//! one-active-session-per-user invariant at the storage layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::db::models::RefreshSession;

const SESSION_COLUMNS: &str = "id, user_id, token_hash, expires_at, revoked, created_at";

/// Session repository error types
#[derive(Debug, thiserror::Error)]
pub enum SessionRepositoryError {
    #[error("Session not found")]
    NotFound,

    #[error("Session expired or revoked")]
    ExpiredOrRevoked,

    #[error("Concurrent session rotation")]
    Conflict,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl SessionRepositoryError {
    fn from_write(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err
            && db_err.is_unique_violation()
        {
            return Self::Conflict;
        }
        Self::DatabaseError(err)
    }
}

/// Hash a token using SHA-256
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Short, log-safe identifier for a secret token
pub fn fingerprint(token: &str) -> String {
    hash_token(token)[..12].to_string()
}

/// Storage contract for refresh sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Atomically revoke the user's active session and insert a new one.
    ///
    /// When `replaces` is given, that session must still be active at the
    /// moment of rotation; otherwise the call fails with `ExpiredOrRevoked`
    /// and nothing is written. This makes concurrent refreshes of the same
    /// credential produce exactly one winner.
    async fn rotate(
        &self,
        user_id: Uuid,
        replaces: Option<Uuid>,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshSession, SessionRepositoryError>;

    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, SessionRepositoryError>;

    async fn delete(&self, id: Uuid) -> Result<bool, SessionRepositoryError>;

    async fn revoke_by_token_hash(&self, token_hash: &str) -> Result<bool, SessionRepositoryError>;

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, SessionRepositoryError>;

    /// Delete sessions that are expired or revoked
    async fn purge_stale(&self) -> Result<u64, SessionRepositoryError>;
}

/// PostgreSQL-backed session repository
#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SessionRepository {
    async fn rotate(
        &self,
        user_id: Uuid,
        replaces: Option<Uuid>,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshSession, SessionRepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Serializes every rotation for this user
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(SessionRepositoryError::NotFound)?;

        if let Some(previous) = replaces {
            let result = sqlx::query(
                r#"
                UPDATE refresh_sessions
                SET revoked = TRUE
                WHERE id = $1 AND user_id = $2 AND NOT revoked AND expires_at > NOW()
                "#,
            )
            .bind(previous)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(SessionRepositoryError::ExpiredOrRevoked);
            }
        }

        sqlx::query("UPDATE refresh_sessions SET revoked = TRUE WHERE user_id = $1 AND NOT revoked")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let sql = format!(
            r#"
            INSERT INTO refresh_sessions (user_id, token_hash, expires_at)
            VALUES ($1, $2, $3)
            RETURNING {SESSION_COLUMNS}
            "#
        );
        let session = sqlx::query_as::<_, RefreshSession>(&sql)
            .bind(user_id)
            .bind(token_hash)
            .bind(expires_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(SessionRepositoryError::from_write)?;

        tx.commit().await?;
        Ok(session)
    }

    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, SessionRepositoryError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM refresh_sessions WHERE token_hash = $1");
        let session = sqlx::query_as::<_, RefreshSession>(&sql)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, SessionRepositoryError> {
        let result = sqlx::query("DELETE FROM refresh_sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_by_token_hash(&self, token_hash: &str) -> Result<bool, SessionRepositoryError> {
        let result = sqlx::query(
            "UPDATE refresh_sessions SET revoked = TRUE WHERE token_hash = $1 AND NOT revoked",
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, SessionRepositoryError> {
        let result = sqlx::query(
            "UPDATE refresh_sessions SET revoked = TRUE WHERE user_id = $1 AND NOT revoked",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_stale(&self) -> Result<u64, SessionRepositoryError> {
        let result = sqlx::query("DELETE FROM refresh_sessions WHERE revoked OR expires_at < NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
