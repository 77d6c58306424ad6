//! Refresh session lifecycle
//!
//! Each user holds at most one active refresh session. Issuing a new one
//! revokes the previous one in the same storage transaction (rotation).
//! Unusable sessions are deleted when presented.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::core::auth::error::AuthError;
use crate::core::auth::jwt::JwtService;
use crate::core::db::models::RefreshSession;
use crate::core::db::repositories::{SessionStore, fingerprint, hash_token};

/// A refresh session together with the raw token handed to the client
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub session: RefreshSession,
}

#[derive(Clone)]
pub struct RefreshSessions {
    store: Arc<dyn SessionStore>,
    jwt: JwtService,
}

impl RefreshSessions {
    pub fn new(store: Arc<dyn SessionStore>, jwt: JwtService) -> Self {
        Self { store, jwt }
    }

    /// Start a new session for `user_id`, revoking any active one
    pub async fn create(&self, user_id: Uuid) -> Result<IssuedSession, AuthError> {
        self.issue(user_id, None).await
    }

    /// Replace `current` with a new session. Fails with
    /// `SessionExpiredOrRevoked` if `current` stopped being active, which is
    /// how a concurrent refresh of the same token loses.
    pub async fn rotate(&self, current: &RefreshSession) -> Result<IssuedSession, AuthError> {
        self.issue(current.user_id, Some(current.id)).await
    }

    async fn issue(
        &self,
        user_id: Uuid,
        replaces: Option<Uuid>,
    ) -> Result<IssuedSession, AuthError> {
        let issued = self.jwt.issue_refresh_token(user_id)?;
        let session = self
            .store
            .rotate(user_id, replaces, &hash_token(&issued.token), issued.expires_at)
            .await?;

        info!(
            user_id = %user_id,
            session_id = %session.id,
            rotated = replaces.is_some(),
            "Refresh session issued"
        );

        Ok(IssuedSession {
            token: issued.token,
            session,
        })
    }

    pub async fn find_by_token(&self, token: &str) -> Result<Option<RefreshSession>, AuthError> {
        Ok(self.store.find_by_token_hash(&hash_token(token)).await?)
    }

    /// Pass a usable session through. An expired or revoked one is deleted
    /// and rejected.
    pub async fn verify_usable(&self, session: RefreshSession) -> Result<RefreshSession, AuthError> {
        if session.is_usable_at(chrono::Utc::now()) {
            return Ok(session);
        }

        self.store.delete(session.id).await?;
        debug!(
            session_id = %session.id,
            revoked = session.revoked,
            "Unusable refresh session removed"
        );
        Err(AuthError::SessionExpiredOrRevoked)
    }

    /// Look up the session for a raw token and require it to be usable
    pub async fn resolve(&self, token: &str) -> Result<RefreshSession, AuthError> {
        let session = self.find_by_token(token).await?.ok_or_else(|| {
            debug!(token = %fingerprint(token), "Unknown refresh token");
            AuthError::NotFound("Refresh session")
        })?;
        self.verify_usable(session).await
    }

    /// Revoke the session for `token`; no-op when absent or already revoked
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let revoked = self.store.revoke_by_token_hash(&hash_token(token)).await?;
        debug!(token = %fingerprint(token), revoked, "Refresh session revoke");
        Ok(())
    }

    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let count = self.store.revoke_all_for_user(user_id).await?;
        if count > 0 {
            info!(user_id = %user_id, count, "Refresh sessions revoked");
        }
        Ok(count)
    }

    /// Delete expired and revoked sessions
    pub async fn purge_stale(&self) -> Result<u64, AuthError> {
        Ok(self.store.purge_stale().await?)
    }
}
