//! In-memory storage implementations
//!
//! Mirror the uniqueness and rotation guarantees of the PostgreSQL
//! repositories under a single async mutex per store. Used for tests and for
//! running the server without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::db::models::{NewUser, Provider, RefreshSession, RoleName, User};
use crate::core::db::repositories::{
    SessionRepositoryError, SessionStore, UserRepositoryError, UserStore,
};

// ============================================================================
// Users
// ============================================================================

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.lock().await.is_empty()
    }

    /// Replace a user's role set, as an administrator would
    pub async fn set_roles(&self, id: Uuid, roles: impl IntoIterator<Item = RoleName>) -> bool {
        match self.users.lock().await.get_mut(&id) {
            Some(user) => {
                user.roles = roles.into_iter().collect();
                true
            }
            None => false,
        }
    }

    fn check_unique(
        users: &HashMap<Uuid, User>,
        candidate_id: Uuid,
        username: &str,
        email: Option<&str>,
        provider: Provider,
        provider_id: Option<&str>,
    ) -> Result<(), UserRepositoryError> {
        for other in users.values().filter(|u| u.id != candidate_id) {
            if other.username == username {
                return Err(UserRepositoryError::UsernameAlreadyExists);
            }
            if email.is_some() && other.email.as_deref() == email {
                return Err(UserRepositoryError::EmailAlreadyExists);
            }
            if provider != Provider::Local
                && other.provider == provider
                && provider_id.is_some()
                && other.provider_id.as_deref() == provider_id
            {
                return Err(UserRepositoryError::ProviderIdentityExists);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserRepositoryError> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<User>, UserRepositoryError> {
        let users = self.users.lock().await;
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserRepositoryError> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_by_provider(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<User>, UserRepositoryError> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|u| u.provider == provider && u.provider_id.as_deref() == Some(provider_id))
            .cloned())
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, UserRepositoryError> {
        Ok(self.find_by_username(username).await?.is_some())
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, UserRepositoryError> {
        Ok(self.find_by_email(email).await?.is_some())
    }

    async fn create(&self, new_user: NewUser) -> Result<User, UserRepositoryError> {
        let mut users = self.users.lock().await;
        let id = Uuid::new_v4();
        Self::check_unique(
            &users,
            id,
            &new_user.username,
            new_user.email.as_deref(),
            new_user.provider,
            new_user.provider_id.as_deref(),
        )?;

        let now = Utc::now();
        let user = User {
            id,
            username: new_user.username,
            email: new_user.email,
            password_hash: new_user.password_hash,
            full_name: new_user.full_name,
            avatar_url: new_user.avatar_url,
            email_verified: new_user.email_verified,
            account_non_locked: true,
            status: new_user.status,
            provider: new_user.provider,
            provider_id: new_user.provider_id,
            rating: 0,
            solved_count: 0,
            submission_count: 0,
            created_at: now,
            updated_at: now,
            roles: new_user.roles,
        };
        users.insert(id, user.clone());
        Ok(user)
    }

    async fn save(&self, user: &User) -> Result<User, UserRepositoryError> {
        let mut users = self.users.lock().await;
        Self::check_unique(
            &users,
            user.id,
            &user.username,
            user.email.as_deref(),
            user.provider,
            user.provider_id.as_deref(),
        )?;

        let stored = users
            .get_mut(&user.id)
            .ok_or(UserRepositoryError::NotFound)?;
        let roles = std::mem::take(&mut stored.roles);
        *stored = User {
            roles,
            updated_at: Utc::now(),
            ..user.clone()
        };
        Ok(stored.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, UserRepositoryError> {
        Ok(self.users.lock().await.remove(&id).is_some())
    }
}

// ============================================================================
// Refresh sessions
// ============================================================================

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Uuid, RefreshSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-revoked sessions held for a user
    pub async fn active_count(&self, user_id: Uuid) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| s.user_id == user_id && !s.revoked)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Overwrite a stored session (test helper for expiry scenarios)
    pub async fn put(&self, session: RefreshSession) {
        self.sessions.lock().await.insert(session.id, session);
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn rotate(
        &self,
        user_id: Uuid,
        replaces: Option<Uuid>,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshSession, SessionRepositoryError> {
        let mut sessions = self.sessions.lock().await;
        let now = Utc::now();

        if let Some(previous) = replaces {
            let usable = sessions
                .get(&previous)
                .is_some_and(|s| s.user_id == user_id && s.is_usable_at(now));
            if !usable {
                return Err(SessionRepositoryError::ExpiredOrRevoked);
            }
        }

        if sessions.values().any(|s| s.token_hash == token_hash) {
            return Err(SessionRepositoryError::Conflict);
        }

        for session in sessions.values_mut().filter(|s| s.user_id == user_id) {
            session.revoked = true;
        }

        let session = RefreshSession {
            id: Uuid::new_v4(),
            user_id,
            token_hash: token_hash.to_string(),
            expires_at,
            revoked: false,
            created_at: now,
        };
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, SessionRepositoryError> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .values()
            .find(|s| s.token_hash == token_hash)
            .cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, SessionRepositoryError> {
        Ok(self.sessions.lock().await.remove(&id).is_some())
    }

    async fn revoke_by_token_hash(&self, token_hash: &str) -> Result<bool, SessionRepositoryError> {
        let mut sessions = self.sessions.lock().await;
        match sessions
            .values_mut()
            .find(|s| s.token_hash == token_hash && !s.revoked)
        {
            Some(session) => {
                session.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, SessionRepositoryError> {
        let mut sessions = self.sessions.lock().await;
        let mut count = 0;
        for session in sessions
            .values_mut()
            .filter(|s| s.user_id == user_id && !s.revoked)
        {
            session.revoked = true;
            count += 1;
        }
        Ok(count)
    }

    async fn purge_stale(&self) -> Result<u64, SessionRepositoryError> {
        let mut sessions = self.sessions.lock().await;
        let now = Utc::now();
        let before = sessions.len();
        sessions.retain(|_, s| s.is_usable_at(now));
        Ok((before - sessions.len()) as u64)
    }
}
