//! Database models for authcore
//!
//! This module defines the database entity structs that map to PostgreSQL tables.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// Enumerations
// ============================================================================

/// Identity provider that authenticated an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "VARCHAR", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Provider {
    #[default]
    Local,
    Github,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Local => write!(f, "LOCAL"),
            Provider::Github => write!(f, "GITHUB"),
        }
    }
}

/// Account lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "VARCHAR", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
}

/// Fixed set of role tags
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "VARCHAR")]
pub enum RoleName {
    #[sqlx(rename = "ROLE_USER")]
    #[serde(rename = "ROLE_USER")]
    User,
    #[sqlx(rename = "ROLE_ADMIN")]
    #[serde(rename = "ROLE_ADMIN")]
    Admin,
    #[sqlx(rename = "ROLE_MODERATOR")]
    #[serde(rename = "ROLE_MODERATOR")]
    Moderator,
    #[sqlx(rename = "ROLE_JUDGE")]
    #[serde(rename = "ROLE_JUDGE")]
    Judge,
}

impl RoleName {
    /// Role assigned to every newly created account
    pub const DEFAULT: RoleName = RoleName::User;

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleName::User => "ROLE_USER",
            RoleName::Admin => "ROLE_ADMIN",
            RoleName::Moderator => "ROLE_MODERATOR",
            RoleName::Judge => "ROLE_JUDGE",
        }
    }
}

impl std::fmt::Display for RoleName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RoleName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ROLE_USER" => Ok(RoleName::User),
            "ROLE_ADMIN" => Ok(RoleName::Admin),
            "ROLE_MODERATOR" => Ok(RoleName::Moderator),
            "ROLE_JUDGE" => Ok(RoleName::Judge),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

// ============================================================================
// User Model
// ============================================================================

/// User entity. Roles live in `user_roles` and are loaded separately.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
    pub account_non_locked: bool,
    pub status: UserStatus,
    pub provider: Provider,
    pub provider_id: Option<String>,
    pub rating: i32,
    pub solved_count: i32,
    pub submission_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(default)]
    pub roles: BTreeSet<RoleName>,
}

impl User {
    pub fn is_locked(&self) -> bool {
        !self.account_non_locked
    }
}

/// User data for creation (without id, counters and timestamps)
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
    pub status: UserStatus,
    pub provider: Provider,
    pub provider_id: Option<String>,
    pub roles: BTreeSet<RoleName>,
}

impl NewUser {
    /// A locally registered account awaiting email verification
    pub fn local(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
        full_name: Option<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: Some(email.into()),
            password_hash: Some(password_hash.into()),
            full_name,
            avatar_url: None,
            email_verified: false,
            status: UserStatus::Inactive,
            provider: Provider::Local,
            provider_id: None,
            roles: BTreeSet::from([RoleName::DEFAULT]),
        }
    }
}

/// User without sensitive data (for API responses)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
    pub status: UserStatus,
    pub provider: Provider,
    pub roles: BTreeSet<RoleName>,
    pub rating: i32,
    pub solved_count: i32,
    pub submission_count: i32,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            avatar_url: user.avatar_url,
            email_verified: user.email_verified,
            status: user.status,
            provider: user.provider,
            roles: user.roles,
            rating: user.rating,
            solved_count: user.solved_count,
            submission_count: user.submission_count,
            created_at: user.created_at,
        }
    }
}

// ============================================================================
// Refresh Session Model
// ============================================================================

/// Server-side record of an issued refresh credential.
///
/// Only the SHA-256 hash of the token is stored; the raw token lives in the
/// client's cookie.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RefreshSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl RefreshSession {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Not revoked and not yet expired
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired_at(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(expires_in: Duration, revoked: bool) -> RefreshSession {
        let now = Utc::now();
        RefreshSession {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: "hash".to_string(),
            expires_at: now + expires_in,
            revoked,
            created_at: now,
        }
    }

    #[test]
    fn test_role_name_serialization() {
        let json = serde_json::to_string(&RoleName::Admin).unwrap();
        assert_eq!(json, r#""ROLE_ADMIN""#);

        let role: RoleName = serde_json::from_str(r#""ROLE_JUDGE""#).unwrap();
        assert_eq!(role, RoleName::Judge);
    }

    #[test]
    fn test_role_name_from_str() {
        assert_eq!("ROLE_USER".parse::<RoleName>().unwrap(), RoleName::User);
        assert!("ROLE_ROOT".parse::<RoleName>().is_err());
    }

    #[test]
    fn test_provider_display_and_serde() {
        assert_eq!(Provider::Github.to_string(), "GITHUB");
        assert_eq!(serde_json::to_string(&Provider::Local).unwrap(), r#""LOCAL""#);
    }

    #[test]
    fn test_new_local_user_defaults() {
        let user = NewUser::local("alice", "alice@example.com", "hash", None);

        assert_eq!(user.status, UserStatus::Inactive);
        assert_eq!(user.provider, Provider::Local);
        assert!(!user.email_verified);
        assert!(user.roles.contains(&RoleName::User));
    }

    #[test]
    fn test_refresh_session_usable() {
        assert!(session(Duration::days(1), false).is_usable_at(Utc::now()));
        assert!(!session(Duration::days(1), true).is_usable_at(Utc::now()));
        assert!(!session(Duration::seconds(-1), false).is_usable_at(Utc::now()));
    }

    #[test]
    fn test_user_response_hides_password_hash() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: Some("alice@example.com".to_string()),
            password_hash: Some("secret_hash".to_string()),
            full_name: None,
            avatar_url: None,
            email_verified: true,
            account_non_locked: true,
            status: UserStatus::Active,
            provider: Provider::Local,
            provider_id: None,
            rating: 0,
            solved_count: 0,
            submission_count: 0,
            created_at: now,
            updated_at: now,
            roles: BTreeSet::from([RoleName::User]),
        };

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret_hash"));

        let response: UserResponse = user.into();
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("ROLE_USER"));
    }
}
