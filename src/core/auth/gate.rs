//! Authentication gate
//!
//! Runs before every handler. Public paths pass untouched. Otherwise the
//! access-token cookie, when present, is checked against the blacklist,
//! verified, and resolved to a fresh [`Identity`] that is attached to the
//! request. A missing cookie leaves the request anonymous; any other failure
//! rejects it with a structured 401.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::auth::blacklist::TokenBlacklist;
use crate::core::auth::cookies;
use crate::core::auth::error::AuthError;
use crate::core::auth::jwt::{JwtService, TokenError};
use crate::core::db::models::{RoleName, User, UserStatus};
use crate::core::db::repositories::{UserStore, fingerprint};

/// Paths that bypass the gate
pub const PUBLIC_PATHS: &[&str] = &[
    "/api/auth/login",
    "/api/auth/register",
    "/api/auth/check-email",
    "/api/auth/forgot-password",
    "/api/auth/reset-password",
    "/api/auth/verify-email",
    "/api/auth/refresh",
    "/api/auth/logout",
    "/oauth2/",
    "/login/oauth2/",
];

/// The authenticated caller, resolved from storage on every request
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub roles: BTreeSet<RoleName>,
    pub email_verified: bool,
    pub status: UserStatus,
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            roles: user.roles.clone(),
            email_verified: user.email_verified,
            status: user.status,
        }
    }
}

impl Identity {
    pub fn has_role(&self, role: RoleName) -> bool {
        self.roles.contains(&role)
    }

    pub fn require_role(&self, role: RoleName) -> Result<(), AuthError> {
        self.require_any_role(&[role])
    }

    pub fn require_any_role(&self, roles: &[RoleName]) -> Result<(), AuthError> {
        if roles.iter().any(|r| self.has_role(*r)) {
            Ok(())
        } else {
            debug!(user_id = %self.user_id, required = ?roles, "Role check failed");
            Err(AuthError::Forbidden)
        }
    }
}

/// Why the gate refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    Blacklisted,
    Expired,
    Invalid,
}

impl From<GateRejection> for AuthError {
    fn from(rejection: GateRejection) -> Self {
        match rejection {
            GateRejection::Blacklisted => AuthError::TokenInvalid("blacklisted"),
            GateRejection::Expired => AuthError::TokenExpired,
            GateRejection::Invalid => AuthError::TokenInvalid("invalid"),
        }
    }
}

pub struct AuthGate {
    jwt: JwtService,
    blacklist: TokenBlacklist,
    users: Arc<dyn UserStore>,
    public_paths: Vec<String>,
}

impl AuthGate {
    pub fn new(jwt: JwtService, blacklist: TokenBlacklist, users: Arc<dyn UserStore>) -> Self {
        Self {
            jwt,
            blacklist,
            users,
            public_paths: PUBLIC_PATHS.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Replace the public path list
    pub fn with_public_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.public_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| path.starts_with(p.as_str()))
    }

    /// Resolve an optional access token to an identity
    pub async fn authenticate(
        &self,
        token: Option<&str>,
    ) -> Result<Option<Identity>, GateRejection> {
        let Some(token) = token else {
            return Ok(None);
        };

        if self.blacklist.contains(token).await {
            debug!(token = %fingerprint(token), "Blacklisted token presented");
            return Err(GateRejection::Blacklisted);
        }

        let claims = self.jwt.verify_access(token).map_err(|e| match e {
            TokenError::Expired => GateRejection::Expired,
            other => {
                debug!(token = %fingerprint(token), error = %other, "Token rejected");
                GateRejection::Invalid
            }
        })?;

        let user = match self.users.find_by_id(claims.sub).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!(user_id = %claims.sub, "Token subject no longer exists");
                return Err(GateRejection::Invalid);
            }
            Err(e) => {
                warn!(error = %e, user_id = %claims.sub, "Identity lookup failed, rejecting");
                return Err(GateRejection::Invalid);
            }
        };

        if user.is_locked() {
            debug!(user_id = %user.id, "Locked account presented a token");
            return Err(GateRejection::Invalid);
        }

        Ok(Some(Identity::from(&user)))
    }
}

/// Gate middleware for `axum::middleware::from_fn_with_state`
pub async fn gate_middleware(
    State(gate): State<Arc<AuthGate>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if gate.is_public(&path) {
        return next.run(request).await;
    }

    let token = cookies::access_token(&jar);
    match gate.authenticate(token.as_deref()).await {
        Ok(Some(identity)) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Ok(None) => next.run(request).await,
        Err(rejection) => AuthError::from(rejection)
            .to_payload(path)
            .into_response(),
    }
}

/// Extractor for handlers that require an authenticated caller
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(CurrentUser)
            .ok_or(AuthError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::jwt::{AccessSubject, JwtConfig};
    use crate::core::db::memory::MemoryUserStore;
    use crate::core::db::models::NewUser;
    use crate::core::ephemeral::MemoryStore;
    use std::time::Duration;

    struct Fixture {
        gate: AuthGate,
        jwt: JwtService,
        blacklist: TokenBlacklist,
        users: Arc<MemoryUserStore>,
    }

    fn fixture() -> Fixture {
        let jwt = JwtService::new(JwtConfig::new("access-secret", "refresh-secret"));
        let blacklist = TokenBlacklist::new(Arc::new(MemoryStore::new()));
        let users = Arc::new(MemoryUserStore::new());
        let gate = AuthGate::new(jwt.clone(), blacklist.clone(), users.clone());
        Fixture {
            gate,
            jwt,
            blacklist,
            users,
        }
    }

    fn token_for(jwt: &JwtService, user: &User) -> String {
        jwt.issue_access_token(AccessSubject {
            user_id: user.id,
            username: &user.username,
            email: user.email.as_deref(),
            roles: &user.roles,
        })
        .unwrap()
        .token
    }

    async fn alice(users: &MemoryUserStore) -> User {
        users
            .create(NewUser::local("alice", "alice@example.com", "hash", None))
            .await
            .unwrap()
    }

    #[test]
    fn test_public_paths() {
        let f = fixture();
        assert!(f.gate.is_public("/api/auth/login"));
        assert!(f.gate.is_public("/api/auth/verify-email"));
        assert!(f.gate.is_public("/oauth2/authorization/github"));
        assert!(f.gate.is_public("/login/oauth2/code/github"));
        assert!(!f.gate.is_public("/api/auth/me"));
        assert!(!f.gate.is_public("/api/auth/resend-verification-email"));
        assert!(!f.gate.is_public("/api/users"));
    }

    #[tokio::test]
    async fn test_absent_token_is_anonymous() {
        let f = fixture();
        assert!(f.gate.authenticate(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_valid_token_resolves_identity() {
        let f = fixture();
        let user = alice(&f.users).await;
        let token = token_for(&f.jwt, &user);

        let identity = f.gate.authenticate(Some(&token)).await.unwrap().unwrap();
        assert_eq!(identity.user_id, user.id);
        assert!(identity.has_role(RoleName::User));
    }

    #[tokio::test]
    async fn test_blacklisted_token_rejected_but_sibling_accepted() {
        let f = fixture();
        let user = alice(&f.users).await;
        let revoked = token_for(&f.jwt, &user);
        let sibling = token_for(&f.jwt, &user);

        f.blacklist
            .add(&revoked, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(
            f.gate.authenticate(Some(&revoked)).await.unwrap_err(),
            GateRejection::Blacklisted
        );
        assert!(f.gate.authenticate(Some(&sibling)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_and_invalid_tokens() {
        let f = fixture();
        let user = alice(&f.users).await;
        let expired_jwt = JwtService::new(
            JwtConfig::new("access-secret", "refresh-secret").access_token_expiration(-1),
        );

        assert_eq!(
            f.gate
                .authenticate(Some(&token_for(&expired_jwt, &user)))
                .await
                .unwrap_err(),
            GateRejection::Expired
        );
        assert_eq!(
            f.gate.authenticate(Some("garbage")).await.unwrap_err(),
            GateRejection::Invalid
        );
    }

    #[tokio::test]
    async fn test_unknown_or_locked_user_rejected() {
        let f = fixture();
        let mut user = alice(&f.users).await;
        let token = token_for(&f.jwt, &user);

        user.account_non_locked = false;
        f.users.save(&user).await.unwrap();
        assert_eq!(
            f.gate.authenticate(Some(&token)).await.unwrap_err(),
            GateRejection::Invalid
        );

        f.users.delete(user.id).await.unwrap();
        assert_eq!(
            f.gate.authenticate(Some(&token)).await.unwrap_err(),
            GateRejection::Invalid
        );
    }

    #[test]
    fn test_role_guards() {
        let identity = Identity {
            user_id: Uuid::new_v4(),
            username: "judge".to_string(),
            email: None,
            full_name: None,
            roles: BTreeSet::from([RoleName::User, RoleName::Judge]),
            email_verified: true,
            status: UserStatus::Active,
        };

        assert!(identity.require_role(RoleName::Judge).is_ok());
        assert!(matches!(
            identity.require_role(RoleName::Admin),
            Err(AuthError::Forbidden)
        ));
        assert!(
            identity
                .require_any_role(&[RoleName::Admin, RoleName::Moderator, RoleName::Judge])
                .is_ok()
        );
    }

    #[test]
    fn test_rejection_conversion() {
        assert!(matches!(
            AuthError::from(GateRejection::Blacklisted),
            AuthError::TokenInvalid("blacklisted")
        ));
        assert!(matches!(
            AuthError::from(GateRejection::Expired),
            AuthError::TokenExpired
        ));
    }
}
