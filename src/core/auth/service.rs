//! Authentication service
//!
//! Business logic for registration, login, token refresh, logout and the
//! verification flows. Coordinates the user store, refresh sessions, the
//! token codec, the blacklist and the one-time-code engine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::auth::blacklist::TokenBlacklist;
use crate::core::auth::error::AuthError;
use crate::core::auth::gate::{AuthGate, Identity};
use crate::core::auth::jwt::{AccessSubject, IssuedToken, JwtService, TokenDomain};
use crate::core::auth::oauth2::{IdentityResolver, OAuthError, OAuthProvider};
use crate::core::auth::otp::VerificationFlows;
use crate::core::auth::password::PasswordHasher;
use crate::core::auth::session::{IssuedSession, RefreshSessions};
use crate::core::auth::validation::{
    validate_email, validate_login, validate_register, validate_reset_password,
};
use crate::core::db::memory::{MemorySessionStore, MemoryUserStore};
use crate::core::db::models::{NewUser, User};
use crate::core::db::repositories::{SessionStore, UserStore, fingerprint};
use crate::core::dispatch::{Dispatcher, MemoryDispatcher};
use crate::core::ephemeral::{EphemeralStore, MemoryStore};

/// Registration request data
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
}

/// Login request data
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Password reset submission
#[derive(Debug, Clone, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub otp: String,
    pub new_password: String,
}

/// Public part of a successful login or refresh
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
}

impl From<&User> for LoginResponse {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
        }
    }
}

/// Credentials handed to the client after login, refresh or third-party
/// sign-in
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access: IssuedToken,
    pub refresh: IssuedSession,
}

/// A user together with freshly issued credentials
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub user: User,
    pub tokens: SessionTokens,
}

/// External collaborators the service runs against
#[derive(Clone)]
pub struct Collaborators {
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub ephemeral: Arc<dyn EphemeralStore>,
    pub dispatcher: Arc<dyn Dispatcher>,
}

impl Collaborators {
    /// Process-local collaborators for tests and database-less runs
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(MemoryUserStore::new()),
            sessions: Arc::new(MemorySessionStore::new()),
            ephemeral: Arc::new(MemoryStore::new()),
            dispatcher: Arc::new(MemoryDispatcher::new()),
        }
    }
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    ephemeral: Arc<dyn EphemeralStore>,
    jwt: JwtService,
    hasher: PasswordHasher,
    sessions: RefreshSessions,
    blacklist: TokenBlacklist,
    flows: VerificationFlows,
    resolver: IdentityResolver,
}

impl AuthService {
    /// Create a new authentication service
    pub fn new(collaborators: Collaborators, jwt: JwtService, hasher: PasswordHasher) -> Self {
        let Collaborators {
            users,
            sessions,
            ephemeral,
            dispatcher,
        } = collaborators;

        Self {
            sessions: RefreshSessions::new(sessions, jwt.clone()),
            blacklist: TokenBlacklist::new(ephemeral.clone()),
            flows: VerificationFlows::new(users.clone(), ephemeral.clone(), dispatcher, hasher),
            resolver: IdentityResolver::new(users.clone()),
            users,
            ephemeral,
            jwt,
            hasher,
        }
    }

    /// Dispatch topic and link base for outbound notifications
    pub fn with_notifications(
        mut self,
        topic: impl Into<String>,
        frontend_url: impl Into<String>,
    ) -> Self {
        self.flows = self.flows.topic(topic).frontend_url(frontend_url);
        self
    }

    /// Gate sharing this service's codec, blacklist and user store
    pub fn gate(&self) -> AuthGate {
        AuthGate::new(self.jwt.clone(), self.blacklist.clone(), self.users.clone())
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    pub fn ephemeral(&self) -> Arc<dyn EphemeralStore> {
        self.ephemeral.clone()
    }

    // ========================================================================
    // Registration and login
    // ========================================================================

    /// Register a local account. The verification email is best effort.
    pub async fn register(&self, request: RegisterRequest) -> Result<User, AuthError> {
        validate_register(&request)?;

        let password_hash = self.hasher.hash(&request.password).await?;
        let user = self
            .users
            .create(NewUser::local(
                request.username,
                request.email,
                password_hash,
                Some(request.full_name),
            ))
            .await?;

        info!(user_id = %user.id, username = %user.username, "User registered");

        if let Err(e) = self.flows.send_verification_email(&user).await {
            warn!(user_id = %user.id, error = %e, "Verification email not issued at registration");
        }

        Ok(user)
    }

    /// Check credentials and start a session. Every credential problem
    /// yields the same `AuthenticationFailure`.
    pub async fn login(&self, request: LoginRequest) -> Result<AuthOutcome, AuthError> {
        validate_login(&request)?;

        // Early exits still pay for one bcrypt run so timing matches a
        // wrong password.
        let Some(user) = self.users.find_by_username(&request.username).await? else {
            debug!("Login for unknown username");
            self.hasher.verify_nothing(&request.password).await;
            return Err(AuthError::AuthenticationFailure);
        };
        if user.is_locked() {
            debug!(user_id = %user.id, "Login for locked account");
            self.hasher.verify_nothing(&request.password).await;
            return Err(AuthError::AuthenticationFailure);
        }
        let Some(hash) = user.password_hash.as_deref() else {
            debug!(user_id = %user.id, "Password login for account without password");
            self.hasher.verify_nothing(&request.password).await;
            return Err(AuthError::AuthenticationFailure);
        };
        if !self.hasher.verify(&request.password, hash).await? {
            debug!(user_id = %user.id, "Wrong password");
            return Err(AuthError::AuthenticationFailure);
        }

        let tokens = self.start_session(&user).await?;
        info!(user_id = %user.id, "Login successful");
        Ok(AuthOutcome { user, tokens })
    }

    /// Mint an access token and a fresh refresh session for `user`
    pub async fn start_session(&self, user: &User) -> Result<SessionTokens, AuthError> {
        let access = self.issue_access(user)?;
        let refresh = self.sessions.create(user.id).await?;
        Ok(SessionTokens { access, refresh })
    }

    fn issue_access(&self, user: &User) -> Result<IssuedToken, AuthError> {
        Ok(self.jwt.issue_access_token(AccessSubject {
            user_id: user.id,
            username: &user.username,
            email: user.email.as_deref(),
            roles: &user.roles,
        })?)
    }

    /// Sign in through a third-party provider
    pub async fn oauth_login(
        &self,
        provider: OAuthProvider,
        attributes: &serde_json::Value,
    ) -> Result<AuthOutcome, OAuthError> {
        let user = self.resolver.resolve(provider, attributes).await?;
        if user.is_locked() {
            return Err(OAuthError::ExternalAuthentication(
                "account is locked".to_string(),
            ));
        }

        let tokens = self
            .start_session(&user)
            .await
            .map_err(|e| OAuthError::ExternalAuthentication(e.to_string()))?;

        info!(user_id = %user.id, provider = provider.registration_id(), "Third-party login");
        Ok(AuthOutcome { user, tokens })
    }

    // ========================================================================
    // Refresh and logout
    // ========================================================================

    /// Exchange a refresh token for a new access token and a rotated session
    pub async fn refresh(&self, refresh_token: Option<&str>) -> Result<AuthOutcome, AuthError> {
        let token = refresh_token.ok_or(AuthError::TokenInvalid("missing"))?;

        let session = self.sessions.resolve(token).await?;
        let claims = self.jwt.verify_refresh(token)?;
        if claims.sub != session.user_id {
            warn!(session_id = %session.id, "Refresh token subject does not match its session");
            return Err(AuthError::TokenInvalid("invalid"));
        }

        let user = self
            .users
            .find_by_id(session.user_id)
            .await?
            .ok_or(AuthError::NotFound("User"))?;
        if user.is_locked() {
            return Err(AuthError::AuthenticationFailure);
        }

        let access = self.issue_access(&user)?;
        let refresh = self.sessions.rotate(&session).await?;

        debug!(user_id = %user.id, "Credentials refreshed");
        Ok(AuthOutcome {
            user,
            tokens: SessionTokens { access, refresh },
        })
    }

    /// Revoke the refresh session and blacklist the access token. Never
    /// fails: whatever cannot be revoked is logged.
    pub async fn logout(&self, access_token: Option<&str>, refresh_token: Option<&str>) {
        if let Some(token) = refresh_token
            && let Err(e) = self.sessions.revoke(token).await
        {
            warn!(token = %fingerprint(token), error = %e, "Refresh session not revoked at logout");
        }

        if let Some(token) = access_token {
            match self.jwt.parse_and_verify(token, TokenDomain::Access) {
                Ok(verified) => {
                    if let Err(e) = self
                        .blacklist
                        .add(token, verified.remaining_lifetime())
                        .await
                    {
                        warn!(
                            token = %fingerprint(token),
                            error = %e,
                            "Access token not blacklisted at logout"
                        );
                    }
                }
                Err(e) => debug!(token = %fingerprint(token), error = %e, "Unusable access token at logout"),
            }
        }

        info!("Logout processed");
    }

    // ========================================================================
    // Account queries
    // ========================================================================

    pub async fn check_email(&self, email: &str) -> Result<bool, AuthError> {
        Ok(self.users.exists_by_email(email).await?)
    }

    /// Current state of the caller's account
    pub async fn current_user(&self, identity: &Identity) -> Result<User, AuthError> {
        self.users
            .find_by_id(identity.user_id)
            .await?
            .ok_or(AuthError::NotFound("User"))
    }

    pub async fn user_by_id(&self, id: Uuid) -> Result<User, AuthError> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or(AuthError::NotFound("User"))
    }

    pub async fn user_by_username(&self, username: &str) -> Result<User, AuthError> {
        self.users
            .find_by_username(username)
            .await?
            .ok_or(AuthError::NotFound("User"))
    }

    // ========================================================================
    // Verification flows
    // ========================================================================

    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        if let Err(message) = validate_email(email) {
            return Err(AuthError::Validation([("email", message)].into()));
        }
        self.flows.request_password_reset(email).await
    }

    /// Consume a reset code, set the new password and end every session
    pub async fn reset_password(&self, request: ResetPasswordRequest) -> Result<(), AuthError> {
        validate_reset_password(&request)?;

        let user = self
            .flows
            .reset_password(&request.email, &request.otp, &request.new_password)
            .await?;
        self.sessions.revoke_all(user.id).await?;
        Ok(())
    }

    pub async fn verify_email(&self, token: &str) -> Result<User, AuthError> {
        self.flows.verify_email(token).await
    }

    pub async fn resend_verification_email(&self, identity: &Identity) -> Result<(), AuthError> {
        let user = self.current_user(identity).await?;
        self.flows.send_verification_email(&user).await
    }

    // ========================================================================
    // Housekeeping
    // ========================================================================

    /// Delete expired and revoked refresh sessions
    pub async fn purge_stale_sessions(&self) -> Result<u64, AuthError> {
        let purged = self.sessions.purge_stale().await?;
        if purged > 0 {
            info!(purged, "Stale refresh sessions purged");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::jwt::JwtConfig;
    use crate::core::db::models::{RoleName, UserStatus};
    use serde_json::json;

    struct Fixture {
        service: AuthService,
        users: Arc<MemoryUserStore>,
        sessions: Arc<MemorySessionStore>,
        dispatcher: Arc<MemoryDispatcher>,
    }

    fn fixture() -> Fixture {
        let users = Arc::new(MemoryUserStore::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let dispatcher = Arc::new(MemoryDispatcher::new());
        let collaborators = Collaborators {
            users: users.clone(),
            sessions: sessions.clone(),
            ephemeral: Arc::new(MemoryStore::new()),
            dispatcher: dispatcher.clone(),
        };
        let jwt = JwtService::new(JwtConfig::new("access-secret", "refresh-secret"));
        Fixture {
            service: AuthService::new(collaborators, jwt, PasswordHasher::new(4)),
            users,
            sessions,
            dispatcher,
        }
    }

    fn alice_request() -> RegisterRequest {
        RegisterRequest {
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password: "Str0ng!Pass".to_string(),
            full_name: "Alice Liddell".to_string(),
        }
    }

    fn login_request(password: &str) -> LoginRequest {
        LoginRequest {
            username: "alice".to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_unknown_username_costs_as_much_as_wrong_password() {
        let jwt = JwtService::new(JwtConfig::new("access-secret", "refresh-secret"));
        let service = AuthService::new(Collaborators::in_memory(), jwt, PasswordHasher::new(8));
        service.register(alice_request()).await.unwrap();

        let started = std::time::Instant::now();
        let wrong = service.login(login_request("Wr0ng!Password")).await;
        let wrong_elapsed = started.elapsed();

        let started = std::time::Instant::now();
        let unknown = service
            .login(LoginRequest {
                username: "mallory".to_string(),
                password: "Wr0ng!Password".to_string(),
            })
            .await;
        let unknown_elapsed = started.elapsed();

        assert!(matches!(wrong, Err(AuthError::AuthenticationFailure)));
        assert!(matches!(unknown, Err(AuthError::AuthenticationFailure)));
        assert!(
            unknown_elapsed * 4 >= wrong_elapsed,
            "unknown {unknown_elapsed:?} vs wrong {wrong_elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_register_creates_inactive_user_and_sends_verification() {
        let f = fixture();
        let user = f.service.register(alice_request()).await.unwrap();

        assert_eq!(user.status, UserStatus::Inactive);
        assert!(!user.email_verified);
        assert!(user.roles.contains(&RoleName::User));
        assert_ne!(user.password_hash.as_deref(), Some("Str0ng!Pass"));
        assert!(f.dispatcher.last_to("alice@example.com").await.is_some());
    }

    #[tokio::test]
    async fn test_register_survives_dispatch_failure() {
        let f = fixture();
        f.dispatcher.set_failing(true);
        assert!(f.service.register(alice_request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_register_duplicate_username() {
        let f = fixture();
        f.service.register(alice_request()).await.unwrap();

        let mut again = alice_request();
        again.email = "other@example.com".to_string();
        let err = f.service.register(again).await.unwrap_err();
        assert!(matches!(err, AuthError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_payload() {
        let f = fixture();
        let mut request = alice_request();
        request.password = "weak".to_string();
        request.email = "nope".to_string();

        match f.service.register(request).await {
            Err(AuthError::Validation(errors)) => {
                assert!(errors.contains_key("password"));
                assert!(errors.contains_key("email"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(f.users.is_empty().await);
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let f = fixture();
        f.service.register(alice_request()).await.unwrap();

        let wrong_password = f.service.login(login_request("Wr0ng!Password")).await;
        let unknown_user = f
            .service
            .login(LoginRequest {
                username: "bob".to_string(),
                password: "Str0ng!Pass".to_string(),
            })
            .await;

        let a = wrong_password.unwrap_err();
        let b = unknown_user.unwrap_err();
        assert!(matches!(a, AuthError::AuthenticationFailure));
        assert_eq!(a.to_string(), b.to_string());
    }

    #[tokio::test]
    async fn test_login_rejects_locked_account() {
        let f = fixture();
        let mut user = f.service.register(alice_request()).await.unwrap();
        user.account_non_locked = false;
        f.users.save(&user).await.unwrap();

        assert!(matches!(
            f.service.login(login_request("Str0ng!Pass")).await,
            Err(AuthError::AuthenticationFailure)
        ));
    }

    #[tokio::test]
    async fn test_login_then_refresh_rotates_session() {
        let f = fixture();
        let user = f.service.register(alice_request()).await.unwrap();
        let login = f.service.login(login_request("Str0ng!Pass")).await.unwrap();

        let claims = f
            .service
            .jwt()
            .verify_access(&login.tokens.access.token)
            .unwrap();
        assert_eq!(claims.sub, user.id);

        let refreshed = f
            .service
            .refresh(Some(&login.tokens.refresh.token))
            .await
            .unwrap();
        assert_ne!(refreshed.tokens.refresh.token, login.tokens.refresh.token);
        assert_eq!(f.sessions.active_count(user.id).await, 1);

        let replay = f.service.refresh(Some(&login.tokens.refresh.token)).await;
        assert!(matches!(replay, Err(AuthError::SessionExpiredOrRevoked)));
    }

    #[tokio::test]
    async fn test_refresh_without_cookie() {
        let f = fixture();
        assert!(matches!(
            f.service.refresh(None).await,
            Err(AuthError::TokenInvalid("missing"))
        ));
    }

    #[tokio::test]
    async fn test_logout_revokes_and_blacklists() {
        let f = fixture();
        f.service.register(alice_request()).await.unwrap();
        let login = f.service.login(login_request("Str0ng!Pass")).await.unwrap();
        let gate = f.service.gate();

        f.service
            .logout(
                Some(&login.tokens.access.token),
                Some(&login.tokens.refresh.token),
            )
            .await;

        assert!(gate.authenticate(Some(&login.tokens.access.token)).await.is_err());
        assert!(
            f.service
                .refresh(Some(&login.tokens.refresh.token))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_logout_tolerates_garbage() {
        let f = fixture();
        f.service.logout(Some("garbage"), Some("garbage")).await;
        f.service.logout(None, None).await;
    }

    #[tokio::test]
    async fn test_reset_password_ends_sessions() {
        let f = fixture();
        let user = f.service.register(alice_request()).await.unwrap();
        let login = f.service.login(login_request("Str0ng!Pass")).await.unwrap();

        f.service.forgot_password("alice@example.com").await.unwrap();
        let message = f.dispatcher.last_to("alice@example.com").await.unwrap();
        let otp: String = message
            .content
            .chars()
            .filter(char::is_ascii_digit)
            .take(6)
            .collect();

        f.service
            .reset_password(ResetPasswordRequest {
                email: "alice@example.com".to_string(),
                otp,
                new_password: "N3w!Password".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(f.sessions.active_count(user.id).await, 0);
        assert!(f.service.refresh(Some(&login.tokens.refresh.token)).await.is_err());
        assert!(f.service.login(login_request("N3w!Password")).await.is_ok());
    }

    #[tokio::test]
    async fn test_oauth_login_issues_session() {
        let f = fixture();
        let outcome = f
            .service
            .oauth_login(
                OAuthProvider::Github,
                &json!({ "id": 7, "login": "octocat", "email": "octo@github.com" }),
            )
            .await
            .unwrap();

        assert_eq!(outcome.user.username, "github_octo");
        assert_eq!(f.sessions.active_count(outcome.user.id).await, 1);
    }

    #[tokio::test]
    async fn test_oauth_login_collision_with_local_account() {
        let f = fixture();
        f.service.register(alice_request()).await.unwrap();

        let result = f
            .service
            .oauth_login(
                OAuthProvider::Github,
                &json!({ "id": 7, "login": "alice", "email": "alice@example.com" }),
            )
            .await;
        assert!(matches!(result, Err(OAuthError::AccountCollision { .. })));
    }

    #[tokio::test]
    async fn test_check_email() {
        let f = fixture();
        f.service.register(alice_request()).await.unwrap();

        assert!(f.service.check_email("alice@example.com").await.unwrap());
        assert!(!f.service.check_email("bob@example.com").await.unwrap());
    }
}
