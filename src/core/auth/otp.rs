//! One-time codes for password reset and email verification
//!
//! Both flows store a short-lived entry in the ephemeral store, notify the
//! user through the dispatcher, and consume the entry exactly once. Deleting
//! the entry is the consumption gate: only the caller whose delete removed a
//! live entry proceeds. Notification failures are logged and swallowed.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::core::auth::error::AuthError;
use crate::core::auth::password::PasswordHasher;
use crate::core::db::models::{User, UserStatus};
use crate::core::db::repositories::UserStore;
use crate::core::dispatch::{Dispatcher, EmailMessage};
use crate::core::ephemeral::EphemeralStore;

pub const RESET_PREFIX: &str = "RESET:";
pub const VERIFY_PREFIX: &str = "VERIFY:";

pub const RESET_CODE_TTL: Duration = Duration::from_secs(5 * 60);
pub const VERIFY_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Upper bound on how long a request waits for the dispatcher
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Password-reset and email-verification flows
#[derive(Clone)]
pub struct VerificationFlows {
    users: Arc<dyn UserStore>,
    store: Arc<dyn EphemeralStore>,
    dispatcher: Arc<dyn Dispatcher>,
    hasher: PasswordHasher,
    topic: String,
    frontend_url: String,
    dispatch_timeout: Duration,
}

impl VerificationFlows {
    pub fn new(
        users: Arc<dyn UserStore>,
        store: Arc<dyn EphemeralStore>,
        dispatcher: Arc<dyn Dispatcher>,
        hasher: PasswordHasher,
    ) -> Self {
        Self {
            users,
            store,
            dispatcher,
            hasher,
            topic: "email_queue".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    /// Dispatch topic for outbound messages
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Base URL used to build verification links
    pub fn frontend_url(mut self, url: impl Into<String>) -> Self {
        self.frontend_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Enqueue without ever failing or stalling the caller
    async fn notify(&self, message: EmailMessage) {
        let enqueue = self.dispatcher.enqueue(&self.topic, &message);
        match tokio::time::timeout(self.dispatch_timeout, enqueue).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(
                error = %e,
                topic = %self.topic,
                subject = %message.subject,
                "Notification enqueue failed, continuing"
            ),
            Err(_) => error!(
                timeout_ms = self.dispatch_timeout.as_millis() as u64,
                topic = %self.topic,
                subject = %message.subject,
                "Notification enqueue timed out, continuing"
            ),
        }
    }

    // ========================================================================
    // Password reset
    // ========================================================================

    /// Issue a reset code for `email`. Succeeds silently when no account has
    /// that email.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        if self.users.find_by_email(email).await?.is_none() {
            debug!("Password reset requested for unknown email");
            return Ok(());
        }

        // Answer exactly as for an unknown email, so an outage does not
        // reveal which accounts exist.
        let code = generate_code();
        if let Err(e) = self.store.set(&reset_key(email), &code, RESET_CODE_TTL).await {
            error!(error = %e, "Failed to store password reset code");
            return Ok(());
        }

        self.notify(EmailMessage {
            to: email.to_string(),
            subject: "Reset Password".to_string(),
            content: format!(
                "<h1>Your verification code is: {code}</h1>\
                 <p>This code expires in 5 minutes.</p>"
            ),
        })
        .await;

        info!("Password reset code issued");
        Ok(())
    }

    /// Consume a reset code and set a new password. Missing and mismatched
    /// codes are indistinguishable to the caller.
    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<User, AuthError> {
        let key = reset_key(email);

        let Some(stored) = self.store.get(&key).await? else {
            debug!("Reset code absent or expired");
            return Err(AuthError::InvalidOrExpiredCode);
        };
        if !codes_match(&stored, code) {
            debug!("Reset code mismatch");
            return Err(AuthError::InvalidOrExpiredCode);
        }
        if !self.store.delete(&key).await? {
            debug!("Reset code consumed concurrently");
            return Err(AuthError::InvalidOrExpiredCode);
        }

        let mut user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or(AuthError::NotFound("User"))?;

        user.password_hash = Some(self.hasher.hash(new_password).await?);
        let user = self.users.save(&user).await?;

        info!(user_id = %user.id, "Password reset");
        Ok(user)
    }

    // ========================================================================
    // Email verification
    // ========================================================================

    /// Issue a verification token for `user` and send the link
    pub async fn send_verification_email(&self, user: &User) -> Result<(), AuthError> {
        if user.email_verified {
            return Err(AuthError::AlreadyExists(
                "Email is already verified".to_string(),
            ));
        }
        let Some(email) = user.email.as_deref() else {
            return Err(AuthError::NotFound("Email address"));
        };

        let token = Uuid::new_v4().simple().to_string();
        self.store
            .set(&verify_key(&token), &user.id.to_string(), VERIFY_TOKEN_TTL)
            .await?;

        let link = format!("{}/verify-email?token={token}", self.frontend_url);
        let greeting = user.full_name.as_deref().unwrap_or(&user.username);
        self.notify(EmailMessage {
            to: email.to_string(),
            subject: "Verify your email".to_string(),
            content: format!(
                "<h1>Hello {greeting},</h1>\
                 <p>Please confirm your email address:</p>\
                 <p><a href=\"{link}\">Verify email</a></p>\
                 <p>{link}</p>\
                 <p>This link expires in 24 hours.</p>"
            ),
        })
        .await;

        info!(user_id = %user.id, "Verification email issued");
        Ok(())
    }

    /// Consume a verification token, marking the user verified and active
    pub async fn verify_email(&self, token: &str) -> Result<User, AuthError> {
        let key = verify_key(token);

        let Some(stored) = self.store.get(&key).await? else {
            debug!("Verification token absent or expired");
            return Err(AuthError::InvalidOrExpiredCode);
        };
        let Ok(user_id) = Uuid::parse_str(&stored) else {
            self.store.delete(&key).await?;
            return Err(AuthError::InvalidOrExpiredCode);
        };

        let Some(mut user) = self.users.find_by_id(user_id).await? else {
            self.store.delete(&key).await?;
            return Err(AuthError::NotFound("User"));
        };
        if user.email_verified {
            return Err(AuthError::AlreadyExists(
                "Email is already verified".to_string(),
            ));
        }

        if !self.store.delete(&key).await? {
            debug!("Verification token consumed concurrently");
            return Err(AuthError::InvalidOrExpiredCode);
        }

        user.email_verified = true;
        user.status = UserStatus::Active;
        let user = self.users.save(&user).await?;

        info!(user_id = %user.id, "Email verified");
        Ok(user)
    }
}

fn reset_key(email: &str) -> String {
    format!("{RESET_PREFIX}{email}")
}

fn verify_key(token: &str) -> String {
    format!("{VERIFY_PREFIX}{token}")
}

/// Six-digit numeric code without a leading zero
fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

fn codes_match(expected: &str, given: &str) -> bool {
    expected.len() == given.len()
        && expected
            .bytes()
            .zip(given.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
