//! Third-party sign-in
//!
//! `provider` normalizes raw profile attributes, `resolver` merges the
//! profile into the local account graph, `github` talks to GitHub, and `api`
//! exposes the authorization redirect and the callback.

pub mod api;
pub mod github;
pub mod provider;
pub mod resolver;

pub use api::{OAuthApiState, oauth_router};
pub use github::{GithubClient, GithubConfig, OAuthClient};
pub use provider::{OAuthProfile, OAuthProvider};
pub use resolver::IdentityResolver;

use crate::core::auth::error::AuthError;
use crate::core::db::models::Provider;

/// Third-party sign-in failures
#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("Unsupported identity provider: {0}")]
    UnsupportedProvider(String),

    #[error("Provider profile is missing `{0}`")]
    MissingAttribute(&'static str),

    #[error("Authorization state is missing, expired or already used")]
    InvalidState,

    /// The profile email belongs to an account with a different identity
    #[error("An account with this email already exists via {provider}")]
    AccountCollision { provider: Provider },

    /// Storage, exchange and any other failure while resolving an identity
    #[error("External authentication failed: {0}")]
    ExternalAuthentication(String),
}

impl OAuthError {
    /// Short machine-readable kind, used in the failure redirect
    pub fn kind(&self) -> &'static str {
        match self {
            OAuthError::UnsupportedProvider(_) => "unsupported_provider",
            OAuthError::InvalidState => "invalid_state",
            OAuthError::AccountCollision { .. } => "account_collision",
            OAuthError::MissingAttribute(_) | OAuthError::ExternalAuthentication(_) => {
                "authentication_failed"
            }
        }
    }
}

impl From<OAuthError> for AuthError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::AccountCollision { provider } => AuthError::AccountCollision { provider },
            other => AuthError::ExternalAuthentication(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(OAuthError::InvalidState.kind(), "invalid_state");
        assert_eq!(
            OAuthError::AccountCollision {
                provider: Provider::Local
            }
            .kind(),
            "account_collision"
        );
        assert_eq!(
            OAuthError::MissingAttribute("id").kind(),
            "authentication_failed"
        );
    }

    #[test]
    fn test_collision_keeps_its_identity() {
        let err = AuthError::from(OAuthError::AccountCollision {
            provider: Provider::Local,
        });
        assert!(matches!(
            err,
            AuthError::AccountCollision {
                provider: Provider::Local
            }
        ));

        let err = AuthError::from(OAuthError::ExternalAuthentication("boom".into()));
        assert!(matches!(err, AuthError::ExternalAuthentication(_)));
    }
}
