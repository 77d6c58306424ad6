//! Merge a third-party profile into the local account graph
//!
//! A known `(provider, external id)` pair updates the linked account. An
//! unknown pair creates a new account, unless its email already belongs to
//! another identity, which is an [`OAuthError::AccountCollision`]. Accounts
//! are never merged across providers.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{OAuthError, OAuthProfile, OAuthProvider};
use crate::core::db::models::{NewUser, RoleName, User, UserStatus};
use crate::core::db::repositories::{UserRepositoryError, UserStore};

const USERNAME_MAX: usize = 50;

#[derive(Clone)]
pub struct IdentityResolver {
    users: Arc<dyn UserStore>,
}

impl IdentityResolver {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Resolve raw provider attributes to a local user with fresh roles
    pub async fn resolve(
        &self,
        provider: OAuthProvider,
        attributes: &Value,
    ) -> Result<User, OAuthError> {
        let profile = provider.extract(attributes)?;

        let linked = self
            .users
            .find_by_provider(provider.provider(), &profile.external_id)
            .await
            .map_err(storage_failure)?;

        match linked {
            Some(user) => self.update(user, &profile).await,
            None => self.create(provider, &profile).await,
        }
    }

    async fn update(&self, mut user: User, profile: &OAuthProfile) -> Result<User, OAuthError> {
        user.full_name = Some(profile.display_name.clone());
        if profile.avatar_url.is_some() {
            user.avatar_url = profile.avatar_url.clone();
        }
        if let Some(email) = &profile.email
            && (user.email.as_deref() != Some(email) || !user.email_verified)
        {
            user.email = Some(email.clone());
            user.email_verified = true;
        }

        let saved = match self.users.save(&user).await {
            Ok(saved) => saved,
            Err(UserRepositoryError::EmailAlreadyExists) => {
                return Err(self.collision(profile.email.as_deref()).await);
            }
            Err(e) => return Err(storage_failure(e)),
        };

        debug!(user_id = %saved.id, provider = %saved.provider, "Linked account updated");
        Ok(saved)
    }

    async fn create(
        &self,
        provider: OAuthProvider,
        profile: &OAuthProfile,
    ) -> Result<User, OAuthError> {
        if let Some(email) = profile.email.as_deref()
            && let Some(existing) = self
                .users
                .find_by_email(email)
                .await
                .map_err(storage_failure)?
        {
            warn!(
                existing_provider = %existing.provider,
                provider = provider.registration_id(),
                "Third-party email matches an existing account"
            );
            return Err(OAuthError::AccountCollision {
                provider: existing.provider,
            });
        }

        let base = derive_username(provider, profile);
        let result = match self.users.create(new_external_user(provider, profile, &base)).await {
            Err(UserRepositoryError::UsernameAlreadyExists) => {
                let fallback = with_suffix(&base, &profile.external_id);
                debug!(username = %base, fallback = %fallback, "Derived username taken, retrying");
                self.users
                    .create(new_external_user(provider, profile, &fallback))
                    .await
            }
            other => other,
        };

        match result {
            Ok(user) => {
                info!(
                    user_id = %user.id,
                    provider = provider.registration_id(),
                    "Account created from third-party profile"
                );
                Ok(user)
            }
            Err(UserRepositoryError::EmailAlreadyExists) => {
                Err(self.collision(profile.email.as_deref()).await)
            }
            Err(UserRepositoryError::ProviderIdentityExists) => {
                // Lost a race against a concurrent first sign-in
                self.users
                    .find_by_provider(provider.provider(), &profile.external_id)
                    .await
                    .map_err(storage_failure)?
                    .ok_or_else(|| {
                        OAuthError::ExternalAuthentication("linked account vanished".to_string())
                    })
            }
            Err(e) => Err(storage_failure(e)),
        }
    }

    /// Name the provider of the account that owns `email`
    async fn collision(&self, email: Option<&str>) -> OAuthError {
        let Some(email) = email else {
            return OAuthError::ExternalAuthentication("email conflict".to_string());
        };
        match self.users.find_by_email(email).await {
            Ok(Some(owner)) => OAuthError::AccountCollision {
                provider: owner.provider,
            },
            Ok(None) => OAuthError::ExternalAuthentication("email conflict".to_string()),
            Err(e) => storage_failure(e),
        }
    }
}

fn storage_failure(err: UserRepositoryError) -> OAuthError {
    OAuthError::ExternalAuthentication(err.to_string())
}

fn new_external_user(provider: OAuthProvider, profile: &OAuthProfile, username: &str) -> NewUser {
    NewUser {
        username: username.to_string(),
        email: profile.email.clone(),
        password_hash: None,
        full_name: Some(profile.display_name.clone()),
        avatar_url: profile.avatar_url.clone(),
        email_verified: profile.email.is_some(),
        status: UserStatus::Active,
        provider: provider.provider(),
        provider_id: Some(profile.external_id.clone()),
        roles: BTreeSet::from([RoleName::DEFAULT]),
    }
}

/// `<provider>_<email local part>`, or `<provider>_<display name>` without an
/// email, keeping only lowercase ASCII letters and digits.
pub fn derive_username(provider: OAuthProvider, profile: &OAuthProfile) -> String {
    let source = match profile.email.as_deref() {
        Some(email) => email.split('@').next().unwrap_or_default(),
        None => profile.display_name.as_str(),
    };
    let mut stem = sanitize(source);
    if stem.is_empty() {
        stem = sanitize(&profile.external_id);
    }

    let username = format!("{}_{}", provider.registration_id(), stem);
    username.chars().take(USERNAME_MAX).collect()
}

fn with_suffix(base: &str, external_id: &str) -> String {
    let suffix = format!("_{}", sanitize(external_id));
    let keep = USERNAME_MAX.saturating_sub(suffix.chars().count());
    let mut name: String = base.chars().take(keep).collect();
    name.push_str(&suffix);
    name
}

fn sanitize(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::memory::MemoryUserStore;
    use crate::core::db::models::Provider;
    use serde_json::json;

    fn resolver() -> (IdentityResolver, Arc<MemoryUserStore>) {
        let users = Arc::new(MemoryUserStore::new());
        (IdentityResolver::new(users.clone()), users)
    }

    fn octocat(email: Option<&str>) -> Value {
        json!({
            "id": 583231,
            "login": "octocat",
            "name": "The Octocat",
            "email": email,
            "avatar_url": "https://avatars.githubusercontent.com/u/583231"
        })
    }

    fn profile(name: &str, email: Option<&str>) -> OAuthProfile {
        OAuthProfile {
            external_id: "42".to_string(),
            display_name: name.to_string(),
            email: email.map(str::to_string),
            avatar_url: None,
        }
    }

    #[test]
    fn test_derive_username() {
        assert_eq!(
            derive_username(OAuthProvider::Github, &profile("X", Some("Octo.Cat@github.com"))),
            "github_octocat"
        );
        assert_eq!(
            derive_username(OAuthProvider::Github, &profile("The Octocat!", None)),
            "github_theoctocat"
        );
        assert_eq!(
            derive_username(OAuthProvider::Github, &profile("???", None)),
            "github_42"
        );
    }

    #[test]
    fn test_derived_username_is_bounded() {
        let long = "a".repeat(80);
        let name = derive_username(OAuthProvider::Github, &profile(&long, None));
        assert_eq!(name.chars().count(), USERNAME_MAX);

        let suffixed = with_suffix(&name, "583231");
        assert_eq!(suffixed.chars().count(), USERNAME_MAX);
        assert!(suffixed.ends_with("_583231"));
    }

    #[tokio::test]
    async fn test_unseen_identity_creates_user() {
        let (resolver, users) = resolver();

        let user = resolver
            .resolve(OAuthProvider::Github, &octocat(Some("octocat@github.com")))
            .await
            .unwrap();

        assert_eq!(user.username, "github_octocat");
        assert_eq!(user.provider, Provider::Github);
        assert_eq!(user.provider_id.as_deref(), Some("583231"));
        assert_eq!(user.status, UserStatus::Active);
        assert!(user.email_verified);
        assert!(user.password_hash.is_none());
        assert!(user.roles.contains(&RoleName::User));
        assert_eq!(users.len().await, 1);
    }

    #[tokio::test]
    async fn test_created_without_email_is_unverified() {
        let (resolver, _) = resolver();
        let user = resolver
            .resolve(OAuthProvider::Github, &octocat(None))
            .await
            .unwrap();

        assert_eq!(user.username, "github_theoctocat");
        assert!(user.email.is_none());
        assert!(!user.email_verified);
    }

    #[tokio::test]
    async fn test_returning_identity_updates_without_duplicate() {
        let (resolver, users) = resolver();
        let first = resolver
            .resolve(OAuthProvider::Github, &octocat(None))
            .await
            .unwrap();

        let mut attributes = octocat(Some("octocat@github.com"));
        attributes["name"] = json!("Mona Lisa Octocat");
        attributes["avatar_url"] = json!("https://example.com/new.png");
        let second = resolver
            .resolve(OAuthProvider::Github, &attributes)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(users.len().await, 1);
        assert_eq!(second.full_name.as_deref(), Some("Mona Lisa Octocat"));
        assert_eq!(second.avatar_url.as_deref(), Some("https://example.com/new.png"));
        assert_eq!(second.email.as_deref(), Some("octocat@github.com"));
        assert!(second.email_verified);
    }

    #[tokio::test]
    async fn test_email_owned_by_local_account_collides() {
        let (resolver, users) = resolver();
        users
            .create(NewUser::local("octo", "octocat@github.com", "hash", None))
            .await
            .unwrap();

        let result = resolver
            .resolve(OAuthProvider::Github, &octocat(Some("octocat@github.com")))
            .await;

        assert!(matches!(
            result,
            Err(OAuthError::AccountCollision {
                provider: Provider::Local
            })
        ));
        assert_eq!(users.len().await, 1);
    }

    #[tokio::test]
    async fn test_taken_username_gets_id_suffix() {
        let (resolver, users) = resolver();
        users
            .create(NewUser::local("github_octocat", "someone@example.com", "hash", None))
            .await
            .unwrap();

        let user = resolver
            .resolve(OAuthProvider::Github, &octocat(Some("octocat@github.com")))
            .await
            .unwrap();
        assert_eq!(user.username, "github_octocat_583231");
    }

    #[tokio::test]
    async fn test_unusable_attributes_are_rejected() {
        let (resolver, users) = resolver();
        let result = resolver
            .resolve(OAuthProvider::Github, &json!({ "login": "octocat" }))
            .await;

        assert!(matches!(result, Err(OAuthError::MissingAttribute("id"))));
        assert!(users.is_empty().await);
    }
}
