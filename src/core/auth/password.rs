//! Password hashing collaborator (bcrypt)

use crate::core::auth::error::AuthError;

/// Cost factor for bcrypt hashing (12 is recommended for production)
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Hashes and verifies passwords on the blocking thread pool
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_BCRYPT_COST)
    }
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Hash a password using bcrypt with automatic salt generation
    pub async fn hash(&self, password: &str) -> Result<String, AuthError> {
        let password = password.to_string();
        let cost = self.cost;

        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?
            .map_err(|e| AuthError::Internal(e.to_string()))
    }

    /// Verify a password against a bcrypt hash. A malformed hash counts as a
    /// mismatch.
    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let password = password.to_string();
        let hash = hash.to_string();

        let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        match verified {
            Ok(matches) => Ok(matches),
            Err(e) => {
                tracing::warn!(error = %e, "Stored password hash could not be parsed");
                Ok(false)
            }
        }
    }

    /// Spend the same bcrypt work as [`verify`](Self::verify) without a
    /// stored hash, for login paths that fail before reaching one.
    pub async fn verify_nothing(&self, password: &str) {
        if let Err(e) = self.hash(password).await {
            tracing::debug!(error = %e, "Decoy hash failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hasher = PasswordHasher::new(4);
        let hash = hasher.hash("Str0ng!Pass").await.unwrap();

        assert_ne!(hash, "Str0ng!Pass");
        assert!(hasher.verify("Str0ng!Pass", &hash).await.unwrap());
        assert!(!hasher.verify("wrong", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_same_password_different_salts() {
        let hasher = PasswordHasher::new(4);
        let a = hasher.hash("Str0ng!Pass").await.unwrap();
        let b = hasher.hash("Str0ng!Pass").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_verify_nothing_costs_a_hash() {
        let hasher = PasswordHasher::new(8);
        let hash = hasher.hash("password").await.unwrap();

        let started = std::time::Instant::now();
        hasher.verify("password", &hash).await.unwrap();
        let real = started.elapsed();

        let started = std::time::Instant::now();
        hasher.verify_nothing("password").await;
        let decoy = started.elapsed();

        assert!(decoy * 4 >= real, "decoy {decoy:?} vs real {real:?}");
    }

    #[tokio::test]
    async fn test_malformed_hash_is_mismatch() {
        let hasher = PasswordHasher::new(4);
        assert!(!hasher.verify("anything", "not-a-bcrypt-hash").await.unwrap());
    }
}
