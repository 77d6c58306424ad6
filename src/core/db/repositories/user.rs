//! User repository for database operations
//!
//! `UserStore` is the storage contract used by the authentication engine.
//! `UserRepository` implements it on PostgreSQL; uniqueness of username,
//! email and (provider, provider_id) is enforced by the schema and surfaced
//! as typed errors rather than pre-checked.

use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::core::db::models::{NewUser, Provider, RoleName, User};

const USER_COLUMNS: &str = "id, username, email, password_hash, full_name, avatar_url, \
     email_verified, account_non_locked, status, provider, provider_id, \
     rating, solved_count, submission_count, created_at, updated_at";

/// User repository error types
#[derive(Debug, thiserror::Error)]
pub enum UserRepositoryError {
    #[error("User not found")]
    NotFound,

    #[error("Username already exists")]
    UsernameAlreadyExists,

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("External identity already linked")]
    ProviderIdentityExists,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl UserRepositoryError {
    /// Translate unique-constraint violations into their typed variants
    fn from_write(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err
            && db_err.is_unique_violation()
        {
            match db_err.constraint() {
                Some("users_username_key") => return Self::UsernameAlreadyExists,
                Some("users_email_key") => return Self::EmailAlreadyExists,
                Some("users_provider_identity_key") => return Self::ProviderIdentityExists,
                _ => {}
            }
        }
        Self::DatabaseError(err)
    }
}

/// Storage contract for user records
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserRepositoryError>;

    async fn find_by_username(&self, username: &str)
    -> Result<Option<User>, UserRepositoryError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserRepositoryError>;

    async fn find_by_provider(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<User>, UserRepositoryError>;

    async fn exists_by_username(&self, username: &str) -> Result<bool, UserRepositoryError>;

    async fn exists_by_email(&self, email: &str) -> Result<bool, UserRepositoryError>;

    /// Insert a new user together with its role set
    async fn create(&self, user: NewUser) -> Result<User, UserRepositoryError>;

    /// Persist the mutable fields of an existing user. Roles are not touched.
    async fn save(&self, user: &User) -> Result<User, UserRepositoryError>;

    async fn delete(&self, id: Uuid) -> Result<bool, UserRepositoryError>;
}

/// PostgreSQL-backed user repository
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_roles(&self, user_id: Uuid) -> Result<BTreeSet<RoleName>, UserRepositoryError> {
        let rows: Vec<(RoleName,)> = sqlx::query_as(
            r#"
            SELECT r.name
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(role,)| role).collect())
    }

    async fn with_roles(&self, user: Option<User>) -> Result<Option<User>, UserRepositoryError> {
        match user {
            Some(mut user) => {
                user.roles = self.load_roles(user.id).await?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    async fn find_one(
        &self,
        predicate: &str,
        value: &str,
    ) -> Result<Option<User>, UserRepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate} = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        self.with_roles(user).await
    }

    async fn assign_roles(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        roles: &BTreeSet<RoleName>,
    ) -> Result<(), UserRepositoryError> {
        for role in roles {
            sqlx::query(
                r#"
                INSERT INTO user_roles (user_id, role_id)
                SELECT $1, id FROM roles WHERE name = $2
                "#,
            )
            .bind(user_id)
            .bind(role.as_str())
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserRepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        self.with_roles(user).await
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<User>, UserRepositoryError> {
        self.find_one("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserRepositoryError> {
        self.find_one("email", email).await
    }

    async fn find_by_provider(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<User>, UserRepositoryError> {
        let sql =
            format!("SELECT {USER_COLUMNS} FROM users WHERE provider = $1 AND provider_id = $2");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(provider)
            .bind(provider_id)
            .fetch_optional(&self.pool)
            .await?;

        self.with_roles(user).await
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, UserRepositoryError> {
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
                .bind(username)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists.0)
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, UserRepositoryError> {
        let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;

        Ok(exists.0)
    }

    async fn create(&self, new_user: NewUser) -> Result<User, UserRepositoryError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            INSERT INTO users (username, email, password_hash, full_name, avatar_url,
                               email_verified, status, provider, provider_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {USER_COLUMNS}
            "#
        );
        let mut user = sqlx::query_as::<_, User>(&sql)
            .bind(&new_user.username)
            .bind(&new_user.email)
            .bind(&new_user.password_hash)
            .bind(&new_user.full_name)
            .bind(&new_user.avatar_url)
            .bind(new_user.email_verified)
            .bind(new_user.status)
            .bind(new_user.provider)
            .bind(&new_user.provider_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(UserRepositoryError::from_write)?;

        Self::assign_roles(&mut tx, user.id, &new_user.roles).await?;
        tx.commit().await?;

        user.roles = new_user.roles;
        Ok(user)
    }

    async fn save(&self, user: &User) -> Result<User, UserRepositoryError> {
        let sql = format!(
            r#"
            UPDATE users
            SET username = $2, email = $3, password_hash = $4, full_name = $5,
                avatar_url = $6, email_verified = $7, account_non_locked = $8,
                status = $9, updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let saved = sqlx::query_as::<_, User>(&sql)
            .bind(user.id)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.full_name)
            .bind(&user.avatar_url)
            .bind(user.email_verified)
            .bind(user.account_non_locked)
            .bind(user.status)
            .fetch_optional(&self.pool)
            .await
            .map_err(UserRepositoryError::from_write)?
            .ok_or(UserRepositoryError::NotFound)?;

        self.with_roles(Some(saved))
            .await?
            .ok_or(UserRepositoryError::NotFound)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, UserRepositoryError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
