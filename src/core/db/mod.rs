//! Database module for authcore
//!
//! This module provides database connectivity, models, and repositories
//! for persistent storage using PostgreSQL and SQLx, plus in-memory stores
//! with the same guarantees.

pub mod memory;
pub mod models;
pub mod pool;
pub mod repositories;

// Re-export commonly used items
pub use memory::{MemorySessionStore, MemoryUserStore};
pub use models::*;
pub use pool::{DbConfig, DbError, create_pool_with_migrations};
pub use repositories::{
    SessionRepository, SessionRepositoryError, SessionStore, UserRepository, UserRepositoryError,
    UserStore, fingerprint, hash_token,
};

// Re-export sqlx types that might be needed
pub use sqlx::PgPool;
