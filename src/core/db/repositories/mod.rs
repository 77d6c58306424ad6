//! Database repositories for authcore
//!
//! Each repository pairs a storage trait with its PostgreSQL implementation.

pub mod session;
pub mod user;

pub use session::{
    SessionRepository, SessionRepositoryError, SessionStore, fingerprint, hash_token,
};
pub use user::{UserRepository, UserRepositoryError, UserStore};
