//! Authentication and session lifecycle
//!
//! This module provides:
//! - Signed access and refresh tokens (`jwt`)
//! - Refresh sessions with single-session rotation (`session`)
//! - An access-token blacklist for logout (`blacklist`)
//! - The per-request authentication gate (`gate`)
//! - Third-party sign-in and identity linking (`oauth2`)
//! - Password reset and email verification codes (`otp`)
//! - REST API endpoints for auth operations and user lookups (`api`)

pub mod api;
pub mod blacklist;
pub mod cookies;
pub mod error;
pub mod extract;
pub mod gate;
pub mod jwt;
pub mod oauth2;
pub mod otp;
pub mod password;
pub mod service;
pub mod session;
pub mod validation;


pub use api::{ApiResponse, AuthApiState, app_router, auth_api_router, user_api_router};
pub use blacklist::TokenBlacklist;
pub use cookies::CookiePolicy;
pub use error::{AuthError, ErrorResponse};
pub use gate::{AuthGate, CurrentUser, Identity};
pub use jwt::{JwtConfig, JwtService, TokenDomain, TokenError};
pub use otp::VerificationFlows;
pub use password::PasswordHasher;
pub use service::{
    AuthOutcome, AuthService, Collaborators, LoginRequest, LoginResponse, RegisterRequest,
    ResetPasswordRequest, SessionTokens,
};
pub use session::{IssuedSession, RefreshSessions};
