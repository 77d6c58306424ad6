//! Auth API endpoints
//!
//! Provides REST API endpoints for authentication:
//! - POST /api/auth/register - Register a new user
//! - POST /api/auth/login - Login and receive credential cookies
//! - POST /api/auth/refresh - Rotate credentials from the refresh cookie
//! - POST /api/auth/logout - Revoke credentials and clear cookies
//! - POST /api/auth/check-email?email= - Whether an email is registered
//! - GET /api/auth/me - Current user info
//! - POST /api/auth/forgot-password?email= - Request a reset code
//! - POST /api/auth/reset-password - Submit a reset code
//! - GET /api/auth/verify-email?token= - Confirm an email address
//! - POST /api/auth/resend-verification-email - Issue a new verification link
//!
//! and user lookups:
//! - GET /api/users/{id} - Any user by id (admin only)
//! - GET /api/users/username/{username} - Any user by username
//! - GET /api/users/me - Current user info

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::auth::cookies::{self, CookiePolicy};
use crate::core::auth::error::{AuthError, attach_error_path};
use crate::core::auth::extract::{Json, Path, Query};
use crate::core::auth::gate::{CurrentUser, gate_middleware};
use crate::core::auth::oauth2::{OAuthApiState, oauth_router};
use crate::core::auth::service::{
    AuthService, LoginRequest, LoginResponse, RegisterRequest, ResetPasswordRequest,
};
use crate::core::db::models::{RoleName, UserResponse};

/// Auth API state containing the auth service
#[derive(Clone)]
pub struct AuthApiState {
    pub auth_service: AuthService,
    pub cookies: CookiePolicy,
}

impl AuthApiState {
    /// Cookies live for the refresh-token lifetime
    pub fn new(auth_service: AuthService, secure_cookies: bool) -> Self {
        let cookies = CookiePolicy::new(secure_cookies, auth_service.jwt().refresh_ttl());
        Self {
            auth_service,
            cookies,
        }
    }
}

/// Success envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self::with_status(StatusCode::OK, message, Some(data))
    }

    pub fn with_status(status: StatusCode, message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            status: status.as_u16(),
            message: message.into(),
            data,
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::OK, message, None)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        (status, axum::Json(self)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

/// Create the auth API router
pub fn auth_api_router(state: AuthApiState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/api/auth/register", post(register_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/refresh", post(refresh_handler))
        .route("/api/auth/logout", post(logout_handler))
        .route("/api/auth/check-email", post(check_email_handler))
        .route("/api/auth/me", get(me_handler))
        .route("/api/auth/forgot-password", post(forgot_password_handler))
        .route("/api/auth/reset-password", post(reset_password_handler))
        .route("/api/auth/verify-email", get(verify_email_handler))
        .route(
            "/api/auth/resend-verification-email",
            post(resend_verification_handler),
        )
        .with_state(state)
}

/// Create the user lookup router
pub fn user_api_router(state: AuthApiState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/api/users/me", get(me_handler))
        .route("/api/users/username/{username}", get(user_by_username_handler))
        .route("/api/users/{id}", get(user_by_id_handler))
        .with_state(state)
}

/// Full application router: auth and user routes, optional third-party
/// sign-in, the authentication gate and error-path completion
pub fn app_router(state: AuthApiState, oauth: Option<OAuthApiState>) -> Router {
    let gate = Arc::new(state.auth_service.gate());

    let mut router = auth_api_router(state.clone()).merge(user_api_router(state));
    if let Some(oauth) = oauth {
        router = router.merge(oauth_router(oauth));
    }

    router
        .layer(middleware::from_fn_with_state(gate, gate_middleware))
        .layer(middleware::from_fn(attach_error_path))
}

/// POST /api/auth/register
async fn register_handler(
    State(state): State<Arc<AuthApiState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<ApiResponse<UserResponse>, AuthError> {
    tracing::info!(username = %request.username, "Registration attempt");

    let user = state.auth_service.register(request).await?;

    Ok(ApiResponse::with_status(
        StatusCode::CREATED,
        "User registered successfully",
        Some(user.into()),
    ))
}

/// POST /api/auth/login
async fn login_handler(
    State(state): State<Arc<AuthApiState>>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, ApiResponse<LoginResponse>), AuthError> {
    let outcome = state.auth_service.login(request).await?;

    let jar = state.cookies.set_tokens(
        jar,
        &outcome.tokens.access.token,
        &outcome.tokens.refresh.token,
    );
    Ok((
        jar,
        ApiResponse::ok("Login successful", LoginResponse::from(&outcome.user)),
    ))
}

/// POST /api/auth/refresh
async fn refresh_handler(
    State(state): State<Arc<AuthApiState>>,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<LoginResponse>), AuthError> {
    let token = cookies::refresh_token(&jar);
    let outcome = state.auth_service.refresh(token.as_deref()).await?;

    let jar = state.cookies.set_tokens(
        jar,
        &outcome.tokens.access.token,
        &outcome.tokens.refresh.token,
    );
    Ok((
        jar,
        ApiResponse::ok("Token refreshed successfully", LoginResponse::from(&outcome.user)),
    ))
}

/// POST /api/auth/logout
async fn logout_handler(
    State(state): State<Arc<AuthApiState>>,
    jar: CookieJar,
) -> (CookieJar, ApiResponse<()>) {
    let access = cookies::access_token(&jar);
    let refresh = cookies::refresh_token(&jar);
    state
        .auth_service
        .logout(access.as_deref(), refresh.as_deref())
        .await;

    (
        state.cookies.clear_tokens(jar),
        ApiResponse::message("Logout successful"),
    )
}

/// POST /api/auth/check-email?email=
async fn check_email_handler(
    State(state): State<Arc<AuthApiState>>,
    Query(query): Query<EmailQuery>,
) -> Result<ApiResponse<bool>, AuthError> {
    let exists = state.auth_service.check_email(&query.email).await?;
    let message = if exists {
        "Email is already registered"
    } else {
        "Email is available"
    };
    Ok(ApiResponse::ok(message, exists))
}

/// GET /api/auth/me, GET /api/users/me
async fn me_handler(
    State(state): State<Arc<AuthApiState>>,
    CurrentUser(identity): CurrentUser,
) -> Result<ApiResponse<UserResponse>, AuthError> {
    let user = state.auth_service.current_user(&identity).await?;
    Ok(ApiResponse::ok("Get current user successful", user.into()))
}

/// GET /api/users/{id}
async fn user_by_id_handler(
    State(state): State<Arc<AuthApiState>>,
    CurrentUser(identity): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<UserResponse>, AuthError> {
    identity.require_role(RoleName::Admin)?;

    let user = state.auth_service.user_by_id(id).await?;
    Ok(ApiResponse::ok("Get user by ID successful", user.into()))
}

/// GET /api/users/username/{username}
async fn user_by_username_handler(
    State(state): State<Arc<AuthApiState>>,
    CurrentUser(_identity): CurrentUser,
    Path(username): Path<String>,
) -> Result<ApiResponse<UserResponse>, AuthError> {
    let user = state.auth_service.user_by_username(&username).await?;
    Ok(ApiResponse::ok("Get user by username successful", user.into()))
}

/// POST /api/auth/forgot-password?email=
async fn forgot_password_handler(
    State(state): State<Arc<AuthApiState>>,
    Query(query): Query<EmailQuery>,
) -> Result<ApiResponse<()>, AuthError> {
    state.auth_service.forgot_password(&query.email).await?;
    Ok(ApiResponse::message(
        "If the email exists, an OTP has been sent",
    ))
}

/// POST /api/auth/reset-password
async fn reset_password_handler(
    State(state): State<Arc<AuthApiState>>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<ApiResponse<()>, AuthError> {
    state.auth_service.reset_password(request).await?;
    Ok(ApiResponse::message("Password has been reset successfully"))
}

/// GET /api/auth/verify-email?token=
async fn verify_email_handler(
    State(state): State<Arc<AuthApiState>>,
    Query(query): Query<TokenQuery>,
) -> Result<ApiResponse<()>, AuthError> {
    state.auth_service.verify_email(&query.token).await?;
    Ok(ApiResponse::message("Email verified successfully"))
}

/// POST /api/auth/resend-verification-email
async fn resend_verification_handler(
    State(state): State<Arc<AuthApiState>>,
    CurrentUser(identity): CurrentUser,
) -> Result<ApiResponse<()>, AuthError> {
    state
        .auth_service
        .resend_verification_email(&identity)
        .await?;
    Ok(ApiResponse::message("Verification email has been sent"))
}
