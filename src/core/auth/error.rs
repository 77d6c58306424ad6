//! Client-facing error taxonomy
//!
//! Every failure that reaches a client is an [`AuthError`] rendered as
//! `{status, error, message, path, timestamp}`. Collaborator failures
//! (storage, ephemeral store, dispatch) collapse to `TransientDependency`,
//! whose detail is logged and never sent.

use axum::{
    Json,
    body::Body,
    extract::{
        Request,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::auth::jwt::TokenError;
use crate::core::auth::validation::{FieldErrors, describe};
use crate::core::db::models::Provider;
use crate::core::db::repositories::{SessionRepositoryError, UserRepositoryError};
use crate::core::dispatch::DispatchError;
use crate::core::ephemeral::EphemeralError;

/// Authentication engine error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Bad credentials at login, identical for every cause
    #[error("Invalid username or password")]
    AuthenticationFailure,

    #[error("Token is {0}")]
    TokenInvalid(&'static str),

    #[error("Token has expired")]
    TokenExpired,

    #[error("Session expired or revoked, please log in again")]
    SessionExpiredOrRevoked,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("An account with this email already exists via {provider}")]
    AccountCollision { provider: Provider },

    #[error("Invalid or expired code")]
    InvalidOrExpiredCode,

    #[error("{}", describe(.0))]
    Validation(FieldErrors),

    #[error("Full authentication is required to access this resource")]
    Unauthenticated,

    #[error("Access denied")]
    Forbidden,

    #[error("External authentication failed: {0}")]
    ExternalAuthentication(String),

    #[error("Service temporarily unavailable")]
    TransientDependency(String),

    #[error("Internal server error")]
    Internal(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::AuthenticationFailure
            | AuthError::TokenInvalid(_)
            | AuthError::TokenExpired
            | AuthError::SessionExpiredOrRevoked
            | AuthError::Unauthenticated
            | AuthError::ExternalAuthentication(_) => StatusCode::UNAUTHORIZED,
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::AlreadyExists(_) | AuthError::AccountCollision { .. } => {
                StatusCode::CONFLICT
            }
            AuthError::InvalidOrExpiredCode | AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::TransientDependency(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label for the `error` field
    fn label(&self) -> String {
        match self {
            AuthError::Validation(_) => "Invalid Payload".to_string(),
            AuthError::AccountCollision { .. } => "Account Collision".to_string(),
            _ => self
                .status_code()
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
        }
    }

    pub fn to_payload(&self, path: impl Into<String>) -> ErrorResponse {
        ErrorResponse {
            status: self.status_code().as_u16(),
            error: self.label(),
            message: self.to_string(),
            path: path.into(),
            timestamp: Utc::now(),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AuthError::TokenExpired,
            TokenError::BadSignature | TokenError::Malformed => AuthError::TokenInvalid("invalid"),
            _ => AuthError::Internal(err.to_string()),
        }
    }
}

impl From<UserRepositoryError> for AuthError {
    fn from(err: UserRepositoryError) -> Self {
        match err {
            UserRepositoryError::NotFound => AuthError::NotFound("User"),
            UserRepositoryError::UsernameAlreadyExists => {
                AuthError::AlreadyExists("Username is already taken".to_string())
            }
            UserRepositoryError::EmailAlreadyExists => {
                AuthError::AlreadyExists("Email is already in use".to_string())
            }
            UserRepositoryError::ProviderIdentityExists => {
                AuthError::AlreadyExists("External account is already linked".to_string())
            }
            UserRepositoryError::DatabaseError(e) => AuthError::TransientDependency(e.to_string()),
        }
    }
}

impl From<SessionRepositoryError> for AuthError {
    fn from(err: SessionRepositoryError) -> Self {
        match err {
            SessionRepositoryError::NotFound => AuthError::NotFound("Refresh session"),
            SessionRepositoryError::ExpiredOrRevoked | SessionRepositoryError::Conflict => {
                AuthError::SessionExpiredOrRevoked
            }
            SessionRepositoryError::DatabaseError(e) => {
                AuthError::TransientDependency(e.to_string())
            }
        }
    }
}

impl From<EphemeralError> for AuthError {
    fn from(err: EphemeralError) -> Self {
        match err {
            EphemeralError::Unavailable(detail) => AuthError::TransientDependency(detail),
            EphemeralError::InvalidTtl(_) => AuthError::Internal(err.to_string()),
        }
    }
}

impl From<DispatchError> for AuthError {
    fn from(err: DispatchError) -> Self {
        AuthError::TransientDependency(err.to_string())
    }
}

impl From<FieldErrors> for AuthError {
    fn from(errors: FieldErrors) -> Self {
        AuthError::Validation(errors)
    }
}

impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        AuthError::Validation([("body", rejection.body_text())].into())
    }
}

impl From<QueryRejection> for AuthError {
    fn from(rejection: QueryRejection) -> Self {
        AuthError::Validation([("query", rejection.body_text())].into())
    }
}

impl From<PathRejection> for AuthError {
    fn from(rejection: PathRejection) -> Self {
        AuthError::Validation([("path", rejection.body_text())].into())
    }
}

/// Structured error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
    pub timestamp: DateTime<Utc>,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.clone())).into_response();
        response.extensions_mut().insert(self);
        response
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            AuthError::TransientDependency(detail) => {
                tracing::error!(error = %detail, "Dependency failure");
            }
            AuthError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
            }
            _ => tracing::debug!(error = %self, "Request rejected"),
        }

        self.to_payload("").into_response()
    }
}

/// Fill the `path` of error payloads produced by handlers, which do not see
/// the request URI.
pub async fn attach_error_path(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let mut response = next.run(request).await;

    let Some(mut payload) = response.extensions_mut().remove::<ErrorResponse>() else {
        return response;
    };
    if !payload.path.is_empty() {
        return response;
    }

    payload.path = path;
    match serde_json::to_vec(&payload) {
        Ok(bytes) => {
            response.headers_mut().remove(header::CONTENT_LENGTH);
            *response.body_mut() = Body::from(bytes);
        }
        Err(e) => tracing::warn!(error = %e, "Failed to re-encode error payload"),
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, routing::get};
    use tower::ServiceExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AuthError::AuthenticationFailure.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AuthError::TokenExpired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::NotFound("User").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AuthError::AccountCollision {
                provider: Provider::Local
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AuthError::InvalidOrExpiredCode.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AuthError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthError::TransientDependency("redis down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_transient_detail_is_not_displayed() {
        let err = AuthError::TransientDependency("connection refused at 10.0.0.3".into());
        assert_eq!(err.to_string(), "Service temporarily unavailable");
        assert!(!err.to_payload("/x").message.contains("10.0.0.3"));
    }

    #[test]
    fn test_token_error_conversion_keeps_expired_distinct() {
        assert!(matches!(
            AuthError::from(TokenError::Expired),
            AuthError::TokenExpired
        ));
        assert!(matches!(
            AuthError::from(TokenError::BadSignature),
            AuthError::TokenInvalid("invalid")
        ));
        assert!(matches!(
            AuthError::from(TokenError::Malformed),
            AuthError::TokenInvalid("invalid")
        ));
    }

    #[test]
    fn test_repository_error_conversion() {
        assert!(matches!(
            AuthError::from(UserRepositoryError::EmailAlreadyExists),
            AuthError::AlreadyExists(_)
        ));
        assert!(matches!(
            AuthError::from(UserRepositoryError::DatabaseError(sqlx::Error::PoolTimedOut)),
            AuthError::TransientDependency(_)
        ));
        assert!(matches!(
            AuthError::from(SessionRepositoryError::NotFound),
            AuthError::NotFound(_)
        ));
        assert!(matches!(
            AuthError::from(SessionRepositoryError::Conflict),
            AuthError::SessionExpiredOrRevoked
        ));
    }

    #[test]
    fn test_validation_message_joins_fields() {
        let mut errors = FieldErrors::new();
        errors.insert("email", "Email should be valid".to_string());
        errors.insert("username", "Username is required".to_string());

        let err = AuthError::Validation(errors);
        assert_eq!(
            err.to_string(),
            "email: Email should be valid; username: Username is required"
        );
        assert_eq!(err.to_payload("/").error, "Invalid Payload");
    }

    #[tokio::test]
    async fn test_payload_shape_and_path_attachment() {
        let app = Router::new()
            .route(
                "/api/things",
                get(|| async { Err::<(), _>(AuthError::NotFound("Thing")) }),
            )
            .layer(axum::middleware::from_fn(attach_error_path));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/things")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["status"], 404);
        assert_eq!(json["error"], "Not Found");
        assert_eq!(json["message"], "Thing not found");
        assert_eq!(json["path"], "/api/things");
        assert!(json["timestamp"].is_string());
    }
}
