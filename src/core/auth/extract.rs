//! Request extractors whose rejections render as [`AuthError`] payloads
//! instead of axum's plain-text bodies.

use axum::extract::{FromRequest, FromRequestParts};

use crate::core::auth::error::AuthError;

/// JSON body
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AuthError))]
pub struct Json<T>(pub T);

/// Query string
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AuthError))]
pub struct Query<T>(pub T);

/// Path parameters
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AuthError))]
pub struct Path<T>(pub T);
