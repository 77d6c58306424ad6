//! Per-provider profile extraction

use serde_json::Value;

use super::OAuthError;
use crate::core::db::models::Provider;

/// Supported third-party identity providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OAuthProvider {
    Github,
}

/// Provider attributes normalized to what the resolver needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProfile {
    pub external_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

impl OAuthProvider {
    /// Look up a provider by its registration id (`github`), case-insensitively
    pub fn from_registration_id(id: &str) -> Result<Self, OAuthError> {
        match id.to_ascii_lowercase().as_str() {
            "github" => Ok(OAuthProvider::Github),
            other => Err(OAuthError::UnsupportedProvider(other.to_string())),
        }
    }

    pub fn registration_id(&self) -> &'static str {
        match self {
            OAuthProvider::Github => "github",
        }
    }

    /// Provider tag stored on the user record
    pub fn provider(&self) -> Provider {
        match self {
            OAuthProvider::Github => Provider::Github,
        }
    }

    /// Normalize raw profile attributes
    pub fn extract(&self, attributes: &Value) -> Result<OAuthProfile, OAuthError> {
        match self {
            OAuthProvider::Github => extract_github(attributes),
        }
    }
}

fn extract_github(attributes: &Value) -> Result<OAuthProfile, OAuthError> {
    // GitHub sends a numeric id
    let external_id = match attributes.get("id") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => return Err(OAuthError::MissingAttribute("id")),
    };

    let login = non_empty_str(attributes, "login");
    let display_name = non_empty_str(attributes, "name")
        .or(login)
        .ok_or(OAuthError::MissingAttribute("login"))?;

    Ok(OAuthProfile {
        external_id,
        display_name,
        email: non_empty_str(attributes, "email"),
        avatar_url: non_empty_str(attributes, "avatar_url"),
    })
}

fn non_empty_str(attributes: &Value, key: &str) -> Option<String> {
    attributes
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
