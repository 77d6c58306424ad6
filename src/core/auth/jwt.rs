//! Signed token codec
//!
//! Access and refresh tokens are HS256 JWTs signed with two independent
//! secrets, so a leaked key in one domain cannot forge tokens in the other.
//! Access tokens are short-lived (15 minutes by default) and carry identity
//! claims; refresh tokens (7 days) carry only the subject and a random id.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::core::db::models::RoleName;

/// Default access token expiration time (15 minutes)
const ACCESS_TOKEN_EXPIRATION_MINUTES: i64 = 15;

/// Default refresh token expiration time (7 days)
const REFRESH_TOKEN_EXPIRATION_DAYS: i64 = 7;

const DEFAULT_ISSUER: &str = "authcore";

/// JWT configuration
#[derive(Clone)]
pub struct JwtConfig {
    /// Secret for the access-token domain
    pub access_secret: String,
    /// Secret for the refresh-token domain
    pub refresh_secret: String,
    /// Access token expiration in minutes
    pub access_token_expiration_minutes: i64,
    /// Refresh token expiration in days
    pub refresh_token_expiration_days: i64,
    /// Token issuer
    pub issuer: String,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("access_token_expiration_minutes", &self.access_token_expiration_minutes)
            .field("refresh_token_expiration_days", &self.refresh_token_expiration_days)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl JwtConfig {
    /// Create a new JWT configuration
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_token_expiration_minutes: ACCESS_TOKEN_EXPIRATION_MINUTES,
            refresh_token_expiration_days: REFRESH_TOKEN_EXPIRATION_DAYS,
            issuer: DEFAULT_ISSUER.to_string(),
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Result<Self, TokenError> {
        let access_secret = std::env::var("JWT_ACCESS_SECRET")
            .map_err(|_| TokenError::MissingSecret("JWT_ACCESS_SECRET"))?;
        let refresh_secret = std::env::var("JWT_REFRESH_SECRET")
            .map_err(|_| TokenError::MissingSecret("JWT_REFRESH_SECRET"))?;

        let access_exp = std::env::var("JWT_ACCESS_EXPIRATION_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(ACCESS_TOKEN_EXPIRATION_MINUTES);

        let refresh_exp = std::env::var("JWT_REFRESH_EXPIRATION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(REFRESH_TOKEN_EXPIRATION_DAYS);

        let issuer = std::env::var("JWT_ISSUER").unwrap_or_else(|_| DEFAULT_ISSUER.to_string());

        let config = Self {
            access_secret,
            refresh_secret,
            access_token_expiration_minutes: access_exp,
            refresh_token_expiration_days: refresh_exp,
            issuer,
        };
        config.validate()?;
        Ok(config)
    }

    /// Both secrets must be present and distinct
    pub fn validate(&self) -> Result<(), TokenError> {
        if self.access_secret.is_empty() {
            return Err(TokenError::MissingSecret("JWT_ACCESS_SECRET"));
        }
        if self.refresh_secret.is_empty() {
            return Err(TokenError::MissingSecret("JWT_REFRESH_SECRET"));
        }
        if self.access_secret == self.refresh_secret {
            return Err(TokenError::SharedSecret);
        }
        Ok(())
    }

    /// Set access token expiration
    pub fn access_token_expiration(mut self, minutes: i64) -> Self {
        self.access_token_expiration_minutes = minutes;
        self
    }

    /// Set refresh token expiration
    pub fn refresh_token_expiration(mut self, days: i64) -> Self {
        self.refresh_token_expiration_days = days;
        self
    }

    /// Set issuer
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }
}

/// Token codec errors
///
/// `Expired` is kept apart from the other verification failures because the
/// client reacts to it by refreshing rather than re-authenticating.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("{0} environment variable not set")]
    MissingSecret(&'static str),

    #[error("Access and refresh secrets must differ")]
    SharedSecret,

    #[error("Token encoding failed: {0}")]
    Encoding(String),

    #[error("Token expired")]
    Expired,

    #[error("Invalid token signature")]
    BadSignature,

    #[error("Malformed token")]
    Malformed,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidAudience
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => TokenError::BadSignature,
            _ => TokenError::Malformed,
        }
    }
}

/// Signing domain of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenDomain {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenDomain::Access => write!(f, "access"),
            TokenDomain::Refresh => write!(f, "refresh"),
        }
    }
}

/// Claims carried by an access token.
///
/// `sub` is typed as a UUID so a token whose subject is not a valid user id
/// never decodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub roles: BTreeSet<RoleName>,
    pub token_type: TokenDomain,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub jti: String,
}

/// Claims carried by a refresh token. No roles: they are re-resolved on use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub token_type: TokenDomain,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub jti: String,
}

/// The domain-independent part of a verified token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedToken {
    pub subject: Uuid,
    pub domain: TokenDomain,
    pub expires_at: DateTime<Utc>,
}

impl VerifiedToken {
    /// Time left before the token's embedded expiry, zero if already past
    pub fn remaining_lifetime(&self) -> std::time::Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or_default()
    }
}

/// A freshly minted token and its expiry
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Identity data embedded into an access token
#[derive(Debug, Clone, Copy)]
pub struct AccessSubject<'a> {
    pub user_id: Uuid,
    pub username: &'a str,
    pub email: Option<&'a str>,
    pub roles: &'a BTreeSet<RoleName>,
}

/// JWT service for token operations
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
}

impl JwtService {
    /// Create a new JWT service
    pub fn new(config: JwtConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            config,
        }
    }

    /// Create JWT service from environment variables
    pub fn from_env() -> Result<Self, TokenError> {
        let config = JwtConfig::from_env()?;
        Ok(Self::new(config))
    }

    pub fn access_ttl(&self) -> Duration {
        Duration::minutes(self.config.access_token_expiration_minutes)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::days(self.config.refresh_token_expiration_days)
    }

    /// Mint an access token carrying username, email and roles
    pub fn issue_access_token(&self, subject: AccessSubject<'_>) -> Result<IssuedToken, TokenError> {
        let now = Utc::now();
        let exp = now + self.access_ttl();

        let claims = AccessClaims {
            sub: subject.user_id,
            username: subject.username.to_string(),
            email: subject.email.map(str::to_string),
            roles: subject.roles.clone(),
            token_type: TokenDomain::Access,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.config.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::default(), &claims, &self.access_encoding)
            .map_err(|e| TokenError::Encoding(e.to_string()))?;

        Ok(IssuedToken {
            token,
            expires_at: timestamp(exp.timestamp())?,
        })
    }

    /// Mint an opaque refresh token for a user
    pub fn issue_refresh_token(&self, user_id: Uuid) -> Result<IssuedToken, TokenError> {
        let now = Utc::now();
        let exp = now + self.refresh_ttl();

        let claims = RefreshClaims {
            sub: user_id,
            token_type: TokenDomain::Refresh,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.config.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::default(), &claims, &self.refresh_encoding)
            .map_err(|e| TokenError::Encoding(e.to_string()))?;

        Ok(IssuedToken {
            token,
            expires_at: timestamp(exp.timestamp())?,
        })
    }

    fn decode_in<T: DeserializeOwned>(
        &self,
        token: &str,
        domain: TokenDomain,
    ) -> Result<T, TokenError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.config.issuer]);
        // Set leeway to 0 for strict expiration checking
        validation.leeway = 0;

        let key = match domain {
            TokenDomain::Access => &self.access_decoding,
            TokenDomain::Refresh => &self.refresh_decoding,
        };

        Ok(decode::<T>(token, key, &validation)?.claims)
    }

    /// Verify an access token and return its claims
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let claims: AccessClaims = self.decode_in(token, TokenDomain::Access)?;
        if claims.token_type != TokenDomain::Access {
            return Err(TokenError::BadSignature);
        }
        Ok(claims)
    }

    /// Verify a refresh token and return its claims
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let claims: RefreshClaims = self.decode_in(token, TokenDomain::Refresh)?;
        if claims.token_type != TokenDomain::Refresh {
            return Err(TokenError::BadSignature);
        }
        Ok(claims)
    }

    /// Verify a token in the given domain, keeping only subject and expiry
    pub fn parse_and_verify(
        &self,
        token: &str,
        domain: TokenDomain,
    ) -> Result<VerifiedToken, TokenError> {
        let (subject, exp) = match domain {
            TokenDomain::Access => {
                let claims = self.verify_access(token)?;
                (claims.sub, claims.exp)
            }
            TokenDomain::Refresh => {
                let claims = self.verify_refresh(token)?;
                (claims.sub, claims.exp)
            }
        };

        Ok(VerifiedToken {
            subject,
            domain,
            expires_at: timestamp(exp)?,
        })
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, TokenError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or(TokenError::Malformed)
}
