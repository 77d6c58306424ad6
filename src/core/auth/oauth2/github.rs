//! GitHub authorization-code client

use async_trait::async_trait;
use reqwest::{Url, header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::OAuthError;

const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_API_URL: &str = "https://api.github.com";
const GITHUB_SCOPES: &str = "read:user user:email";
const USER_AGENT: &str = concat!("authcore/", env!("CARGO_PKG_VERSION"));

/// Provider client used by the sign-in routes
#[async_trait]
pub trait OAuthClient: Send + Sync {
    /// URL the browser is sent to, carrying `state`
    fn authorization_url(&self, state: &str) -> Result<String, OAuthError>;

    /// Exchange an authorization code and return the raw profile attributes
    async fn fetch_profile(&self, code: &str) -> Result<Value, OAuthError>;
}

#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Callback registered with the GitHub app
    pub callback_url: String,
    pub authorize_url: String,
    pub token_url: String,
    pub api_url: String,
}

impl GithubConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            callback_url: callback_url.into(),
            authorize_url: GITHUB_AUTHORIZE_URL.to_string(),
            token_url: GITHUB_TOKEN_URL.to_string(),
            api_url: GITHUB_API_URL.to_string(),
        }
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct EmailEntry {
    email: String,
    primary: bool,
    verified: bool,
}

#[derive(Clone)]
pub struct GithubClient {
    config: GithubConfig,
    http: reqwest::Client,
}

impl GithubClient {
    pub fn new(config: GithubConfig) -> Result<Self, OAuthError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| OAuthError::ExternalAuthentication(format!("HTTP client error: {e}")))?;

        Ok(Self { config, http })
    }

    async fn exchange_code(&self, code: &str) -> Result<String, OAuthError> {
        let response: TokenResponse = self
            .http
            .post(&self.config.token_url)
            .header(header::ACCEPT, "application/json")
            .json(&TokenRequest {
                client_id: &self.config.client_id,
                client_secret: &self.config.client_secret,
                code,
                redirect_uri: &self.config.callback_url,
            })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(exchange_failure)?
            .json()
            .await
            .map_err(exchange_failure)?;

        match response.access_token {
            Some(token) => Ok(token),
            None => Err(OAuthError::ExternalAuthentication(format!(
                "token exchange rejected: {}",
                response
                    .error_description
                    .or(response.error)
                    .unwrap_or_else(|| "no access token".to_string())
            ))),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
    ) -> Result<T, OAuthError> {
        self.http
            .get(format!("{}{path}", self.config.api_url.trim_end_matches('/')))
            .bearer_auth(access_token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(exchange_failure)?
            .json()
            .await
            .map_err(exchange_failure)
    }

    /// Primary verified address, for accounts with a private profile email
    async fn primary_email(&self, access_token: &str) -> Result<Option<String>, OAuthError> {
        let emails: Vec<EmailEntry> = self.get_json("/user/emails", access_token).await?;
        Ok(emails
            .into_iter()
            .find(|e| e.primary && e.verified)
            .map(|e| e.email))
    }
}

#[async_trait]
impl OAuthClient for GithubClient {
    fn authorization_url(&self, state: &str) -> Result<String, OAuthError> {
        let url = Url::parse_with_params(
            &self.config.authorize_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.callback_url.as_str()),
                ("scope", GITHUB_SCOPES),
                ("state", state),
            ],
        )
        .map_err(|e| OAuthError::ExternalAuthentication(format!("invalid authorize URL: {e}")))?;

        Ok(url.to_string())
    }

    async fn fetch_profile(&self, code: &str) -> Result<Value, OAuthError> {
        let access_token = self.exchange_code(code).await?;
        let mut profile: Value = self.get_json("/user", &access_token).await?;

        let has_email = profile
            .get("email")
            .and_then(Value::as_str)
            .is_some_and(|e| !e.is_empty());
        if !has_email {
            match self.primary_email(&access_token).await {
                Ok(Some(email)) => profile["email"] = Value::String(email),
                Ok(None) => debug!("GitHub account has no verified primary email"),
                Err(e) => debug!(error = %e, "GitHub email lookup failed, continuing without"),
            }
        }

        Ok(profile)
    }
}

fn exchange_failure(err: reqwest::Error) -> OAuthError {
    OAuthError::ExternalAuthentication(format!("GitHub request failed: {err}"))
}
