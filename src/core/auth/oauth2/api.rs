//! Third-party sign-in routes
//!
//! - GET /oauth2/authorization/{provider} - Redirect to the provider
//! - GET /login/oauth2/code/{provider} - Provider callback
//!
//! The callback always answers with a redirect to the configured landing
//! page, carrying `success=true` or `success=false&error=<kind>`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use rand::{Rng, distributions::Alphanumeric};
use reqwest::Url;
use serde::Deserialize;
use tracing::{info, warn};

use super::{OAuthClient, OAuthError, OAuthProvider};
use crate::core::auth::cookies::CookiePolicy;
use crate::core::auth::service::AuthService;
use crate::core::ephemeral::EphemeralError;

const STATE_PREFIX: &str = "OAUTH_STATE:";
const STATE_TTL: Duration = Duration::from_secs(10 * 60);
const STATE_LENGTH: usize = 32;

/// Shared state for the sign-in routes
#[derive(Clone)]
pub struct OAuthApiState {
    pub auth_service: AuthService,
    pub cookies: CookiePolicy,
    pub clients: HashMap<OAuthProvider, Arc<dyn OAuthClient>>,
    /// Landing page that receives the outcome
    pub redirect_uri: String,
}

impl OAuthApiState {
    pub fn new(auth_service: AuthService, cookies: CookiePolicy, redirect_uri: String) -> Self {
        Self {
            auth_service,
            cookies,
            clients: HashMap::new(),
            redirect_uri,
        }
    }

    pub fn with_client(mut self, provider: OAuthProvider, client: Arc<dyn OAuthClient>) -> Self {
        self.clients.insert(provider, client);
        self
    }

    fn client(
        &self,
        registration_id: &str,
    ) -> Result<(OAuthProvider, Arc<dyn OAuthClient>), OAuthError> {
        let provider = OAuthProvider::from_registration_id(registration_id)?;
        let client = self
            .clients
            .get(&provider)
            .cloned()
            .ok_or_else(|| OAuthError::UnsupportedProvider(registration_id.to_string()))?;
        Ok((provider, client))
    }

    fn landing(&self, params: &[(&str, &str)]) -> Redirect {
        match Url::parse(&self.redirect_uri) {
            Ok(mut url) => {
                url.query_pairs_mut().extend_pairs(params);
                Redirect::to(url.as_str())
            }
            Err(_) => {
                let query = params
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("&");
                Redirect::to(&format!("{}?{query}", self.redirect_uri))
            }
        }
    }

    fn failure(&self, err: &OAuthError) -> Response {
        warn!(error = %err, kind = err.kind(), "Third-party sign-in failed");
        self.landing(&[("success", "false"), ("error", err.kind())])
            .into_response()
    }
}

/// Create the sign-in router
pub fn oauth_router(state: OAuthApiState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/oauth2/authorization/{provider}", get(authorize_handler))
        .route("/login/oauth2/code/{provider}", get(callback_handler))
        .with_state(state)
}

fn state_key(state: &str) -> String {
    format!("{STATE_PREFIX}{state}")
}

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LENGTH)
        .map(char::from)
        .collect()
}

/// GET /oauth2/authorization/{provider}
async fn authorize_handler(
    State(state): State<Arc<OAuthApiState>>,
    Path(registration_id): Path<String>,
) -> Response {
    match start_authorization(&state, &registration_id).await {
        Ok(url) => Redirect::to(&url).into_response(),
        Err(e) => state.failure(&e),
    }
}

async fn start_authorization(
    state: &OAuthApiState,
    registration_id: &str,
) -> Result<String, OAuthError> {
    let (provider, client) = state.client(registration_id)?;

    let csrf = random_state();
    state
        .auth_service
        .ephemeral()
        .set(&state_key(&csrf), provider.registration_id(), STATE_TTL)
        .await
        .map_err(|e| OAuthError::ExternalAuthentication(e.to_string()))?;

    client.authorization_url(&csrf)
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// GET /login/oauth2/code/{provider}
async fn callback_handler(
    State(state): State<Arc<OAuthApiState>>,
    Path(registration_id): Path<String>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Response {
    match complete_authorization(&state, &registration_id, query).await {
        Ok((access, refresh)) => {
            let jar = state.cookies.set_tokens(jar, &access, &refresh);
            (jar, state.landing(&[("success", "true")])).into_response()
        }
        Err(e) => state.failure(&e),
    }
}

async fn complete_authorization(
    state: &OAuthApiState,
    registration_id: &str,
    query: CallbackQuery,
) -> Result<(String, String), OAuthError> {
    let (provider, client) = state.client(registration_id)?;

    let csrf = query.state.ok_or(OAuthError::InvalidState)?;
    consume_state(state, provider, &csrf).await?;

    if let Some(error) = query.error {
        return Err(OAuthError::ExternalAuthentication(format!(
            "provider returned {error}"
        )));
    }
    let code = query
        .code
        .ok_or_else(|| OAuthError::ExternalAuthentication("missing code".to_string()))?;

    let attributes = client.fetch_profile(&code).await?;
    let outcome = state
        .auth_service
        .oauth_login(provider, &attributes)
        .await?;

    info!(user_id = %outcome.user.id, "Third-party sign-in complete");
    Ok((outcome.tokens.access.token, outcome.tokens.refresh.token))
}

/// Single use: only the caller whose delete removed the entry proceeds
async fn consume_state(
    state: &OAuthApiState,
    provider: OAuthProvider,
    csrf: &str,
) -> Result<(), OAuthError> {
    let store = state.auth_service.ephemeral();
    let key = state_key(csrf);
    let unavailable = |e: EphemeralError| {
        OAuthError::ExternalAuthentication(e.to_string())
    };

    let stored = store.get(&key).await.map_err(unavailable)?;
    if stored.as_deref() != Some(provider.registration_id()) {
        return Err(OAuthError::InvalidState);
    }
    if !store.delete(&key).await.map_err(unavailable)? {
        return Err(OAuthError::InvalidState);
    }
    Ok(())
}
