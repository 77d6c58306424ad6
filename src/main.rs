use std::sync::Arc;
use std::time::Duration;

use authcore::core::auth::oauth2::{GithubClient, GithubConfig, OAuthApiState, OAuthProvider};
use authcore::core::auth::{
    AuthApiState, AuthService, Collaborators, CookiePolicy, JwtService, PasswordHasher, app_router,
};
use authcore::core::config::Config;
use authcore::core::db::{DbConfig, SessionRepository, UserRepository, create_pool_with_migrations};
use authcore::core::dispatch::RedisStreamDispatcher;
use authcore::core::ephemeral::RedisStore;
use axum::http::{HeaderValue, Method, header};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    // Log config status (without revealing secrets)
    tracing::info!(
        database = config.has_database(),
        redis = config.has_redis(),
        github = config.has_github(),
        "Config loaded"
    );

    let jwt = JwtService::from_env()?;
    let collaborators = collaborators(&config).await?;

    let auth_service = AuthService::new(
        collaborators,
        jwt.clone(),
        PasswordHasher::new(config.bcrypt_cost),
    )
    .with_notifications(&config.notification_stream, &config.frontend_url);

    spawn_session_purge(auth_service.clone());

    let oauth = match (&config.github_client_id, &config.github_client_secret) {
        (Some(id), Some(secret)) => {
            let github = GithubClient::new(GithubConfig::new(
                id,
                secret,
                config.oauth2_callback_url(OAuthProvider::Github.registration_id()),
            ))?;
            Some(
                OAuthApiState::new(
                    auth_service.clone(),
                    CookiePolicy::new(config.cookie_secure, jwt.refresh_ttl()),
                    config.oauth2_redirect_uri(),
                )
                .with_client(OAuthProvider::Github, Arc::new(github)),
            )
        }
        _ => {
            tracing::info!("GitHub sign-in disabled");
            None
        }
    };

    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_str(&config.frontend_url)?)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    let app = app_router(AuthApiState::new(auth_service, config.cookie_secure), oauth)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = config.bind_addr()?;
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// PostgreSQL and Redis when configured, process-local stores otherwise
async fn collaborators(config: &Config) -> Result<Collaborators, Box<dyn std::error::Error>> {
    let mut collaborators = Collaborators::in_memory();

    if let Some(url) = &config.database_url {
        let pool = create_pool_with_migrations(&DbConfig::new(url)).await?;
        collaborators.users = Arc::new(UserRepository::new(pool.clone()));
        collaborators.sessions = Arc::new(SessionRepository::new(pool));
    } else {
        tracing::warn!("DATABASE_URL not set, accounts and sessions are kept in memory");
    }

    if let Some(url) = &config.redis_url {
        let store = RedisStore::connect(url).await?;
        collaborators.dispatcher = Arc::new(RedisStreamDispatcher::new(store.connection()));
        collaborators.ephemeral = Arc::new(store);
    } else {
        tracing::warn!("REDIS_URL not set, codes and blacklist are kept in memory");
    }

    Ok(collaborators)
}

/// Delete expired and revoked refresh sessions every hour
fn spawn_session_purge(auth_service: AuthService) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = auth_service.purge_stale_sessions().await {
                tracing::warn!(error = %e, "Refresh session purge failed");
            }
        }
    });
}
