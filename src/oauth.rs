//! OAuth2 Authentication Module
//!
//! Supplies bearer tokens for the Google Drive app-data scope:
//! - cached access token while it is fresh
//! - silent refresh from a persisted refresh token
//! - interactive authorization-code + PKCE flow with a loopback callback

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::{
    basic::BasicClient,
    reqwest::async_http_client,
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse,
    TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tiny_http::{Response, Server};
use tokio::sync::RwLock;
use url::Url;

use crate::db::{Database, DbError};

/// Settings-table key holding the refresh token
const REFRESH_TOKEN_KEY: &str = "oauth_refresh_token";

/// Tokens this close to expiry are treated as expired
const EXPIRY_SKEW_SECS: i64 = 60;

/// How long the loopback server waits for the browser redirect
const CALLBACK_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("OAuth2 error: {0}")]
    OAuth2(String),
    #[error("HTTP server error: {0}")]
    Server(String),
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),
    /// Token endpoint unreachable; the grant itself may still be valid
    #[error("Token endpoint unreachable: {0}")]
    Network(String),
    #[error("User cancelled authentication")]
    Cancelled,
    #[error("Not signed in - interactive sign-in required")]
    NotSignedIn,
    #[error("Credential storage error: {0}")]
    Storage(#[from] DbError),
}

/// Source of opaque bearer tokens for the remote store
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a token; may prompt the user only when `interactive`
    async fn acquire(&self, interactive: bool) -> Result<String, AuthError>;

    /// Drop a token the remote rejected, so the next acquire fetches a new one
    async fn invalidate(&self, token: &str);

    /// Forget the cached token and any persisted grant, without network calls
    async fn sign_out(&self) -> Result<(), AuthError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

/// Google OAuth2 configuration for the Drive app-data folder
pub fn google_drive_config(client_id: String, client_secret: Option<String>, redirect_uri: String) -> OAuthConfig {
    OAuthConfig {
        client_id,
        client_secret,
        auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
        token_url: "https://oauth2.googleapis.com/token".to_string(),
        redirect_uri,
        scopes: vec!["https://www.googleapis.com/auth/drive.appdata".to_string()],
    }
}

fn build_client(config: &OAuthConfig) -> Result<BasicClient, AuthError> {
    Ok(BasicClient::new(
        ClientId::new(config.client_id.clone()),
        config.client_secret.clone().map(ClientSecret::new),
        AuthUrl::new(config.auth_url.clone()).map_err(|e| AuthError::OAuth2(e.to_string()))?,
        Some(TokenUrl::new(config.token_url.clone()).map_err(|e| AuthError::OAuth2(e.to_string()))?),
    )
    .set_redirect_uri(
        RedirectUrl::new(config.redirect_uri.clone())
            .map_err(|e| AuthError::OAuth2(e.to_string()))?,
    ))
}

/// Authorization URL plus the secrets needed to finish the flow
pub struct PendingAuthorization {
    pub url: String,
    pub csrf_token: CsrfToken,
    pub pkce_verifier: PkceCodeVerifier,
}

/// Build the consent URL (offline access so a refresh token is issued)
pub fn authorization_url(config: &OAuthConfig) -> Result<PendingAuthorization, AuthError> {
    let client = build_client(config)?;
    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let mut auth_request = client.authorize_url(CsrfToken::new_random);
    for scope in &config.scopes {
        auth_request = auth_request.add_scope(Scope::new(scope.clone()));
    }

    let (url, csrf_token) = auth_request
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .set_pkce_challenge(pkce_challenge)
        .url();

    Ok(PendingAuthorization {
        url: url.to_string(),
        csrf_token,
        pkce_verifier,
    })
}

/// Query parameters delivered to the loopback redirect
#[derive(Debug, Clone, PartialEq, Eq)]
struct CallbackParams {
    code: String,
    state: String,
}

/// Parse the redirect request target (`/callback?code=..&state=..`)
fn parse_callback(target: &str, expected_path: &str) -> Option<Result<CallbackParams, AuthError>> {
    let url = Url::parse(&format!("http://localhost{}", target)).ok()?;
    if url.path() != expected_path {
        return None;
    }

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "error" if value == "access_denied" => return Some(Err(AuthError::Cancelled)),
            "error" => return Some(Err(AuthError::OAuth2(value.into_owned()))),
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, state) {
        (Some(code), Some(state)) => Some(Ok(CallbackParams { code, state })),
        _ => Some(Err(AuthError::OAuth2("Callback missing code or state".to_string()))),
    }
}

/// Run a loopback HTTP server until the browser redirect arrives (blocking)
fn wait_for_callback(redirect_uri: &str) -> Result<CallbackParams, AuthError> {
    let redirect = Url::parse(redirect_uri).map_err(|e| AuthError::OAuth2(e.to_string()))?;
    let host = redirect.host_str().unwrap_or("127.0.0.1").to_string();
    let port = redirect.port_or_known_default().unwrap_or(8080);

    let server = Server::http((host.as_str(), port))
        .map_err(|e| AuthError::Server(e.to_string()))?;

    log::info!("OAuth callback server started on {}:{}", host, port);

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(CALLBACK_TIMEOUT_SECS);
    while std::time::Instant::now() < deadline {
        let request = match server.recv_timeout(std::time::Duration::from_secs(1)) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => return Err(AuthError::Server(e.to_string())),
        };

        match parse_callback(request.url(), redirect.path()) {
            Some(result) => {
                let message = match &result {
                    Ok(_) => "Authentication successful! You can close this window.",
                    Err(_) => "Authentication failed! You can close this window.",
                };
                let _ = request.respond(Response::from_string(message));
                return result;
            }
            None => {
                let _ = request.respond(Response::from_string("Not found").with_status_code(404));
            }
        }
    }

    Err(AuthError::Cancelled)
}

/// Transport failures stay distinguishable from rejected grants
fn token_error<RE, T>(e: RequestTokenError<RE, T>) -> AuthError
where
    RE: std::error::Error + 'static,
    T: oauth2::ErrorResponse + 'static,
{
    match e {
        RequestTokenError::Request(e) => AuthError::Network(e.to_string()),
        other => AuthError::TokenExchange(other.to_string()),
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() + Duration::seconds(EXPIRY_SKEW_SECS) < expires_at,
            None => true,
        }
    }
}

/// Google credential provider backed by the local database
pub struct GoogleAuth {
    config: OAuthConfig,
    db: Arc<Database>,
    cached: RwLock<Option<CachedToken>>,
}

impl GoogleAuth {
    pub fn new(config: OAuthConfig, db: Arc<Database>) -> Self {
        Self {
            config,
            db,
            cached: RwLock::new(None),
        }
    }

    async fn cache_token(&self, access_token: String, expires_in: Option<std::time::Duration>) {
        let expires_at = expires_in
            .and_then(|d| Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);

        *self.cached.write().await = Some(CachedToken { access_token, expires_at });
    }

    fn stored_refresh_token(&self) -> Result<Option<String>, AuthError> {
        Ok(self.db.get_setting::<String>(REFRESH_TOKEN_KEY)?)
    }

    fn store_refresh_token(&self, refresh_token: &str) -> Result<(), AuthError> {
        Ok(self.db.set_setting(REFRESH_TOKEN_KEY, &refresh_token)?)
    }

    /// Exchange the stored refresh token; `Ok(None)` when the grant is gone
    async fn refresh(&self, refresh_token: String) -> Result<Option<String>, AuthError> {
        let client = build_client(&self.config)?;

        match client
            .exchange_refresh_token(&RefreshToken::new(refresh_token))
            .request_async(async_http_client)
            .await
        {
            Ok(token) => {
                let access_token = token.access_token().secret().clone();
                if let Some(rotated) = token.refresh_token() {
                    self.store_refresh_token(rotated.secret())?;
                }
                self.cache_token(access_token.clone(), token.expires_in()).await;
                log::info!("OAuth access token refreshed");
                Ok(Some(access_token))
            }
            Err(RequestTokenError::ServerResponse(e)) => {
                log::warn!("Refresh token rejected ({}), sign-in required", e);
                self.db.delete_setting(REFRESH_TOKEN_KEY)?;
                Ok(None)
            }
            Err(e) => Err(token_error(e)),
        }
    }

    /// Full browser consent flow
    async fn authorize_interactively(&self) -> Result<String, AuthError> {
        let pending = authorization_url(&self.config)?;

        log::info!("Opening browser for Google sign-in");
        if let Err(e) = open::that(&pending.url) {
            log::warn!("Failed to open browser ({}); visit this URL to sign in: {}", e, pending.url);
        }

        let redirect_uri = self.config.redirect_uri.clone();
        let params = tokio::task::spawn_blocking(move || wait_for_callback(&redirect_uri))
            .await
            .map_err(|e| AuthError::Server(e.to_string()))??;

        if params.state != *pending.csrf_token.secret() {
            return Err(AuthError::OAuth2("CSRF state mismatch".to_string()));
        }

        let client = build_client(&self.config)?;
        let token = client
            .exchange_code(AuthorizationCode::new(params.code))
            .set_pkce_verifier(pending.pkce_verifier)
            .request_async(async_http_client)
            .await
            .map_err(token_error)?;

        let access_token = token.access_token().secret().clone();
        if let Some(refresh_token) = token.refresh_token() {
            self.store_refresh_token(refresh_token.secret())?;
        }
        self.cache_token(access_token.clone(), token.expires_in()).await;

        log::info!("Google sign-in completed");
        Ok(access_token)
    }
}

#[async_trait]
impl CredentialProvider for GoogleAuth {
    async fn acquire(&self, interactive: bool) -> Result<String, AuthError> {
        if let Some(cached) = self.cached.read().await.as_ref() {
            if cached.is_fresh() {
                return Ok(cached.access_token.clone());
            }
        }

        if let Some(refresh_token) = self.stored_refresh_token()? {
            if let Some(access_token) = self.refresh(refresh_token).await? {
                return Ok(access_token);
            }
        }

        if !interactive {
            return Err(AuthError::NotSignedIn);
        }

        self.authorize_interactively().await
    }

    async fn invalidate(&self, token: &str) {
        let mut cached = self.cached.write().await;
        if cached.as_ref().map(|c| c.access_token == token).unwrap_or(false) {
            log::warn!("Removing cached OAuth token");
            *cached = None;
        }
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        *self.cached.write().await = None;
        Ok(self.db.delete_setting(REFRESH_TOKEN_KEY)?)
    }
}
