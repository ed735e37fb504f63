use crate::models::{AuthSession, AuthUser, SessionTokens};
use crate::services::supabase::SupabaseConnection;
use crate::utils::jwt::decode_jwt_claims;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;

/// Refresh this many seconds before the access token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 10;

/// Identity/session provider.
///
/// Handlers and middleware only see this trait; the hosted provider is one
/// implementation and tests use in-memory fakes.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Validate stored tokens, refreshing them when expired.
    ///
    /// `Ok(None)` means "no session" (missing, malformed, expired with no usable
    /// refresh token). `Err` means the provider could not be asked.
    async fn get_session(&self, tokens: &SessionTokens) -> Result<Option<AuthSession>>;

    /// Ask the provider who owns `access_token`. `Ok(None)` when it is rejected.
    async fn get_user(&self, access_token: &str) -> Result<Option<AuthUser>>;

    /// `Ok(None)` for bad credentials.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<SessionTokens>>;

    /// Browser URL that starts an OAuth sign-in with a PKCE S256 challenge.
    fn oauth_authorize_url(&self, provider: &str, redirect_to: &str, code_challenge: &str) -> String;

    async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> Result<SessionTokens>;

    async fn sign_out(&self, access_token: &str) -> Result<()>;
}

/// Outcome of checking stored tokens locally, before any network call.
#[derive(Debug)]
pub enum TokenState {
    Valid(AuthSession),
    Expired,
    Invalid,
}

pub fn inspect_tokens(tokens: &SessionTokens, now: i64) -> TokenState {
    let claims = match decode_jwt_claims(&tokens.access_token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!(error = %e, "Stored access token is not a readable JWT");
            return TokenState::Invalid;
        }
    };

    let expires_at = if tokens.expires_at > 0 {
        tokens.expires_at
    } else {
        claims.exp
    };

    if expires_at - EXPIRY_MARGIN_SECS <= now {
        return TokenState::Expired;
    }

    TokenState::Valid(AuthSession {
        user_id: claims.sub,
        email: claims.email,
        expires_at,
        tokens: tokens.clone(),
        refreshed: false,
    })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
}

impl TokenResponse {
    fn into_tokens(self, now: i64) -> SessionTokens {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| now + secs))
            .unwrap_or(0);
        SessionTokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProviderUser {
    id: String,
    email: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    full_name: Option<String>,
    name: Option<String>,
    avatar_url: Option<String>,
    picture: Option<String>,
}

impl From<ProviderUser> for AuthUser {
    fn from(user: ProviderUser) -> Self {
        let meta = user.user_metadata;
        AuthUser {
            id: user.id,
            email: user.email,
            full_name: meta.full_name.or(meta.name),
            avatar_url: meta.avatar_url.or(meta.picture),
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct SupabaseAuthClient {
    conn: Arc<SupabaseConnection>,
}

impl SupabaseAuthClient {
    pub fn new(conn: Arc<SupabaseConnection>) -> Self {
        Self { conn }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Option<SessionTokens>> {
        let response = self
            .conn
            .post("/auth/v1/token")
            .query(&[("grant_type", "refresh_token")])
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to reach auth provider for token refresh: {}", e);
                anyhow::anyhow!("HTTP request failed: {}", e)
            })?;

        let status = response.status();
        if status.is_success() {
            let body: TokenResponse = response
                .json()
                .await
                .map_err(|e| anyhow::anyhow!("Malformed refresh response: {}", e))?;
            return Ok(Some(body.into_tokens(now())));
        }
        if status.is_client_error() {
            tracing::info!(status = %status, "Refresh token rejected");
            return Ok(None);
        }
        Err(anyhow::anyhow!("Token refresh failed with status {}", status))
    }
}

#[async_trait]
impl AuthProvider for SupabaseAuthClient {
    async fn get_session(&self, tokens: &SessionTokens) -> Result<Option<AuthSession>> {
        match inspect_tokens(tokens, now()) {
            TokenState::Valid(session) => Ok(Some(session)),
            TokenState::Invalid => Ok(None),
            TokenState::Expired => {
                let Some(refresh_token) = tokens.refresh_token.as_deref() else {
                    return Ok(None);
                };
                let Some(fresh) = self.refresh(refresh_token).await? else {
                    return Ok(None);
                };
                match inspect_tokens(&fresh, now()) {
                    TokenState::Valid(mut session) => {
                        session.refreshed = true;
                        Ok(Some(session))
                    }
                    _ => Ok(None),
                }
            }
        }
    }

    async fn get_user(&self, access_token: &str) -> Result<Option<AuthUser>> {
        let response = self
            .conn
            .get("/auth/v1/user")
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to reach auth provider for user lookup: {}", e);
                anyhow::anyhow!("HTTP request failed: {}", e)
            })?;

        match response.status() {
            status if status.is_success() => {
                let user: ProviderUser = response
                    .json()
                    .await
                    .map_err(|e| anyhow::anyhow!("Malformed user response: {}", e))?;
                Ok(Some(user.into()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(None),
            status => Err(anyhow::anyhow!("User lookup failed with status {}", status)),
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<SessionTokens>> {
        let response = self
            .conn
            .post("/auth/v1/token")
            .query(&[("grant_type", "password")])
            .json(&serde_json::json!({
                "email": email,
                "password": password,
            }))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to reach auth provider for sign-in: {}", e);
                anyhow::anyhow!("HTTP request failed: {}", e)
            })?;

        let status = response.status();
        if status.is_success() {
            let body: TokenResponse = response
                .json()
                .await
                .map_err(|e| anyhow::anyhow!("Malformed sign-in response: {}", e))?;
            return Ok(Some(body.into_tokens(now())));
        }
        if status.is_client_error() {
            return Ok(None);
        }
        Err(anyhow::anyhow!("Sign-in failed with status {}", status))
    }

    fn oauth_authorize_url(&self, provider: &str, redirect_to: &str, code_challenge: &str) -> String {
        let query = serde_urlencoded::to_string([
            ("provider", provider),
            ("redirect_to", redirect_to),
            ("code_challenge", code_challenge),
            ("code_challenge_method", "s256"),
        ])
        .unwrap_or_default();
        format!("{}?{}", self.conn.url("/auth/v1/authorize"), query)
    }

    async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> Result<SessionTokens> {
        let response = self
            .conn
            .post("/auth/v1/token")
            .query(&[("grant_type", "pkce")])
            .json(&serde_json::json!({
                "auth_code": auth_code,
                "code_verifier": code_verifier,
            }))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to reach auth provider for code exchange: {}", e);
                anyhow::anyhow!("HTTP request failed: {}", e)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("Code exchange failed with status {}", status));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Malformed code exchange response: {}", e))?;
        Ok(body.into_tokens(now()))
    }

    async fn sign_out(&self, access_token: &str) -> Result<()> {
        let response = self
            .conn
            .post("/auth/v1/logout")
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request failed: {}", e))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            // Already gone on the provider side
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => Ok(()),
            status => Err(anyhow::anyhow!("Sign-out failed with status {}", status)),
        }
    }
}
