use serde::{Deserialize, Serialize};
use tower_sessions::Session;

const TOKENS_KEY: &str = "auth_tokens";
const PKCE_VERIFIER_KEY: &str = "pkce_verifier";

/// Token pair issued by the auth provider, kept server-side in the session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds; 0 when the provider did not say.
    #[serde(default)]
    pub expires_at: i64,
}

/// A session the auth provider considers valid right now.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: String,
    pub email: Option<String>,
    pub expires_at: i64,
    pub tokens: SessionTokens,
    /// Set when the provider exchanged the refresh token to produce this session.
    pub refreshed: bool,
}

/// Read the stored tokens. A broken session store reads as an error so
/// callers can decide between failing open and failing closed.
pub async fn load_tokens(session: &Session) -> anyhow::Result<Option<SessionTokens>> {
    session
        .get::<SessionTokens>(TOKENS_KEY)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read session tokens: {}", e))
}

pub async fn store_tokens(session: &Session, tokens: &SessionTokens) -> anyhow::Result<()> {
    // New identity, new session id
    session
        .cycle_id()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to cycle session id: {}", e))?;
    session
        .insert(TOKENS_KEY, tokens)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to store session tokens: {}", e))
}

/// Replace tokens after a transparent refresh without cycling the id.
pub async fn replace_tokens(session: &Session, tokens: &SessionTokens) -> anyhow::Result<()> {
    session
        .insert(TOKENS_KEY, tokens)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to store refreshed tokens: {}", e))
}

pub async fn store_pkce_verifier(session: &Session, verifier: &str) -> anyhow::Result<()> {
    session
        .insert(PKCE_VERIFIER_KEY, verifier)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to store PKCE verifier: {}", e))
}

/// Remove and return the verifier; it is single-use.
pub async fn take_pkce_verifier(session: &Session) -> anyhow::Result<Option<String>> {
    session
        .remove::<String>(PKCE_VERIFIER_KEY)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read PKCE verifier: {}", e))
}
