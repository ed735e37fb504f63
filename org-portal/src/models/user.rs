use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::middleware::gate_redirect;
use crate::models::session::load_tokens;
use crate::AppState;

/// Identity as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl AuthUser {
    pub fn display_name(&self) -> String {
        if let Some(name) = self.full_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        self.email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .filter(|local| !local.is_empty())
            .unwrap_or("User")
            .to_string()
    }

    pub fn initials(&self) -> String {
        let initials: String = self
            .display_name()
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .take(2)
            .collect::<String>()
            .to_uppercase();
        if initials.is_empty() {
            "U".to_string()
        } else {
            initials
        }
    }
}

/// Row of the `users` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub username: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

/// Upsert payload for the `users` table; `avatar_url` is only sent when replaced.
#[derive(Debug, Clone, Serialize)]
pub struct UserUpdate {
    pub id: String,
    pub name: Option<String>,
    pub username: Option<String>,
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Page-level, read-only view of who is signed in.
///
/// Never rejects: no session, an unconfigured provider, or a provider error all
/// produce an anonymous `CurrentUser(None)`. When the dashboard guard already
/// resolved the user for this request, that answer is reused.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Option<AuthUser>);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(CurrentUser(Some(user.clone())));
        }

        let Some(auth) = state.auth.as_ref() else {
            return Ok(CurrentUser(None));
        };
        let Ok(session) = Session::from_request_parts(parts, state).await else {
            return Ok(CurrentUser(None));
        };

        let tokens = match load_tokens(&session).await {
            Ok(Some(tokens)) => tokens,
            Ok(None) => return Ok(CurrentUser(None)),
            Err(e) => {
                tracing::warn!(error = %e, "Session unreadable, rendering anonymous view");
                return Ok(CurrentUser(None));
            }
        };

        match auth.get_user(&tokens.access_token).await {
            Ok(user) => Ok(CurrentUser(user)),
            Err(e) => {
                tracing::warn!(error = %e, "User lookup failed, rendering anonymous view");
                Ok(CurrentUser(None))
            }
        }
    }
}

/// Signed-in user plus the access token needed for row-level-secured data calls.
///
/// Rejects with a redirect to the login page, carrying the requested path,
/// when there is no usable session.
#[derive(Debug, Clone)]
pub struct SignedInUser {
    pub user: AuthUser,
    pub access_token: String,
}

#[async_trait]
impl FromRequestParts<AppState> for SignedInUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let method = parts.method.clone();
        let login_target = state.gate.login_redirect(parts.uri.path());
        let login = || gate_redirect(&method, &login_target);

        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|_| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to extract session",
                )
                    .into_response()
            })?;

        let tokens = load_tokens(&session)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to read session");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            })?
            .ok_or_else(login)?;

        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(SignedInUser {
                user: user.clone(),
                access_token: tokens.access_token,
            });
        }

        let auth = state
            .auth
            .as_ref()
            .ok_or_else(|| StatusCode::SERVICE_UNAVAILABLE.into_response())?;

        match auth.get_user(&tokens.access_token).await {
            Ok(Some(user)) => Ok(SignedInUser {
                user,
                access_token: tokens.access_token,
            }),
            Ok(None) => Err(login()),
            Err(e) => {
                tracing::error!(error = %e, "Failed to resolve signed-in user");
                Err(StatusCode::BAD_GATEWAY.into_response())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: Option<&str>, email: Option<&str>) -> AuthUser {
        AuthUser {
            id: "u1".to_string(),
            email: email.map(str::to_string),
            full_name: name.map(str::to_string),
            avatar_url: None,
        }
    }

    #[test]
    fn display_name_prefers_full_name() {
        assert_eq!(
            user(Some("Ada Lovelace"), Some("ada@example.com")).display_name(),
            "Ada Lovelace"
        );
        assert_eq!(user(None, Some("ada@example.com")).display_name(), "ada");
        assert_eq!(user(Some("  "), None).display_name(), "User");
    }

    #[test]
    fn initials_take_first_two_words() {
        assert_eq!(user(Some("Ada King Lovelace"), None).initials(), "AK");
        assert_eq!(user(None, Some("ada@example.com")).initials(), "A");
    }

    #[test]
    fn user_update_omits_unchanged_avatar() {
        let update = UserUpdate {
            id: "u1".to_string(),
            name: Some("Ada".to_string()),
            username: None,
            bio: None,
            avatar_url: None,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("avatar_url").is_none());
        assert!(json.get("username").unwrap().is_null());
    }
}
