use crate::models::session::{load_tokens, store_pkce_verifier, store_tokens, take_pkce_verifier};
use crate::models::SessionTokens;
use crate::utils::{jwt::decode_jwt_claims, pkce};
use crate::AppState;
use askama::Template;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;
use tower_sessions::Session;

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub redirected_from: String,
    pub email: String,
    pub error: Option<String>,
    pub sign_in_available: bool,
}

#[derive(Deserialize)]
pub struct LoginQuery {
    #[serde(rename = "redirectedFrom")]
    pub redirected_from: Option<String>,
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(rename = "redirectedFrom", default)]
    pub redirected_from: Option<String>,
}

#[derive(Deserialize)]
pub struct OAuthCallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

fn login_error_message(code: &str) -> &'static str {
    match code {
        "oauth_failed" => "Google sign-in did not complete. Please try again.",
        "auth_failed" => "We could not verify your sign-in. Please try again.",
        "service_error" => "The sign-in service is unavailable right now.",
        _ => "Something went wrong while signing you in.",
    }
}

pub async fn login_page(State(state): State<AppState>, Query(query): Query<LoginQuery>) -> impl IntoResponse {
    LoginTemplate {
        redirected_from: query.redirected_from.unwrap_or_default(),
        email: String::new(),
        error: query.error.as_deref().map(|c| login_error_message(c).to_string()),
        sign_in_available: state.auth.is_some(),
    }
}

pub async fn login_handler(
    State(state): State<AppState>,
    session: Session,
    Form(payload): Form<LoginRequest>,
) -> Response {
    let page = |status: StatusCode, error: &str| {
        (
            status,
            LoginTemplate {
                redirected_from: payload.redirected_from.clone().unwrap_or_default(),
                email: payload.email.clone(),
                error: Some(error.to_string()),
                sign_in_available: state.auth.is_some(),
            },
        )
            .into_response()
    };

    let Some(auth) = state.auth.clone() else {
        return page(
            StatusCode::SERVICE_UNAVAILABLE,
            "Sign-in is not available right now.",
        );
    };

    match auth
        .sign_in_with_password(payload.email.trim(), &payload.password)
        .await
    {
        Ok(Some(tokens)) => {
            if let Err(resp) = start_session(&session, &tokens).await {
                return resp;
            }
            let target = state.gate.return_path(payload.redirected_from.as_deref());
            Redirect::to(&target).into_response()
        }
        Ok(None) => page(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Invalid email or password",
        ),
        Err(e) => {
            tracing::error!("Password sign-in failed: {}", e);
            page(
                StatusCode::BAD_GATEWAY,
                "Could not reach the sign-in service. Please try again.",
            )
        }
    }
}

/// Persist a fresh token pair and log who signed in.
async fn start_session(session: &Session, tokens: &SessionTokens) -> Result<(), Response> {
    store_tokens(session, tokens).await.map_err(|e| {
        tracing::error!("Failed to store session: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })?;

    match decode_jwt_claims(&tokens.access_token) {
        Ok(claims) => tracing::info!(
            user_id = %claims.sub,
            session_id = claims.session_id.as_deref().unwrap_or("-"),
            "User signed in"
        ),
        Err(e) => tracing::warn!("Signed in with an unreadable access token: {}", e),
    }
    Ok(())
}

/// Starts Google OAuth through the auth provider with a PKCE challenge.
pub async fn google_oauth_redirect(State(state): State<AppState>, session: Session) -> Response {
    let login = state.gate.login_path().to_string();
    let Some(auth) = state.auth.clone() else {
        return Redirect::to(&format!("{}?error=service_error", login)).into_response();
    };

    let verifier = pkce::generate_verifier();
    if let Err(e) = store_pkce_verifier(&session, &verifier).await {
        tracing::error!("Failed to store PKCE verifier: {}", e);
        return Redirect::to(&format!("{}?error=service_error", login)).into_response();
    }

    let callback = format!(
        "{}/auth/callback",
        state.site.public_url.trim_end_matches('/')
    );
    let auth_url = auth.oauth_authorize_url("google", &callback, &pkce::challenge(&verifier));

    tracing::info!("Redirecting to Google OAuth via auth provider");
    Redirect::to(&auth_url).into_response()
}

/// Exchanges the authorization code for a session.
pub async fn oauth_callback(
    State(state): State<AppState>,
    Query(params): Query<OAuthCallbackParams>,
    session: Session,
) -> Response {
    let login_error =
        |code: &str| Redirect::to(&format!("{}?error={}", state.gate.login_path(), code)).into_response();

    if let Some(error) = params.error.as_deref() {
        tracing::warn!(
            error = %error,
            description = params.error_description.as_deref().unwrap_or(""),
            "OAuth provider returned an error"
        );
        return login_error("oauth_failed");
    }

    let Some(auth) = state.auth.clone() else {
        return login_error("service_error");
    };
    let Some(code) = params.code.as_deref().filter(|c| !c.is_empty()) else {
        return login_error("oauth_failed");
    };

    let verifier = match take_pkce_verifier(&session).await {
        Ok(Some(verifier)) => verifier,
        Ok(None) => {
            tracing::warn!("OAuth callback without a pending PKCE verifier");
            return login_error("oauth_failed");
        }
        Err(e) => {
            tracing::error!("Failed to read PKCE verifier: {}", e);
            return login_error("service_error");
        }
    };

    match auth.exchange_code(code, &verifier).await {
        Ok(tokens) => {
            if let Err(resp) = start_session(&session, &tokens).await {
                return resp;
            }
            Redirect::to(&state.gate.return_path(None)).into_response()
        }
        Err(e) => {
            tracing::error!("OAuth code exchange failed: {}", e);
            login_error("auth_failed")
        }
    }
}

pub async fn sign_out_handler(State(state): State<AppState>, session: Session) -> Response {
    if let (Some(auth), Ok(Some(tokens))) = (state.auth.as_ref(), load_tokens(&session).await) {
        // Revocation failure must not keep the user signed in locally
        if let Err(e) = auth.sign_out(&tokens.access_token).await {
            tracing::error!("Failed to revoke token during sign-out: {}", e);
        } else {
            tracing::info!("Token revoked successfully");
        }
    }

    if let Err(e) = session.flush().await {
        tracing::error!("Failed to clear session: {}", e);
    }

    Redirect::to(state.gate.login_path()).into_response()
}
