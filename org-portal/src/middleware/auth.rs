use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tower_sessions::Session;

use crate::gate::{Decision, OrgStatus};
use crate::middleware::gate_redirect;
use crate::models::session::{load_tokens, replace_tokens};
use crate::services::metrics::record_gate_decision;
use crate::AppState;

const CHECKPOINT: &str = "interceptor";

/// Session interceptor for the protected path prefixes.
///
/// No session: redirect to the login page with the requested path
/// in `redirectedFrom`. Session present: pass through. An unconfigured
/// provider, an unreadable session store, or a provider error all pass the
/// request through untouched.
pub async fn session_interceptor(
    State(state): State<AppState>,
    session: Session,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !state.gate.is_protected(&path) {
        return next.run(request).await;
    }

    let Some(auth) = state.auth.clone() else {
        tracing::warn!(path = %path, "Auth provider not configured, letting request through");
        record_gate_decision(CHECKPOINT, "fail_open");
        return next.run(request).await;
    };

    let tokens = match load_tokens(&session).await {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "Session store unavailable, letting request through");
            record_gate_decision(CHECKPOINT, "fail_open");
            return next.run(request).await;
        }
    };

    let has_session = match tokens {
        None => false,
        Some(tokens) => match auth.get_session(&tokens).await {
            Ok(Some(current)) => {
                if current.refreshed {
                    if let Err(e) = replace_tokens(&session, &current.tokens).await {
                        tracing::warn!(error = %e, "Failed to persist refreshed tokens");
                    }
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Session fetch failed, letting request through");
                record_gate_decision(CHECKPOINT, "fail_open");
                return next.run(request).await;
            }
        },
    };

    let decision = state.gate.decide(&path, has_session, OrgStatus::Unknown);
    record_gate_decision(CHECKPOINT, decision.outcome());

    match decision {
        Decision::Allow => next.run(request).await,
        Decision::RedirectTo(target) => {
            tracing::info!(path = %path, target = %target, "No session, redirecting to login");
            gate_redirect(request.method(), &target)
        }
    }
}
