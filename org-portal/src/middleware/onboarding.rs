use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tower_sessions::Session;

use crate::gate::{Decision, OrgStatus};
use crate::middleware::gate_redirect;
use crate::models::session::load_tokens;
use crate::services::metrics::record_gate_decision;
use crate::AppState;

const CHECKPOINT: &str = "guard";

/// Dashboard section guard.
///
/// Re-resolves the user and asks the data store whether they own an
/// organization. A definite "no" redirects to the onboarding page; every other
/// outcome renders the page. The resolved user is left in the request
/// extensions for the page handler.
pub async fn onboarding_guard(
    State(state): State<AppState>,
    session: Session,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    // Without a user there is nothing to check; the interceptor owns sign-in
    let Some(auth) = state.auth.clone() else {
        return next.run(request).await;
    };
    let tokens = match load_tokens(&session).await {
        Ok(Some(tokens)) => tokens,
        Ok(None) => return next.run(request).await,
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "Session store unavailable in dashboard guard");
            return next.run(request).await;
        }
    };
    let user = match auth.get_user(&tokens.access_token).await {
        Ok(Some(user)) => user,
        Ok(None) => return next.run(request).await,
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "User lookup failed in dashboard guard");
            return next.run(request).await;
        }
    };

    let org = check_organization(&state, &user.id, &tokens.access_token).await;
    let decision = state.gate.decide(&path, true, org);
    record_gate_decision(
        CHECKPOINT,
        match (&decision, org) {
            (Decision::Allow, OrgStatus::Unknown) => "fail_open",
            _ => decision.outcome(),
        },
    );

    match decision {
        Decision::Allow => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Decision::RedirectTo(target) => {
            tracing::info!(
                user_id = %user.id,
                path = %path,
                target = %target,
                "No organization yet, redirecting to onboarding"
            );
            gate_redirect(request.method(), &target)
        }
    }
}

/// One existence query, bounded by the configured timeout. Errors and
/// timeouts are logged and reported as [`OrgStatus::Unknown`].
async fn check_organization(state: &AppState, user_id: &str, access_token: &str) -> OrgStatus {
    let Some(profiles) = state.profiles.as_ref() else {
        tracing::error!(user_id = %user_id, "Data store not configured, skipping organization check");
        return OrgStatus::Unknown;
    };

    match tokio::time::timeout(
        state.org_check_timeout,
        profiles.organization_exists(user_id, access_token),
    )
    .await
    {
        Ok(Ok(exists)) => OrgStatus::from(exists),
        Ok(Err(e)) => {
            tracing::error!(user_id = %user_id, error = %e, "Organization check failed, rendering anyway");
            OrgStatus::Unknown
        }
        Err(_) => {
            tracing::error!(
                user_id = %user_id,
                timeout_ms = state.org_check_timeout.as_millis() as u64,
                "Organization check timed out, rendering anyway"
            );
            OrgStatus::Unknown
        }
    }
}
