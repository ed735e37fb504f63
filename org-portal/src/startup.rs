use axum::{
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::middleware::{request_id_middleware, security_headers_middleware};
use std::sync::Arc;
use time::Duration;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use crate::config::Settings;
use crate::handlers::{
    app::{about, health_check, index},
    auth::{google_oauth_redirect, login_handler, login_page, oauth_callback, sign_out_handler},
    dashboard::dashboard_handler,
    settings::{
        legacy_onboarding_redirect, settings_handler, settings_page, user_profile_handler,
        user_profile_page,
    },
};
use crate::middleware::{http_metrics_middleware, onboarding_guard, session_interceptor};
use crate::services::{
    SupabaseAuthClient, SupabaseConnection, SupabaseProfileClient, SupabaseStorageClient,
};
use crate::AppState;

/// Routes the router registers itself; a legacy onboarding alias may not reuse one.
pub const APP_ROUTES: &[&str] = &[
    "/",
    "/health",
    "/metrics",
    "/about",
    "/login",
    "/auth/google",
    "/auth/callback",
    "/auth/sign-out",
    "/dashboard",
    "/dashboard/settings",
    "/dashboard/user-profile",
];

pub const STATIC_PREFIX: &str = "/static";

/// Avatars and logos are small images; leave headroom for the text fields.
const UPLOAD_BODY_LIMIT: usize = 5 * 1024 * 1024;

/// Wire the backend clients from configuration.
///
/// Missing or invalid backend settings leave the collaborators unset; the
/// portal still starts and the gate fails open.
pub fn build_state(settings: &Settings) -> AppState {
    let state = AppState::new(&settings.gate, &settings.server, settings.site.clone());

    match SupabaseConnection::new(&settings.supabase) {
        Ok(conn) => {
            let conn = Arc::new(conn);
            tracing::info!(url = %conn.base_url(), "Hosted backend configured");
            state
                .with_auth(Arc::new(SupabaseAuthClient::new(conn.clone())))
                .with_profiles(Arc::new(SupabaseProfileClient::new(conn.clone())))
                .with_assets(Arc::new(SupabaseStorageClient::new(conn)))
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Hosted backend not configured, sign-in is disabled and the gate fails open"
            );
            state
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    // Session setup
    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(state.cookie_secure)
        .with_expiry(Expiry::OnInactivity(Duration::hours(
            state.session_inactivity_hours,
        )));

    // Every dashboard page runs behind the organization check
    let dashboard = Router::new()
        .route("/dashboard", get(dashboard_handler))
        .route(
            "/dashboard/settings",
            get(settings_page).post(settings_handler),
        )
        .route(
            "/dashboard/user-profile",
            get(user_profile_page).post(user_profile_handler),
        )
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
        .route_layer(from_fn_with_state(state.clone(), onboarding_guard));

    let mut router = Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/metrics", get(crate::handlers::metrics::metrics))
        .route("/about", get(about))
        .route("/login", get(login_page).post(login_handler))
        .route("/auth/google", get(google_oauth_redirect))
        .route("/auth/callback", get(oauth_callback))
        .route("/auth/sign-out", post(sign_out_handler));

    for legacy in state.gate.legacy_onboarding_paths() {
        router = router.route(legacy, get(legacy_onboarding_redirect));
    }

    router
        .merge(dashboard)
        .nest_service(STATIC_PREFIX, ServeDir::new("org-portal/static"))
        .layer(from_fn_with_state(state.clone(), session_interceptor))
        .layer(session_layer)
        .layer(from_fn(http_metrics_middleware))
        .layer(from_fn(security_headers_middleware))
        // Add tracing layer
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
