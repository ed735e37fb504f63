pub mod auth;
pub mod metrics;
pub mod onboarding;

pub use auth::session_interceptor;
pub use metrics::http_metrics_middleware;
pub use onboarding::onboarding_guard;

use axum::{
    http::Method,
    response::{IntoResponse, Redirect, Response},
};

/// Redirect issued by the gate: 307 for GET and HEAD, 303 for anything else
/// so the browser follows a form submission with a plain GET.
pub fn gate_redirect(method: &Method, target: &str) -> Response {
    if method == Method::GET || method == Method::HEAD {
        Redirect::temporary(target).into_response()
    } else {
        Redirect::to(target).into_response()
    }
}
