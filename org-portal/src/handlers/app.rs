use askama::Template;
use axum::response::IntoResponse;

use crate::models::{AuthUser, CurrentUser};

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub user: Option<AuthUser>,
}

#[derive(Template)]
#[template(path = "about.html")]
pub struct AboutTemplate {
    pub user: Option<AuthUser>,
}

/// Public landing page; anonymous visitors get the sign-up steps.
pub async fn index(CurrentUser(user): CurrentUser) -> impl IntoResponse {
    IndexTemplate { user }
}

pub async fn about(CurrentUser(user): CurrentUser) -> impl IntoResponse {
    AboutTemplate { user }
}

pub async fn health_check() -> &'static str {
    "OK"
}
