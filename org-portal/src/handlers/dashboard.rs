use askama::Template;
use axum::response::IntoResponse;

use crate::models::{AuthUser, CurrentUser};

#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardTemplate {
    pub user: Option<AuthUser>,
    pub current_page: &'static str,
}

pub async fn dashboard_handler(CurrentUser(user): CurrentUser) -> impl IntoResponse {
    DashboardTemplate {
        user,
        current_page: "dashboard",
    }
}
