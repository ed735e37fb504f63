//! Redirect policy shared by the session interceptor and the dashboard guard.
//!
//! Every gated request ends in exactly one of three places: the login page
//! (no session), the onboarding page (session but no organization), or the
//! page that was asked for. Both checkpoints call [`GatePolicy::decide`] so the
//! rules live in one place.

use crate::config::GateSettings;

/// Answer of the organization-existence check for the current user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrgStatus {
    Exists,
    Missing,
    /// Not asked, failed, or timed out. Never blocks a request.
    Unknown,
}

impl From<bool> for OrgStatus {
    fn from(exists: bool) -> Self {
        if exists {
            OrgStatus::Exists
        } else {
            OrgStatus::Missing
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RedirectTo(String),
}

impl Decision {
    /// Metric label.
    pub fn outcome(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::RedirectTo(_) => "redirect",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatePolicy {
    protected_prefixes: Vec<String>,
    login_path: String,
    onboarding_path: String,
    legacy_onboarding_paths: Vec<String>,
    after_login_path: String,
}

impl GatePolicy {
    pub fn new(settings: &GateSettings) -> Self {
        Self {
            protected_prefixes: settings
                .protected_prefixes
                .iter()
                .map(|p| normalize(p))
                .collect(),
            login_path: normalize(&settings.login_path),
            onboarding_path: normalize(&settings.onboarding_path),
            legacy_onboarding_paths: settings
                .legacy_onboarding_paths
                .iter()
                .map(|p| normalize(p))
                .collect(),
            after_login_path: normalize(&settings.after_login_path),
        }
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub fn onboarding_path(&self) -> &str {
        &self.onboarding_path
    }

    pub fn legacy_onboarding_paths(&self) -> &[String] {
        &self.legacy_onboarding_paths
    }

    /// Whether the session interceptor runs for `path`.
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected_prefixes
            .iter()
            .any(|prefix| matches_prefix(path, prefix))
    }

    /// The onboarding page and its legacy aliases.
    pub fn is_onboarding(&self, path: &str) -> bool {
        let path = normalize(path);
        path == self.onboarding_path || self.legacy_onboarding_paths.iter().any(|p| *p == path)
    }

    /// Login URL carrying `requested_path` for the post-login return.
    pub fn login_redirect(&self, requested_path: &str) -> String {
        let query = serde_urlencoded::to_string([("redirectedFrom", requested_path)])
            .unwrap_or_default();
        format!("{}?{}", self.login_path, query)
    }

    /// The gate decision for one request.
    ///
    /// `has_session == false` always sends the visitor to login. With a session,
    /// only a definite [`OrgStatus::Missing`] redirects, and never when the
    /// request is already for the onboarding page.
    pub fn decide(&self, requested_path: &str, has_session: bool, org: OrgStatus) -> Decision {
        if !has_session {
            return Decision::RedirectTo(self.login_redirect(requested_path));
        }

        match org {
            OrgStatus::Missing if !self.is_onboarding(requested_path) => {
                Decision::RedirectTo(self.onboarding_path.clone())
            }
            _ => Decision::Allow,
        }
    }

    /// Where to send a freshly signed-in user.
    ///
    /// Only same-origin absolute paths are honoured; anything else (external
    /// URLs, protocol-relative `//host`, the login page itself) falls back to
    /// the configured landing path.
    pub fn return_path(&self, redirected_from: Option<&str>) -> String {
        match redirected_from {
            Some(candidate)
                if candidate.starts_with('/')
                    && !candidate.starts_with("//")
                    && !candidate.contains('\\')
                    && normalize(candidate) != self.login_path =>
            {
                candidate.to_string()
            }
            _ => self.after_login_path.clone(),
        }
    }
}

pub(crate) fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Segment-aware prefix match: `/about` covers `/about` and `/about/team`,
/// not `/aboutus`.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> GatePolicy {
        GatePolicy::new(&GateSettings::default())
    }

    #[test]
    fn prefixes_match_on_segment_boundaries() {
        let gate = policy();
        assert!(gate.is_protected("/dashboard"));
        assert!(gate.is_protected("/dashboard/settings"));
        assert!(gate.is_protected("/about"));
        assert!(gate.is_protected("/ship/orders/7"));
        assert!(gate.is_protected("/account"));

        assert!(!gate.is_protected("/"));
        assert!(!gate.is_protected("/login"));
        assert!(!gate.is_protected("/aboutus"));
        assert!(!gate.is_protected("/dashboards"));
    }

    #[test]
    fn trailing_slashes_in_config_are_ignored() {
        let settings = GateSettings {
            protected_prefixes: vec!["/dashboard/".to_string()],
            onboarding_path: "/dashboard/settings/".to_string(),
            ..GateSettings::default()
        };
        let gate = GatePolicy::new(&settings);

        assert!(gate.is_protected("/dashboard/x"));
        assert_eq!(gate.onboarding_path(), "/dashboard/settings");
        assert!(gate.is_onboarding("/dashboard/settings/"));
    }

    #[test]
    fn no_session_redirects_to_login_with_encoded_origin() {
        let decision = policy().decide("/dashboard/settings", false, OrgStatus::Unknown);
        assert_eq!(
            decision,
            Decision::RedirectTo("/login?redirectedFrom=%2Fdashboard%2Fsettings".to_string())
        );
    }

    #[test]
    fn no_session_wins_over_any_org_state() {
        let gate = policy();
        for org in [OrgStatus::Exists, OrgStatus::Missing, OrgStatus::Unknown] {
            assert!(matches!(
                gate.decide("/dashboard", false, org),
                Decision::RedirectTo(target) if target.starts_with("/login?")
            ));
        }
    }

    #[test]
    fn missing_org_redirects_to_onboarding() {
        assert_eq!(
            policy().decide("/dashboard", true, OrgStatus::Missing),
            Decision::RedirectTo("/dashboard/settings".to_string())
        );
    }

    #[test]
    fn existing_or_unknown_org_is_allowed() {
        let gate = policy();
        assert_eq!(gate.decide("/dashboard", true, OrgStatus::Exists), Decision::Allow);
        assert_eq!(gate.decide("/dashboard", true, OrgStatus::Unknown), Decision::Allow);
    }

    #[test]
    fn onboarding_page_never_redirects_to_itself() {
        let gate = policy();
        assert_eq!(
            gate.decide("/dashboard/settings", true, OrgStatus::Missing),
            Decision::Allow
        );
        assert_eq!(
            gate.decide("/account/settings", true, OrgStatus::Missing),
            Decision::Allow
        );
    }

    #[test]
    fn decisions_are_repeatable() {
        let gate = policy();
        let first = gate.decide("/dashboard/user-profile", true, OrgStatus::Missing);
        for _ in 0..5 {
            assert_eq!(
                gate.decide("/dashboard/user-profile", true, OrgStatus::Missing),
                first
            );
        }
    }

    #[test]
    fn return_path_rejects_foreign_targets() {
        let gate = policy();
        assert_eq!(gate.return_path(Some("/dashboard/settings")), "/dashboard/settings");
        assert_eq!(gate.return_path(Some("https://evil.example")), "/dashboard");
        assert_eq!(gate.return_path(Some("//evil.example")), "/dashboard");
        assert_eq!(gate.return_path(Some("/\\evil.example")), "/dashboard");
        assert_eq!(gate.return_path(Some("/login")), "/dashboard");
        assert_eq!(gate.return_path(None), "/dashboard");
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(Decision::Allow.outcome(), "allow");
        assert_eq!(Decision::RedirectTo("/x".into()).outcome(), "redirect");
    }
}
