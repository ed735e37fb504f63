use secrecy::Secret;
use serde::Deserialize;
use std::collections::HashSet;

use crate::gate::GatePolicy;
use crate::startup::{APP_ROUTES, STATIC_PREFIX};

#[derive(Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    #[serde(default)]
    pub supabase: SupabaseSettings,
    #[serde(default)]
    pub gate: GateSettings,
    pub site: SiteSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

#[derive(Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Mark the session cookie `Secure`; turn on behind HTTPS.
    #[serde(default)]
    pub cookie_secure: bool,
    #[serde(default = "default_session_inactivity_hours")]
    pub session_inactivity_hours: i64,
}

fn default_session_inactivity_hours() -> i64 {
    24
}

/// Hosted backend (auth, PostgREST, storage).
///
/// `url` and `anon_key` are optional: a deployment without them still serves
/// pages, with the gate failing open.
#[derive(Deserialize, Clone, Default)]
pub struct SupabaseSettings {
    pub url: Option<String>,
    pub anon_key: Option<Secret<String>>,
    #[serde(default = "default_storage_bucket")]
    pub storage_bucket: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_storage_bucket() -> String {
    "assets".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Deserialize, Clone, Debug)]
pub struct GateSettings {
    /// Path prefixes the session interceptor guards.
    #[serde(default = "default_protected_prefixes")]
    pub protected_prefixes: Vec<String>,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Canonical page where a user without an organization finishes setup.
    #[serde(default = "default_onboarding_path")]
    pub onboarding_path: String,
    /// Older onboarding locations; they redirect permanently to `onboarding_path`.
    #[serde(default = "default_legacy_onboarding_paths")]
    pub legacy_onboarding_paths: Vec<String>,
    #[serde(default = "default_org_check_timeout_ms")]
    pub org_check_timeout_ms: u64,
    /// Where a successful sign-in lands when no safe `redirectedFrom` was given.
    #[serde(default = "default_after_login_path")]
    pub after_login_path: String,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            protected_prefixes: default_protected_prefixes(),
            login_path: default_login_path(),
            onboarding_path: default_onboarding_path(),
            legacy_onboarding_paths: default_legacy_onboarding_paths(),
            org_check_timeout_ms: default_org_check_timeout_ms(),
            after_login_path: default_after_login_path(),
        }
    }
}

impl GateSettings {
    /// Reject gate settings that would make the router panic on startup or
    /// send a request to the login page back to itself.
    pub fn check(&self) -> Result<(), config::ConfigError> {
        let invalid = |message: String| Err(config::ConfigError::Message(format!("gate: {}", message)));

        let named = [
            ("login_path", &self.login_path),
            ("onboarding_path", &self.onboarding_path),
            ("after_login_path", &self.after_login_path),
        ];
        for (name, path) in named {
            if !is_local_path(path) {
                return invalid(format!("{} must start with '/', got {:?}", name, path));
            }
        }
        for prefix in &self.protected_prefixes {
            if !is_local_path(prefix) {
                return invalid(format!("protected prefix must start with '/', got {:?}", prefix));
            }
        }
        for alias in &self.legacy_onboarding_paths {
            if !is_local_path(alias) {
                return invalid(format!("legacy onboarding path must start with '/', got {:?}", alias));
            }
        }

        let policy = GatePolicy::new(self);
        if policy.is_protected(policy.login_path()) {
            return invalid(format!(
                "login path {} is covered by a protected prefix",
                policy.login_path()
            ));
        }

        let mut seen = HashSet::new();
        for alias in policy.legacy_onboarding_paths() {
            if alias == policy.onboarding_path() {
                return invalid(format!("legacy onboarding path {} is the onboarding path", alias));
            }
            if APP_ROUTES.contains(&alias.as_str())
                || alias == STATIC_PREFIX
                || alias.starts_with(&format!("{}/", STATIC_PREFIX))
            {
                return invalid(format!("legacy onboarding path {} collides with a built-in route", alias));
            }
            if alias.contains([':', '*', '{', '}']) {
                return invalid(format!("legacy onboarding path {} must be a literal path", alias));
            }
            if !seen.insert(alias.as_str()) {
                return invalid(format!("legacy onboarding path {} is listed twice", alias));
            }
        }

        Ok(())
    }
}

fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//")
}

fn default_protected_prefixes() -> Vec<String> {
    ["/about", "/dashboard", "/account", "/ship"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_onboarding_path() -> String {
    "/dashboard/settings".to_string()
}

fn default_legacy_onboarding_paths() -> Vec<String> {
    vec!["/account".to_string(), "/account/settings".to_string()]
}

fn default_org_check_timeout_ms() -> u64 {
    3_000
}

fn default_after_login_path() -> String {
    "/dashboard".to_string()
}

#[derive(Deserialize, Clone)]
pub struct SiteSettings {
    /// Browser-facing origin, used to build the OAuth callback URL.
    pub public_url: String,
}

#[derive(Deserialize, Clone)]
pub struct TelemetrySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("Cannot read current dir: {}", e)))?;

    // Run from the workspace root or from inside org-portal
    let configuration_directory = if base_path.ends_with("org-portal") {
        base_path.join("config")
    } else {
        base_path.join("org-portal").join("config")
    };

    let settings = config::Config::builder()
        .add_source(config::File::from(configuration_directory.join("base.yaml")).required(true))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("gate.protected_prefixes")
                .with_list_parse_key("gate.legacy_onboarding_paths")
                .try_parsing(true),
        )
        .build()?;

    let settings = settings.try_deserialize::<Settings>()?;
    settings.gate.check()?;
    Ok(settings)
}
