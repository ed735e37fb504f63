pub mod config;
pub mod gate;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;

use config::{GateSettings, ServerSettings, SiteSettings};
use gate::GatePolicy;
use services::{AssetStore, AuthProvider, ProfileStore};
use std::sync::Arc;
use std::time::Duration;

/// Shared application state: backend collaborators plus gate configuration.
///
/// Collaborators are optional. A deployment without backend configuration
/// still serves pages, and the gate fails open.
#[derive(Clone)]
pub struct AppState {
    pub auth: Option<Arc<dyn AuthProvider>>,
    pub profiles: Option<Arc<dyn ProfileStore>>,
    pub assets: Option<Arc<dyn AssetStore>>,
    pub gate: Arc<GatePolicy>,
    pub org_check_timeout: Duration,
    pub site: Arc<SiteSettings>,
    pub cookie_secure: bool,
    pub session_inactivity_hours: i64,
}

impl AppState {
    pub fn new(gate: &GateSettings, server: &ServerSettings, site: SiteSettings) -> Self {
        Self {
            auth: None,
            profiles: None,
            assets: None,
            gate: Arc::new(GatePolicy::new(gate)),
            org_check_timeout: Duration::from_millis(gate.org_check_timeout_ms),
            site: Arc::new(site),
            cookie_secure: server.cookie_secure,
            session_inactivity_hours: server.session_inactivity_hours,
        }
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileStore>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn with_assets(mut self, assets: Arc<dyn AssetStore>) -> Self {
        self.assets = Some(assets);
        self
    }
}
