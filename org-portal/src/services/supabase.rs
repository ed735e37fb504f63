//! Shared HTTP plumbing for the hosted backend (auth, PostgREST, storage).

use crate::config::SupabaseSettings;
use anyhow::Result;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, Secret};
use service_core::observability::{TracedClientExt, TracedRequest};
use std::time::Duration;

pub struct SupabaseConnection {
    client: Client,
    base_url: String,
    anon_key: Secret<String>,
    storage_bucket: String,
}

impl SupabaseConnection {
    /// Fails when the url or anon key is missing or malformed. Callers treat
    /// that as "collaborator unavailable" rather than a startup error.
    pub fn new(settings: &SupabaseSettings) -> Result<Self> {
        let base_url = settings
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| anyhow::anyhow!("supabase.url is not configured"))?;

        let parsed = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("supabase.url '{}' is invalid: {}", base_url, e))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(anyhow::anyhow!(
                "supabase.url must be http(s), got '{}'",
                parsed.scheme()
            ));
        }

        let anon_key = settings
            .anon_key
            .as_ref()
            .filter(|k| !k.expose_secret().trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("supabase.anon_key is not configured"))?
            .clone();

        let client = Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
            storage_bucket: settings.storage_bucket.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn storage_bucket(&self) -> &str {
        &self.storage_bucket
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn get(&self, path: &str) -> TracedRequest {
        self.with_api_key(self.client.traced_get(&self.url(path)))
    }

    pub fn post(&self, path: &str) -> TracedRequest {
        self.with_api_key(self.client.traced_post(&self.url(path)))
    }

    pub fn patch(&self, path: &str) -> TracedRequest {
        self.with_api_key(self.client.traced_patch(&self.url(path)))
    }

    fn with_api_key(&self, request: TracedRequest) -> TracedRequest {
        request.header("apikey", self.anon_key.expose_secret())
    }
}
