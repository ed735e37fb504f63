//! User and organization records in the hosted data store (PostgREST).
//!
//! Every call runs with the signed-in user's access token so row-level
//! security on the backend applies.

use crate::models::{Organization, OrganizationChanges, UserRecord, UserUpdate};
use crate::services::supabase::SupabaseConnection;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `check_if_org_exist_for_user` RPC.
    async fn organization_exists(&self, user_id: &str, access_token: &str) -> Result<bool>;

    async fn get_user(&self, user_id: &str, access_token: &str) -> Result<Option<UserRecord>>;

    async fn upsert_user(&self, update: &UserUpdate, access_token: &str) -> Result<()>;

    /// First organization created by `user_id`.
    async fn organization_for_creator(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> Result<Option<Organization>>;

    async fn update_organization(
        &self,
        org_id: &str,
        changes: &OrganizationChanges,
        access_token: &str,
    ) -> Result<()>;

    async fn insert_organization(
        &self,
        changes: &OrganizationChanges,
        access_token: &str,
    ) -> Result<()>;
}

pub struct SupabaseProfileClient {
    conn: Arc<SupabaseConnection>,
}

impl SupabaseProfileClient {
    pub fn new(conn: Arc<SupabaseConnection>) -> Self {
        Self { conn }
    }
}

async fn ensure_success(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    tracing::error!(status = %status, body = %body, "{} failed", what);
    Err(anyhow::anyhow!("{} failed with status {}", what, status))
}

#[async_trait]
impl ProfileStore for SupabaseProfileClient {
    async fn organization_exists(&self, user_id: &str, access_token: &str) -> Result<bool> {
        let response = self
            .conn
            .post("/rest/v1/rpc/check_if_org_exist_for_user")
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "u_id": user_id }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request failed: {}", e))?;

        let response = ensure_success(response, "Organization existence check").await?;
        // A null result counts as "no organization"
        let exists: Option<bool> = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Malformed RPC response: {}", e))?;
        Ok(exists.unwrap_or(false))
    }

    async fn get_user(&self, user_id: &str, access_token: &str) -> Result<Option<UserRecord>> {
        let id_filter = format!("eq.{}", user_id);
        let response = self
            .conn
            .get("/rest/v1/users")
            .bearer_auth(access_token)
            .query(&[("select", "*"), ("id", id_filter.as_str())])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request failed: {}", e))?;

        let response = ensure_success(response, "User lookup").await?;
        let rows: Vec<UserRecord> = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Malformed users response: {}", e))?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_user(&self, update: &UserUpdate, access_token: &str) -> Result<()> {
        let response = self
            .conn
            .post("/rest/v1/users")
            .bearer_auth(access_token)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(update)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request failed: {}", e))?;

        ensure_success(response, "User upsert").await?;
        Ok(())
    }

    async fn organization_for_creator(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> Result<Option<Organization>> {
        let creator_filter = format!("eq.{}", user_id);
        let response = self
            .conn
            .get("/rest/v1/organizations")
            .bearer_auth(access_token)
            .query(&[
                ("select", "*"),
                ("creator", creator_filter.as_str()),
                ("limit", "1"),
            ])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request failed: {}", e))?;

        let response = ensure_success(response, "Organization lookup").await?;
        let rows: Vec<Organization> = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Malformed organizations response: {}", e))?;
        Ok(rows.into_iter().next())
    }

    async fn update_organization(
        &self,
        org_id: &str,
        changes: &OrganizationChanges,
        access_token: &str,
    ) -> Result<()> {
        let id_filter = format!("eq.{}", org_id);
        let response = self
            .conn
            .patch("/rest/v1/organizations")
            .bearer_auth(access_token)
            .header("Prefer", "return=minimal")
            .query(&[("id", id_filter.as_str())])
            .json(changes)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request failed: {}", e))?;

        ensure_success(response, "Organization update").await?;
        Ok(())
    }

    async fn insert_organization(
        &self,
        changes: &OrganizationChanges,
        access_token: &str,
    ) -> Result<()> {
        let response = self
            .conn
            .post("/rest/v1/organizations")
            .bearer_auth(access_token)
            .header("Prefer", "return=minimal")
            .json(changes)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request failed: {}", e))?;

        ensure_success(response, "Organization insert").await?;
        Ok(())
    }
}
