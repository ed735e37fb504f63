use crate::services::supabase::SupabaseConnection;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Object storage for avatars and organization logos.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn upload(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
        access_token: &str,
    ) -> Result<()>;

    /// Browser URL for a stored object key.
    fn public_url(&self, key: &str) -> String;
}

/// `{folder}/{user_id}_{random}.{ext}`; the extension is taken from the
/// uploaded file name, `bin` when it has none.
pub fn asset_key(folder: &str, user_id: &str, file_name: &str) -> String {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "bin".to_string());
    format!("{}/{}_{}.{}", folder, user_id, rand::random::<u32>(), ext)
}

pub struct SupabaseStorageClient {
    conn: Arc<SupabaseConnection>,
}

impl SupabaseStorageClient {
    pub fn new(conn: Arc<SupabaseConnection>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl AssetStore for SupabaseStorageClient {
    async fn upload(
        &self,
        key: &str,
        content_type: &str,
        bytes: Vec<u8>,
        access_token: &str,
    ) -> Result<()> {
        let path = format!("/storage/v1/object/{}/{}", self.conn.storage_bucket(), key);
        let size = bytes.len();

        let response = self
            .conn
            .post(&path)
            .bearer_auth(access_token)
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to upload {}: {}", key, e);
                anyhow::anyhow!("HTTP request failed: {}", e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(key = %key, status = %status, body = %body, "Upload rejected");
            return Err(anyhow::anyhow!("Upload failed with status {}", status));
        }

        tracing::info!(key = %key, size, "Asset uploaded");
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        self.conn.url(&format!(
            "/storage/v1/object/public/{}/{}",
            self.conn.storage_bucket(),
            key
        ))
    }
}
