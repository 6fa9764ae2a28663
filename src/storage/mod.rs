use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{AppConfig, StorageBackend};
use crate::utils::content_type_for;

#[cfg(test)]
pub mod memory;
pub mod oss;
pub mod s3;
pub mod signing;

pub use oss::OssStorage;
pub use s3::S3Storage;

/// A stored object and the public URL it is served from.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

#[derive(Debug, Error)]
#[error("object not found: {0}")]
pub struct ObjectNotFound(pub String);

/// Object storage that accepts public-read uploads.
///
/// Keys are full object keys; callers compose prefixes with [`crate::utils::join_key`].
#[async_trait]
pub trait Storage: Send + Sync {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<StoredObject>;

    /// Fails with [`ObjectNotFound`] when the key does not exist.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    fn url(&self, key: &str) -> String;

    async fn upload_file(&self, local_path: &Path, key: &str) -> Result<StoredObject> {
        let body = tokio::fs::read(local_path)
            .await
            .context(format!("failed to read {:?} for upload", local_path))?;
        let content_type = content_type_for(local_path, &body);
        self.put(key, body, &content_type).await
    }
}

/// Builds the backend selected by `config.storage`.
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config.storage {
        StorageBackend::S3 => {
            if config.s3.bucket.is_empty() {
                bail!("s3.bucket is not configured");
            }
            Arc::new(S3Storage::new(config.s3.clone())?)
        }
        StorageBackend::Oss => {
            if config.oss.bucket.is_empty() || config.oss.endpoint.is_empty() {
                bail!("aliyun-oss.bucket and aliyun-oss.endpoint must be configured");
            }
            Arc::new(OssStorage::new(config.oss.clone())?)
        }
    };
    Ok(storage)
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .build()
        .context("failed to build storage HTTP client")
}

/// Turns a non-success response into an error carrying the service's message.
async fn check_response(
    response: reqwest::Response,
    method: &str,
    key: &str,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::NOT_FOUND && method == "GET" {
        return Err(ObjectNotFound(key.to_string()).into());
    }
    let body = response.text().await.unwrap_or_default();
    bail!("{} {} failed with {}: {}", method, key, status, body.trim())
}
