pub mod error;
pub mod multipart;
pub mod s3;

use std::path::Path;

use async_trait::async_trait;
use tracing::info;
use url::Url;

pub use error::StoreError;

pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// S3-style object storage as the pipeline sees it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object into `local_path`, creating parent directories.
    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StoreError>;

    /// Put one object and return its public URL.
    async fn upload(&self, local_path: &Path, key: &str, content_type: &str) -> Result<String, StoreError>;

    /// Every key under `prefix`, however many listing pages that takes.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn delete_batch(&self, keys: &[String]) -> Result<(), StoreError>;

    fn public_url(&self, key: &str) -> String;
}

pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("m3u8") => PLAYLIST_CONTENT_TYPE,
        Some("ts") => SEGMENT_CONTENT_TYPE,
        _ => DEFAULT_CONTENT_TYPE,
    }
}

pub fn public_url_for(base: &Url, key: &str) -> String {
    format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}

/// Remove everything under `prefix`. Returns how many objects were deleted.
pub async fn purge_prefix(store: &dyn ObjectStore, prefix: &str) -> Result<usize, StoreError> {
    let keys = store.list_by_prefix(prefix).await?;
    if keys.is_empty() {
        return Ok(0);
    }

    store.delete_batch(&keys).await?;
    info!(prefix = %prefix, deleted = keys.len(), "Purged previous output");
    Ok(keys.len())
}
