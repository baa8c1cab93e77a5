use std::path::Path;

use aws_sdk_s3::types::CompletedPart;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tracing::{error, warn};

use super::error::StoreError;
use super::s3::StorageService;

// Minimum part size for S3 is 5MB. We use 6MB to be safe.
pub const MIN_PART_SIZE: usize = 6 * 1024 * 1024;

/// Files at or above this size go through multipart upload.
pub const MULTIPART_THRESHOLD: u64 = 16 * 1024 * 1024;

pub struct MultipartUploader<'a> {
    storage: &'a StorageService,
    key: String,
    upload_id: String,
    parts: Vec<CompletedPart>,
    part_number: i32,
    buffer: Vec<u8>,
}

impl<'a> MultipartUploader<'a> {
    pub async fn new(storage: &'a StorageService, key: String, content_type: &str) -> Result<Self, StoreError> {
        let upload_id = storage.create_multipart_upload(&key, content_type).await?;

        Ok(Self {
            storage,
            key,
            upload_id,
            parts: Vec::new(),
            part_number: 1,
            buffer: Vec::with_capacity(MIN_PART_SIZE),
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StoreError> {
        self.buffer.extend_from_slice(chunk);

        if self.buffer.len() >= MIN_PART_SIZE {
            self.flush_part().await?;
        }

        Ok(())
    }

    async fn flush_part(&mut self) -> Result<(), StoreError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let body = Bytes::from(std::mem::replace(&mut self.buffer, Vec::with_capacity(MIN_PART_SIZE)));

        let part = self
            .storage
            .upload_part(&self.key, &self.upload_id, self.part_number, body)
            .await?;

        self.parts.push(part);
        self.part_number += 1;

        Ok(())
    }

    pub async fn finish(&mut self) -> Result<(), StoreError> {
        // Upload remaining buffer as last part
        if !self.buffer.is_empty() {
            self.flush_part().await?;
        }

        let parts = std::mem::take(&mut self.parts);
        self.storage
            .complete_multipart_upload(&self.key, &self.upload_id, parts)
            .await
    }

    pub async fn abort(&self) -> Result<(), StoreError> {
        self.storage.abort_multipart_upload(&self.key, &self.upload_id).await
    }
}

/// Stream a local file to `key` in parts, aborting the upload on any error.
pub async fn upload_file_multipart(
    storage: &StorageService,
    local_path: &Path,
    key: &str,
    content_type: &str,
) -> Result<(), StoreError> {
    let mut file = tokio::fs::File::open(local_path)
        .await
        .map_err(|e| StoreError::upload(key, format!("cannot open {}: {}", local_path.display(), e)))?;

    let mut uploader = MultipartUploader::new(storage, key.to_string(), content_type).await?;
    let mut chunk = vec![0u8; 1024 * 1024];

    loop {
        let read = match file.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                error!("Read error on {}: {}", local_path.display(), e);
                abort_quietly(&uploader).await;
                return Err(StoreError::upload(key, e));
            }
        };

        if let Err(e) = uploader.write_chunk(&chunk[..read]).await {
            error!("Upload error: {}", e);
            abort_quietly(&uploader).await;
            return Err(e);
        }
    }

    if let Err(e) = uploader.finish().await {
        error!("Completing upload of {} failed: {}", key, e);
        abort_quietly(&uploader).await;
        return Err(e);
    }

    Ok(())
}

async fn abort_quietly(uploader: &MultipartUploader<'_>) {
    if let Err(e) = uploader.abort().await {
        warn!("Failed to abort multipart upload: {}", e);
    }
}
