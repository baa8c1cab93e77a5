use std::future::Future;
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, Delete, Error as S3KeyError, ObjectIdentifier,
};
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use super::error::StoreError;
use super::multipart::{upload_file_multipart, MULTIPART_THRESHOLD};
use super::{public_url_for, ObjectStore};

// DeleteObjects accepts at most this many keys per request.
const DELETE_BATCH_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct StorageService {
    pub client: Client,
    pub bucket: String,
    public_base_url: Url,
}

impl StorageService {
    pub fn new(
        endpoint: &str,
        region: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
        public_base_url: Url,
    ) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO
            .build();

        let client = Client::from_conf(config);

        info!("✅ S3 client ready for bucket {}", bucket);

        Self {
            client,
            bucket: bucket.to_string(),
            public_base_url,
        }
    }

    pub async fn create_multipart_upload(&self, key: &str, content_type: &str) -> Result<String, StoreError> {
        let result = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StoreError::upload(key, DisplayErrorContext(e)))?;

        result
            .upload_id
            .ok_or_else(|| StoreError::upload(key, "no upload id returned"))
    }

    pub async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: bytes::Bytes,
    ) -> Result<CompletedPart, StoreError> {
        let result = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StoreError::upload(key, DisplayErrorContext(e)))?;

        let e_tag = result
            .e_tag
            .ok_or_else(|| StoreError::upload(key, format!("part {} returned no ETag", part_number)))?;

        Ok(CompletedPart::builder()
            .e_tag(e_tag)
            .part_number(part_number)
            .build())
    }

    pub async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), StoreError> {
        let completed_multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_multipart_upload)
            .send()
            .await
            .map_err(|e| StoreError::upload(key, DisplayErrorContext(e)))?;

        Ok(())
    }

    pub async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), StoreError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| StoreError::upload(key, DisplayErrorContext(e)))?;

        Ok(())
    }

    async fn put_file(&self, local_path: &Path, key: &str, content_type: &str) -> Result<(), StoreError> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StoreError::upload(key, e))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StoreError::upload(key, DisplayErrorContext(e)))?;

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for StorageService {
    async fn download(&self, key: &str, local_path: &Path) -> Result<(), StoreError> {
        debug!("Downloading {} to {}", key, local_path.display());

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StoreError::download(key, DisplayErrorContext(e)))?;

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::download(key, format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| StoreError::download(key, format!("cannot create {}: {}", local_path.display(), e)))?;

        let mut reader = resp.body.into_async_read();
        let bytes = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| StoreError::download(key, e))?;
        file.flush().await.map_err(|e| StoreError::download(key, e))?;

        info!("⬇️ Downloaded {} ({} bytes)", key, bytes);
        Ok(())
    }

    async fn upload(&self, local_path: &Path, key: &str, content_type: &str) -> Result<String, StoreError> {
        let size = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| StoreError::upload(key, format!("cannot stat {}: {}", local_path.display(), e)))?
            .len();

        if size >= MULTIPART_THRESHOLD {
            upload_file_multipart(self, local_path, key, content_type).await?;
        } else {
            self.put_file(local_path, key, content_type).await?;
        }

        debug!("Uploaded {} ({} bytes)", key, size);
        Ok(self.public_url(key))
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        collect_listing(prefix, |token| {
            let request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token);

            async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| StoreError::list(prefix, DisplayErrorContext(e)))?;

                Ok::<_, StoreError>(ListingPage {
                    keys: response
                        .contents()
                        .iter()
                        .filter_map(|o| o.key().map(str::to_string))
                        .collect(),
                    is_truncated: response.is_truncated(),
                    next_token: response.next_continuation_token().map(str::to_string),
                })
            }
        })
        .await
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<(), StoreError> {
        for (first_key, delete) in delete_requests(keys)? {
            let response = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| StoreError::delete(first_key, DisplayErrorContext(e)))?;

            check_delete_errors(response.errors())?;
        }

        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        public_url_for(&self.public_base_url, key)
    }
}

/// One page of a `ListObjectsV2` response.
struct ListingPage {
    keys: Vec<String>,
    is_truncated: Option<bool>,
    next_token: Option<String>,
}

/// Follow continuation tokens until a page reports it is not truncated.
async fn collect_listing<F, Fut>(prefix: &str, mut fetch_page: F) -> Result<Vec<String>, StoreError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<ListingPage, StoreError>>,
{
    let mut keys = Vec::new();
    let mut token = None;

    loop {
        let page = fetch_page(token.take()).await?;
        keys.extend(page.keys);

        if page.is_truncated != Some(true) {
            return Ok(keys);
        }
        match page.next_token {
            Some(next) => token = Some(next),
            None => return Err(StoreError::list(prefix, "truncated listing without continuation token")),
        }
    }
}

/// `DeleteObjects` bodies of at most [`DELETE_BATCH_LIMIT`] keys, each with
/// its first key for error reporting.
fn delete_requests(keys: &[String]) -> Result<Vec<(&str, Delete)>, StoreError> {
    keys.chunks(DELETE_BATCH_LIMIT)
        .map(|chunk| {
            let first_key = chunk[0].as_str();
            let objects = chunk
                .iter()
                .map(|k| {
                    ObjectIdentifier::builder()
                        .key(k)
                        .build()
                        .map_err(|e| StoreError::delete(k.as_str(), e))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| StoreError::delete(first_key, e))?;

            Ok((first_key, delete))
        })
        .collect()
}

/// Quiet mode still reports per-key failures.
fn check_delete_errors(errors: &[S3KeyError]) -> Result<(), StoreError> {
    match errors.first() {
        Some(failed) => Err(StoreError::delete(
            failed.key().unwrap_or_default(),
            failed.message().or(failed.code()).unwrap_or("unknown error"),
        )),
        None => Ok(()),
    }
}
