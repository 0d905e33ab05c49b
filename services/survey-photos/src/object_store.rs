use crate::config::StorageConfig;
use async_trait::async_trait;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_types::SdkConfig;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors returned by an object store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Failed to {operation} {bucket}/{key}: {message}")]
    Request {
        operation: &'static str,
        bucket: String,
        key: String,
        message: String,
    },
}

impl StoreError {
    fn request(operation: &'static str, bucket: &str, key: &str, message: impl ToString) -> Self {
        StoreError::Request {
            operation,
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

/// Minimal blob store surface used by the ingest pipeline.
///
/// `list_objects` returns keys in lexicographic order; previous-export
/// selection depends on it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError>;

    /// Single-request write; readers never observe a partial object
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError>;

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// S3 (or S3-compatible) implementation of [`ObjectStore`]
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Build a client from shared AWS configuration plus storage overrides
    pub fn new(sdk_config: &SdkConfig, config: &StorageConfig) -> Self {
        let mut s3_config_builder = S3ConfigBuilder::from(sdk_config);

        // Custom endpoint for MinIO/LocalStack/GCS interop
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint_url,
            "S3 object store initialized"
        );

        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let response = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    return Err(StoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    });
                }
                return Err(StoreError::request("get", bucket, key, DisplayErrorContext(&e)));
            }
        };

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::request("read body of", bucket, key, e))?;

        let bytes = body.into_bytes().to_vec();
        debug!(size_bytes = bytes.len(), "Object downloaded");
        Ok(bytes)
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(StoreError::request("check", bucket, key, DisplayErrorContext(&e)))
                }
            }
        }
    }

    #[instrument(skip(self, body), fields(size_bytes = body.len()))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StoreError::request("put", bucket, key, DisplayErrorContext(&e)))?;

        debug!("Object uploaded");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| StoreError::request("list", bucket, prefix, DisplayErrorContext(&e)))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(String::from)),
            );

            match response.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        // S3 already lists in UTF-8 binary order; other backends may not.
        keys.sort();
        debug!(count = keys.len(), "Listed objects");
        Ok(keys)
    }
}
