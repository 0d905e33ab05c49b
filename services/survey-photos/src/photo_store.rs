//! Idempotent photo persistence.
//!
//! The existence check on the destination key is the idempotency gate: a photo
//! already stored is never fetched again. Two concurrent invocations may both
//! pass the check and both write; the bytes come from the same upstream photo,
//! so the last write wins with identical content.

use crate::config::{PhotoEncoding, StorageConfig};
use crate::extractor::AttachmentId;
use crate::object_store::{ObjectStore, StoreError};
use crate::photo_fetcher::{FetchError, FetchedPhoto, PhotoFetcher};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument};

/// Failure to store a single photo
#[derive(Debug, Error)]
pub enum PhotoError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// What happened to a single photo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoOutcome {
    /// Fetched from the media service and written
    Stored,
    /// Already present at its key, nothing fetched
    AlreadyPresent,
}

/// A photo that could not be stored
#[derive(Debug)]
pub struct PhotoFailure {
    pub attachment_id: AttachmentId,
    pub key: String,
    pub error: PhotoError,
}

/// Result of storing the photos of one registration
#[derive(Debug, Default)]
pub struct BatchReport {
    pub stored: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<PhotoFailure>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Destination key of a photo: `{root}/{survey}/{registration}/{attachment}`
pub fn photo_key(
    photo_path_root: &str,
    survey_form_id: &str,
    registration_id: &str,
    attachment_id: &str,
) -> String {
    format!(
        "{}/{}/{}/{}",
        photo_path_root.trim_end_matches('/'),
        survey_form_id,
        registration_id,
        attachment_id
    )
}

/// Writes fetched photos to the destination bucket, skipping existing ones
pub struct PhotoStore {
    store: Arc<dyn ObjectStore>,
    fetcher: Arc<PhotoFetcher>,
    bucket: String,
    photo_path_root: String,
    encoding: PhotoEncoding,
}

impl PhotoStore {
    pub fn new(config: &StorageConfig, store: Arc<dyn ObjectStore>, fetcher: Arc<PhotoFetcher>) -> Self {
        Self {
            store,
            fetcher,
            bucket: config.bucket.clone(),
            photo_path_root: config.photo_path_root.clone(),
            encoding: config.photo_encoding,
        }
    }

    /// Make sure every photo of a registration is stored.
    ///
    /// A failed photo is recorded in the report and the remaining photos are
    /// still processed.
    #[instrument(skip(self, attachment_ids), fields(attachments = attachment_ids.len()))]
    pub async fn ensure_stored(
        &self,
        survey_form_id: &str,
        registration_id: &str,
        attachment_ids: &[AttachmentId],
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for attachment_id in attachment_ids {
            let key = photo_key(
                &self.photo_path_root,
                survey_form_id,
                registration_id,
                attachment_id,
            );

            match self.ensure_photo(&key, attachment_id).await {
                Ok(PhotoOutcome::Stored) => {
                    metrics::counter!("survey_photos.photos.stored").increment(1);
                    report.stored.push(key);
                }
                Ok(PhotoOutcome::AlreadyPresent) => {
                    info!(key = %key, "Photo already stored, skip");
                    metrics::counter!("survey_photos.photos.skipped").increment(1);
                    report.skipped.push(key);
                }
                Err(e) => {
                    error!(
                        survey_id = %survey_form_id,
                        registration_id = %registration_id,
                        attachment_id = %attachment_id,
                        key = %key,
                        error = %e,
                        "Failed to store photo"
                    );
                    metrics::counter!("survey_photos.photos.failed").increment(1);
                    report.failed.push(PhotoFailure {
                        attachment_id: attachment_id.clone(),
                        key,
                        error: e,
                    });
                }
            }
        }

        report
    }

    /// Fetch and write one photo unless its key already exists
    async fn ensure_photo(&self, key: &str, attachment_id: &str) -> Result<PhotoOutcome, PhotoError> {
        if self.store.exists(&self.bucket, key).await? {
            return Ok(PhotoOutcome::AlreadyPresent);
        }

        info!(attachment_id = %attachment_id, "Downloading photo");
        let photo = self.fetcher.fetch(attachment_id).await?;
        let (body, content_type) = self.encode(photo);

        self.store
            .put_object(&self.bucket, key, body, &content_type)
            .await?;

        info!(key = %key, content_type = %content_type, "Photo stored");
        Ok(PhotoOutcome::Stored)
    }

    fn encode(&self, photo: FetchedPhoto) -> (Vec<u8>, String) {
        match self.encoding {
            PhotoEncoding::Raw => (photo.bytes, photo.content_type),
            PhotoEncoding::Base64Text => (
                STANDARD.encode(&photo.bytes).into_bytes(),
                "text/plain".to_string(),
            ),
        }
    }
}
