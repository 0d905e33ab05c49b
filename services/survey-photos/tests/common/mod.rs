//! In-memory stand-ins for the external services.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use survey_photos::config::{MediaConfig, PhotoEncoding, StorageConfig};
use survey_photos::photo_fetcher::MediaResponse;
use survey_photos::{
    FetchError, IngestOrchestrator, MediaTransport, ObjectStore, PhotoFetcher, PhotoStore,
    StaticSecretProvider, StoreError,
};
use url::Url;

pub const RAW_BUCKET: &str = "raw";
pub const PHOTO_BUCKET: &str = "photos-bucket";

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
}

/// Buckets backed by sorted maps, so listings come back in key order
#[derive(Default)]
pub struct InMemoryStore {
    buckets: Mutex<HashMap<String, BTreeMap<String, StoredObject>>>,
}

impl InMemoryStore {
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    body: body.into(),
                    content_type: "application/json".to_string(),
                },
            );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .and_then(|objects| objects.get(key).cloned())
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.object(bucket, key)
            .map(|object| object.body)
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        Ok(self.object(bucket, key).is_some())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    body,
                    content_type: content_type.to_string(),
                },
            );
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .keys(bucket)
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }
}

/// Media service fake that serves every path and records each request
#[derive(Default)]
pub struct CountingTransport {
    requests: Mutex<Vec<(String, String)>>,
    unavailable_for: AtomicUsize,
}

impl CountingTransport {
    /// Answer the next `count` requests with "service unavailable"
    pub fn unavailable_for(count: usize) -> Self {
        Self {
            unavailable_for: AtomicUsize::new(count),
            ..Default::default()
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Last path segment of every requested URL, in request order
    pub fn requested_ids(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(url, _)| url.rsplit('/').next().map(str::to_string))
            .collect()
    }

    pub fn authorizations(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, authorization)| authorization.clone())
            .collect()
    }
}

#[async_trait]
impl MediaTransport for CountingTransport {
    async fn get(&self, url: &Url, authorization: &str) -> Result<MediaResponse, FetchError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), authorization.to_string()));

        let remaining = self.unavailable_for.load(Ordering::SeqCst);
        if remaining > 0 {
            self.unavailable_for.store(remaining - 1, Ordering::SeqCst);
            return Err(FetchError::TransientUpstreamUnavailable("HTTP 503".to_string()));
        }

        let id = url.path().rsplit('/').next().unwrap_or_default();
        Ok(MediaResponse {
            body: format!("photo:{id}").into_bytes(),
            content_type: Some("image/png; charset=binary".to_string()),
        })
    }
}

pub fn storage_config() -> StorageConfig {
    StorageConfig {
        bucket: PHOTO_BUCKET.to_string(),
        region: "us-east-1".to_string(),
        endpoint_url: None,
        force_path_style: false,
        source_prefix: "source".to_string(),
        photo_path_root: "photos".to_string(),
        photo_encoding: PhotoEncoding::Raw,
    }
}

pub fn media_config() -> MediaConfig {
    MediaConfig {
        consumer_key: "survey-consumer".to_string(),
        download_url_prefix: "https://media.example.com/api/v1.0/files/".to_string(),
        download_url_suffix: String::new(),
        request_timeout_secs: 5,
        max_attempts: 3,
        retry_delay_ms: 1,
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub transport: Arc<CountingTransport>,
    pub orchestrator: IngestOrchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_transport(CountingTransport::default())
    }

    pub fn with_transport(transport: CountingTransport) -> Self {
        let store = Arc::new(InMemoryStore::default());
        let transport = Arc::new(transport);
        let fetcher = Arc::new(PhotoFetcher::new(
            &media_config(),
            transport.clone(),
            Arc::new(StaticSecretProvider::new("survey-secret")),
        ));
        let photo_store = PhotoStore::new(&storage_config(), store.clone(), fetcher);
        let orchestrator = IngestOrchestrator::new("source", store.clone(), photo_store);

        Self {
            store,
            transport,
            orchestrator,
        }
    }
}

/// One export element with its photo answers
pub fn element(form_id: &str, serial: &str, attachments: &[&str]) -> serde_json::Value {
    let photos: Vec<String> = attachments
        .iter()
        .map(|id| format!("gridfs://registrationFiles/{id}"))
        .collect();
    serde_json::json!({
        "info": { "formId": form_id },
        "meta": { "serialNumber": serial },
        "data": {
            "site": "north field",
            "photos": photos
        }
    })
}

pub fn export_body(elements: Vec<serde_json::Value>) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({ "elements": elements })).unwrap()
}
