//! Signed photo downloads from the media service.

use crate::config::MediaConfig;
use crate::credentials::CredentialProvider;
use crate::oauth::{authorization_header, ConsumerCredentials, RequestNonce};
use async_trait::async_trait;
use backoff::backoff::{Backoff, Constant};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

/// Content type used when the media service does not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Errors that can occur while fetching a photo
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Media service credentials unavailable: {0}")]
    CredentialUnavailable(String),

    #[error("Media service temporarily unavailable: {0}")]
    TransientUpstreamUnavailable(String),

    #[error("Photo fetch failed: {0}")]
    PermanentFetchFailure(String),

    #[error("Media service still unavailable after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl FetchError {
    /// Only upstream unavailability is worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::TransientUpstreamUnavailable(_))
    }
}

/// Raw response of the media service
#[derive(Debug, Clone, PartialEq)]
pub struct MediaResponse {
    pub body: Vec<u8>,
    /// `Content-Type` header as sent, parameters included
    pub content_type: Option<String>,
}

/// A downloaded photo
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPhoto {
    pub bytes: Vec<u8>,
    /// Media type without parameters, e.g. `image/png`
    pub content_type: String,
}

/// Transport for signed GET requests to the media service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Must map "service unavailable" to [`FetchError::TransientUpstreamUnavailable`]
    async fn get(&self, url: &Url, authorization: &str) -> Result<MediaResponse, FetchError>;
}

/// reqwest-backed [`MediaTransport`]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| FetchError::PermanentFetchFailure(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaTransport for ReqwestTransport {
    async fn get(&self, url: &Url, authorization: &str) -> Result<MediaResponse, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .header(AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(|e| FetchError::PermanentFetchFailure(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(FetchError::TransientUpstreamUnavailable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::PermanentFetchFailure(format!("HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::PermanentFetchFailure(format!("reading body: {e}")))?;

        Ok(MediaResponse {
            body: body.to_vec(),
            content_type,
        })
    }
}

/// Bounded, fixed-delay retry for transient upstream failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl From<&MediaConfig> for RetryPolicy {
    fn from(config: &MediaConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            delay: config.retry_delay(),
        }
    }
}

/// Downloads photos by attachment id
pub struct PhotoFetcher {
    transport: Arc<dyn MediaTransport>,
    credentials: Arc<dyn CredentialProvider>,
    consumer_key: String,
    url_prefix: String,
    url_suffix: String,
    policy: RetryPolicy,
}

impl PhotoFetcher {
    pub fn new(
        config: &MediaConfig,
        transport: Arc<dyn MediaTransport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            transport,
            credentials,
            consumer_key: config.consumer_key.clone(),
            url_prefix: config.download_url_prefix.clone(),
            url_suffix: config.download_url_suffix.clone(),
            policy: RetryPolicy::from(config),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// `{prefix}{attachment_id}{suffix}`
    pub fn download_url(&self, attachment_id: &str) -> Result<Url, FetchError> {
        let raw = format!("{}{}{}", self.url_prefix, attachment_id, self.url_suffix);
        Url::parse(&raw)
            .map_err(|e| FetchError::PermanentFetchFailure(format!("invalid URL {raw}: {e}")))
    }

    /// Fetch one photo, retrying while the media service is unavailable
    #[instrument(skip(self))]
    pub async fn fetch(&self, attachment_id: &str) -> Result<FetchedPhoto, FetchError> {
        let url = self.download_url(attachment_id)?;
        let secret = self.credentials.get_secret().await?;
        let credentials = ConsumerCredentials {
            key: &self.consumer_key,
            secret: &secret,
        };

        let mut backoff = Constant::new(self.policy.delay);
        let mut attempt = 0;

        loop {
            attempt += 1;
            // Nonces are single-use, so every attempt is signed again
            let authorization =
                authorization_header("GET", &url, &credentials, &RequestNonce::generate())
                    .map_err(|e| FetchError::CredentialUnavailable(e.to_string()))?;

            match self.transport.get(&url, &authorization).await {
                Ok(response) => {
                    let photo = FetchedPhoto {
                        content_type: media_type(response.content_type.as_deref()),
                        bytes: response.body,
                    };
                    debug!(
                        attempt,
                        size_bytes = photo.bytes.len(),
                        content_type = %photo.content_type,
                        "Photo downloaded"
                    );
                    return Ok(photo);
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = backoff.next_backoff().unwrap_or(self.policy.delay);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Media service unavailable, retrying"
                    );
                    metrics::counter!("survey_photos.fetch.retries").increment(1);
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(FetchError::RetriesExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Strip parameters from a `Content-Type` value
fn media_type(content_type: Option<&str>) -> String {
    content_type
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}
