//! Media service secret providers.
//!
//! The consumer secret is fetched for every photo download so a rotated secret
//! takes effect without a restart.

use crate::config::{CredentialsConfig, SecretSource};
use crate::photo_fetcher::FetchError;
use async_trait::async_trait;
use aws_sdk_kms::error::DisplayErrorContext;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::Client as KmsClient;
use aws_types::SdkConfig;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Source of the shared secret used to sign media requests
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns the plaintext secret or [`FetchError::CredentialUnavailable`]
    async fn get_secret(&self) -> Result<String, FetchError>;
}

/// Secret supplied directly in configuration
pub struct StaticSecretProvider {
    secret: String,
}

impl StaticSecretProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticSecretProvider {
    async fn get_secret(&self) -> Result<String, FetchError> {
        Ok(self.secret.clone())
    }
}

/// Secret stored as KMS ciphertext, decrypted on demand
pub struct KmsSecretProvider {
    client: KmsClient,
    ciphertext: Vec<u8>,
    key_id: Option<String>,
}

impl KmsSecretProvider {
    /// `encrypted_secret` is the base64 encoding of the KMS ciphertext blob
    pub fn new(
        sdk_config: &SdkConfig,
        encrypted_secret: &str,
        key_id: Option<String>,
    ) -> Result<Self, FetchError> {
        let ciphertext = STANDARD
            .decode(encrypted_secret.trim())
            .map_err(|e| FetchError::CredentialUnavailable(format!("invalid ciphertext: {e}")))?;

        Ok(Self {
            client: KmsClient::new(sdk_config),
            ciphertext,
            key_id,
        })
    }
}

#[async_trait]
impl CredentialProvider for KmsSecretProvider {
    #[instrument(skip(self))]
    async fn get_secret(&self) -> Result<String, FetchError> {
        let response = self
            .client
            .decrypt()
            .ciphertext_blob(Blob::new(self.ciphertext.clone()))
            .set_key_id(self.key_id.clone())
            .send()
            .await
            .map_err(|e| FetchError::CredentialUnavailable(DisplayErrorContext(&e).to_string()))?;

        let plaintext = response.plaintext().ok_or_else(|| {
            FetchError::CredentialUnavailable("KMS returned no plaintext".to_string())
        })?;

        debug!("Decrypted media service secret");
        decode_plaintext(plaintext.as_ref())
    }
}

/// Secrets are often encrypted from files with a trailing newline
fn decode_plaintext(bytes: &[u8]) -> Result<String, FetchError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| FetchError::CredentialUnavailable(format!("secret is not UTF-8: {e}")))?;
    Ok(text.replace(['\n', '\r'], ""))
}

/// Build the provider selected in configuration
pub fn from_config(
    config: &CredentialsConfig,
    sdk_config: &SdkConfig,
) -> Result<Arc<dyn CredentialProvider>, FetchError> {
    match config.source {
        SecretSource::Plaintext => {
            let secret = config.secret.clone().ok_or_else(|| {
                FetchError::CredentialUnavailable("credentials.secret is not set".to_string())
            })?;
            Ok(Arc::new(StaticSecretProvider::new(secret)))
        }
        SecretSource::Kms => {
            let encrypted = config.encrypted_secret.as_deref().ok_or_else(|| {
                FetchError::CredentialUnavailable(
                    "credentials.encrypted_secret is not set".to_string(),
                )
            })?;
            Ok(Arc::new(KmsSecretProvider::new(
                sdk_config,
                encrypted,
                config.kms_key_id.clone(),
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticSecretProvider::new("s3cr3t");
        assert_eq!(provider.get_secret().await.unwrap(), "s3cr3t");
    }

    #[test]
    fn test_decode_plaintext_strips_newlines() {
        assert_eq!(decode_plaintext(b"abc\n").unwrap(), "abc");
        assert_eq!(decode_plaintext(b"a\r\nb\n").unwrap(), "ab");
    }

    #[test]
    fn test_decode_plaintext_rejects_invalid_utf8() {
        assert!(matches!(
            decode_plaintext(&[0xff, 0xfe]),
            Err(FetchError::CredentialUnavailable(_))
        ));
    }

    #[test]
    fn test_kms_provider_rejects_bad_base64() {
        let sdk_config = SdkConfig::builder().build();
        let result = KmsSecretProvider::new(&sdk_config, "not base64!!", None);
        assert!(matches!(result, Err(FetchError::CredentialUnavailable(_))));
    }

    #[test]
    fn test_from_config_plaintext() {
        let config = CredentialsConfig {
            source: SecretSource::Plaintext,
            secret: Some("x".to_string()),
            ..Default::default()
        };
        let sdk_config = SdkConfig::builder().build();
        assert!(from_config(&config, &sdk_config).is_ok());

        let missing = CredentialsConfig::default();
        assert!(from_config(&missing, &sdk_config).is_err());
    }
}
