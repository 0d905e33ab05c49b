//! OAuth 1.0a request signing (RFC 5849), HMAC-SHA1, consumer credentials only.
//!
//! The media service authenticates each request with a single-use nonce and a
//! timestamp signed by the consumer secret. There is no token step, so the
//! token secret part of the signing key is empty.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha1::Sha1;
use thiserror::Error;
use url::Url;

/// RFC 3986 unreserved characters stay as they are; everything else is encoded
const OAUTH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const SIGNATURE_METHOD: &str = "HMAC-SHA1";

/// Errors building a request signature
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Consumer secret is not a usable HMAC key: {0}")]
    InvalidKey(String),
}
const OAUTH_VERSION: &str = "1.0";

/// Consumer credentials for one signed request
#[derive(Debug, Clone)]
pub struct ConsumerCredentials<'a> {
    pub key: &'a str,
    pub secret: &'a str,
}

/// Per-request values that must never repeat
#[derive(Debug, Clone)]
pub struct RequestNonce {
    pub nonce: String,
    pub timestamp: i64,
}

impl RequestNonce {
    pub fn generate() -> Self {
        Self {
            nonce: uuid::Uuid::new_v4().simple().to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, OAUTH_ENCODE_SET).to_string()
}

/// Build the `Authorization` header value for `method url`
pub fn authorization_header(
    method: &str,
    url: &Url,
    credentials: &ConsumerCredentials<'_>,
    nonce: &RequestNonce,
) -> Result<String, SigningError> {
    let timestamp = nonce.timestamp.to_string();
    let oauth_params = [
        ("oauth_consumer_key", credentials.key),
        ("oauth_nonce", nonce.nonce.as_str()),
        ("oauth_signature_method", SIGNATURE_METHOD),
        ("oauth_timestamp", timestamp.as_str()),
        ("oauth_version", OAUTH_VERSION),
    ];

    let base_string = signature_base_string(method, url, &oauth_params);
    let signature = sign(&base_string, credentials.secret)?;

    let fields: Vec<String> = oauth_params
        .iter()
        .copied()
        .chain(std::iter::once(("oauth_signature", signature.as_str())))
        .map(|(name, value)| format!("{}=\"{}\"", name, encode(value)))
        .collect();

    Ok(format!("OAuth {}", fields.join(", ")))
}

/// Method, base URL and the normalized parameter string, joined by `&`
fn signature_base_string(method: &str, url: &Url, oauth_params: &[(&str, &str)]) -> String {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (encode(&k), encode(&v)))
        .chain(oauth_params.iter().map(|(k, v)| (encode(k), encode(v))))
        .collect();
    params.sort();

    let normalized = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut base_url = url.clone();
    base_url.set_query(None);
    base_url.set_fragment(None);

    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(base_url.as_str()),
        encode(&normalized)
    )
}

fn sign(base_string: &str, consumer_secret: &str) -> Result<String, SigningError> {
    let key = format!("{}&", encode(consumer_secret));
    let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes())
        .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
    mac.update(base_string.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_nonce() -> RequestNonce {
        RequestNonce {
            nonce: "abc123".to_string(),
            timestamp: 1_700_000_000,
        }
    }

    fn test_url() -> Url {
        Url::parse("https://media.example.com/api/v1.0/files/img1.png?size=large&a%20b=c%26d")
            .unwrap()
    }

    #[test]
    fn test_encode_unreserved() {
        assert_eq!(encode("AZaz09-._~"), "AZaz09-._~");
        assert_eq!(encode("a b&c=d/e+f"), "a%20b%26c%3Dd%2Fe%2Bf");
        assert_eq!(encode("é"), "%C3%A9");
    }

    #[test]
    fn test_signature_base_string() {
        let params = [
            ("oauth_consumer_key", "ck"),
            ("oauth_nonce", "abc123"),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", "1700000000"),
            ("oauth_version", "1.0"),
        ];
        let base = signature_base_string("get", &test_url(), &params);
        assert_eq!(
            base,
            "GET&https%3A%2F%2Fmedia.example.com%2Fapi%2Fv1.0%2Ffiles%2Fimg1.png&\
             a%2520b%3Dc%2526d%26oauth_consumer_key%3Dck%26oauth_nonce%3Dabc123%26\
             oauth_signature_method%3DHMAC-SHA1%26oauth_timestamp%3D1700000000%26\
             oauth_version%3D1.0%26size%3Dlarge"
        );
    }

    #[test]
    fn test_authorization_header() {
        let credentials = ConsumerCredentials {
            key: "ck",
            secret: "cs+/secret",
        };
        let header =
            authorization_header("GET", &test_url(), &credentials, &fixed_nonce()).unwrap();

        assert!(header.starts_with("OAuth oauth_consumer_key=\"ck\", "));
        assert!(header.contains("oauth_signature_method=\"HMAC-SHA1\""));
        assert!(header.contains("oauth_timestamp=\"1700000000\""));
        assert!(header.contains("oauth_version=\"1.0\""));
        // WVPOvx+2dWlrCK61CQJqrM3+qgo= percent-encoded
        assert!(header.ends_with("oauth_signature=\"WVPOvx%2B2dWlrCK61CQJqrM3%2Bqgo%3D\""));
    }

    #[test]
    fn test_sign_accepts_any_secret_length() {
        // Longer than the SHA-1 block size, so the key is hashed first
        let long_secret = "s".repeat(200);
        for secret in ["", "short", long_secret.as_str()] {
            let signature = sign("GET&x&y", secret).unwrap();
            assert_eq!(STANDARD.decode(signature).unwrap().len(), 20);
        }
    }

    #[test]
    fn test_generated_nonces_differ() {
        let a = RequestNonce::generate();
        let b = RequestNonce::generate();
        assert_ne!(a.nonce, b.nonce);
        assert_eq!(a.nonce.len(), 32);
    }
}
