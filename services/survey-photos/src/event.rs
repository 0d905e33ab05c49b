//! Object-created notifications.
//!
//! Two payload shapes are accepted: the flat `{"bucket", "name"}` trigger and
//! S3/MinIO bucket notifications with a `Records` array.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors decoding a notification payload
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Failed to deserialize notification: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Object key is not valid UTF-8 after decoding: {0}")]
    InvalidKey(String),
}

/// One object written to a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEvent {
    pub bucket: String,
    /// Object key (path) inside the bucket
    pub name: String,
}

impl StorageEvent {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Notification {
    Flat(StorageEvent),
    S3 {
        #[serde(rename = "Records")]
        records: Vec<S3Record>,
    },
}

#[derive(Debug, Deserialize)]
struct S3Record {
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
}

/// Decode a notification into the objects it announces
pub fn decode_notification(payload: &[u8]) -> Result<Vec<StorageEvent>, EventError> {
    match serde_json::from_slice::<Notification>(payload)? {
        Notification::Flat(event) => Ok(vec![event]),
        Notification::S3 { records } => records
            .into_iter()
            .map(|record| {
                Ok(StorageEvent {
                    bucket: record.s3.bucket.name,
                    name: decode_s3_key(&record.s3.object.key)?,
                })
            })
            .collect(),
    }
}

/// S3 notifications carry form-encoded keys (`+` for space)
fn decode_s3_key(key: &str) -> Result<String, EventError> {
    let spaced = key.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| EventError::InvalidKey(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_flat_trigger() {
        let events =
            decode_notification(br#"{"bucket": "raw", "name": "source/A/B/001"}"#).unwrap();
        assert_eq!(events, vec![StorageEvent::new("raw", "source/A/B/001")]);
    }

    #[test]
    fn test_decode_s3_notification() {
        let payload = br#"{
            "EventName": "s3:ObjectCreated:Put",
            "Records": [
                {
                    "eventName": "s3:ObjectCreated:Put",
                    "s3": {
                        "bucket": {"name": "raw"},
                        "object": {"key": "source/A/B/export+2024-01-15%3A10.json", "size": 1024}
                    }
                },
                {
                    "s3": {
                        "bucket": {"name": "raw"},
                        "object": {"key": "source/A/B/002"}
                    }
                }
            ]
        }"#;

        let events = decode_notification(payload).unwrap();
        assert_eq!(
            events,
            vec![
                StorageEvent::new("raw", "source/A/B/export 2024-01-15:10.json"),
                StorageEvent::new("raw", "source/A/B/002"),
            ]
        );
    }

    #[test]
    fn test_decode_rejects_unknown_shape() {
        assert!(matches!(
            decode_notification(br#"{"object": "x"}"#),
            Err(EventError::InvalidPayload(_))
        ));
        assert!(decode_notification(b"not json").is_err());
    }

    #[test]
    fn test_decode_invalid_utf8_key() {
        assert!(matches!(
            decode_s3_key("source/%FF"),
            Err(EventError::InvalidKey(_))
        ));
    }
}
