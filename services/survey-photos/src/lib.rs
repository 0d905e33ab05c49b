//! Survey Photo Ingest Service
//!
//! Reacts to survey exports landing in object storage. Each export is a full
//! snapshot of a survey's registrations; photo answers inside it are opaque
//! attachment references. For every registration whose attachments changed
//! since the previous export, the referenced photos are downloaded from the
//! media service with OAuth1-signed requests and stored once under a
//! deterministic key.
//!
//! ## Architecture
//!
//! ```text
//! Kafka Topic                 Raw Bucket                  Media Service
//! ┌──────────────┐           ┌──────────────┐            ┌──────────────┐
//! │ Object       │           │ source/      │            │ /files/{id}  │
//! │ Notifications│           │   {a}/{b}/   │            └──────────────┘
//! └──────────────┘           │   {export}   │                   ▲
//!        │                   └──────────────┘                   │ OAuth1
//!        ▼                          │                           │
//! ┌──────────────┐                  ▼                    ┌──────────────┐
//! │ Ingest       │◀──────── current + previous ─────────▶│ Photo        │
//! │ Orchestrator │          export (diff)                │ Fetcher      │
//! └──────────────┘                                       └──────────────┘
//!        │                                                      │
//!        ▼                                                      ▼
//! ┌──────────────┐           ┌──────────────────────────────────────┐
//! │ Photo Store  │──────────▶│ photos/{survey}/{registration}/{id}  │
//! └──────────────┘           └──────────────────────────────────────┘
//! ```

pub mod config;
pub mod credentials;
pub mod event;
pub mod export;
pub mod extractor;
pub mod health;
pub mod kafka_consumer;
pub mod oauth;
pub mod object_store;
pub mod orchestrator;
pub mod photo_fetcher;
pub mod photo_store;
pub mod snapshot_diff;

pub use config::Config;
pub use credentials::{CredentialProvider, KmsSecretProvider, StaticSecretProvider};
pub use event::{decode_notification, StorageEvent};
pub use export::{Registration, SurveyExport};
pub use extractor::{extract_attachments, AttachmentId, ATTACHMENT_SENTINEL};
pub use kafka_consumer::SurveyExportConsumer;
pub use object_store::{ObjectStore, S3ObjectStore, StoreError};
pub use orchestrator::{IngestError, IngestOrchestrator, IngestOutcome, IngestSummary};
pub use photo_fetcher::{FetchError, FetchedPhoto, MediaTransport, PhotoFetcher, ReqwestTransport};
pub use photo_store::{photo_key, BatchReport, PhotoStore};
pub use snapshot_diff::{DiffIndex, SnapshotDiffer};
