//! Per-event ingest flow.
//!
//! ```text
//! event ─▶ prefix filter ─▶ load current ─▶ load previous ─▶ diff ─▶ store photos
//!               │                 │          (optional)
//!               ▼                 ▼
//!            Ignored            Empty
//! ```

use crate::event::StorageEvent;
use crate::export::SurveyExport;
use crate::object_store::{ObjectStore, StoreError};
use crate::photo_store::PhotoStore;
use crate::snapshot_diff::SnapshotDiffer;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Errors that abort an invocation
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to read export {bucket}/{name}: {source}")]
    ReadExport {
        bucket: String,
        name: String,
        #[source]
        source: StoreError,
    },
}

/// Counters for one processed export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub survey_form_id: String,
    pub registrations: usize,
    pub unchanged: usize,
    pub dispatched: usize,
    pub photos_stored: usize,
    pub photos_skipped: usize,
    pub photos_failed: usize,
}

/// How an event ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Object is not a raw export
    Ignored,
    /// Export missing, unparseable or without registrations
    Empty,
    Processed(IngestSummary),
}

/// Handles one object-created event end to end
pub struct IngestOrchestrator {
    store: Arc<dyn ObjectStore>,
    differ: SnapshotDiffer,
    photos: PhotoStore,
    source_prefix: String,
}

impl IngestOrchestrator {
    pub fn new(
        source_prefix: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        photos: PhotoStore,
    ) -> Self {
        Self {
            differ: SnapshotDiffer::new(store.clone()),
            store,
            photos,
            source_prefix: source_prefix.into(),
        }
    }

    /// Process the export announced by `event`.
    ///
    /// Only a failure to read the current export is returned as an error;
    /// everything else is logged and reflected in the outcome. Re-running an
    /// event is safe because stored photos are never fetched again.
    #[instrument(skip(self, event), fields(bucket = %event.bucket, object = %event.name))]
    pub async fn handle(&self, event: &StorageEvent) -> Result<IngestOutcome, IngestError> {
        if !event.name.starts_with(&self.source_prefix) {
            debug!(prefix = %self.source_prefix, "Not a raw export, ignoring");
            metrics::counter!("survey_photos.events.ignored").increment(1);
            return Ok(IngestOutcome::Ignored);
        }

        let Some(current) = self.load_current(event).await? else {
            return Ok(IngestOutcome::Empty);
        };

        let previous = self.differ.previous_index(&event.bucket, &event.name).await;
        let (unchanged, pending) = previous.partition(&current);

        let mut summary = IngestSummary {
            survey_form_id: current.survey_form_id.clone(),
            registrations: current.registrations.len(),
            unchanged: unchanged.len(),
            dispatched: pending.len(),
            ..Default::default()
        };

        metrics::counter!("survey_photos.registrations.unchanged")
            .increment(unchanged.len() as u64);
        for registration in &unchanged {
            debug!(
                survey_id = %current.survey_form_id,
                registration_id = %registration.registration_id,
                "Attachments unchanged since previous export, skipping"
            );
        }

        for registration in pending {
            let report = self
                .photos
                .ensure_stored(
                    &current.survey_form_id,
                    &registration.registration_id,
                    &registration.attachment_ids,
                )
                .await;

            info!(
                survey_id = %current.survey_form_id,
                registration_id = %registration.registration_id,
                attachments = ?registration.attachment_ids,
                stored = report.stored.len(),
                skipped = report.skipped.len(),
                failed = report.failed.len(),
                "Registration processed"
            );

            summary.photos_stored += report.stored.len();
            summary.photos_skipped += report.skipped.len();
            summary.photos_failed += report.failed.len();
        }

        if summary.photos_failed > 0 {
            warn!(
                survey_id = %summary.survey_form_id,
                failed = summary.photos_failed,
                "Some photos failed; re-trigger the source object to retry them"
            );
        }

        info!(
            survey_id = %summary.survey_form_id,
            registrations = summary.registrations,
            unchanged = summary.unchanged,
            stored = summary.photos_stored,
            skipped = summary.photos_skipped,
            failed = summary.photos_failed,
            "Export processed"
        );

        Ok(IngestOutcome::Processed(summary))
    }

    /// `None` when there is nothing to process
    async fn load_current(&self, event: &StorageEvent) -> Result<Option<SurveyExport>, IngestError> {
        let bytes = match self.store.get_object(&event.bucket, &event.name).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound { .. }) => {
                warn!("Export no longer exists, nothing to do");
                return Ok(None);
            }
            Err(source) => {
                return Err(IngestError::ReadExport {
                    bucket: event.bucket.clone(),
                    name: event.name.clone(),
                    source,
                })
            }
        };

        match SurveyExport::parse(&bytes) {
            Ok(export) if export.is_empty() => {
                info!("Export has no registrations");
                Ok(None)
            }
            Ok(export) => Ok(Some(export)),
            Err(e) => {
                error!(error = %e, "Failure processing survey export, skip");
                Ok(None)
            }
        }
    }
}
