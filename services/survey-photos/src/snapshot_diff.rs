//! Incremental processing against the previous export of the same survey.
//!
//! Exports are full snapshots, so most registrations in a new export were
//! already handled when the previous one arrived. A registration whose
//! attachment list is identical to the previous export's list is skipped.

use crate::export::{Registration, SurveyExport};
use crate::extractor::AttachmentId;
use crate::object_store::ObjectStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Number of leading path segments shared by exports of one survey
const PREFIX_SEGMENTS: usize = 3;

/// Attachment lists of the previous export, keyed by (survey, registration)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffIndex {
    entries: HashMap<(String, String), Vec<AttachmentId>>,
}

impl DiffIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registration listed twice keeps its last occurrence
    pub fn from_export(export: &SurveyExport) -> Self {
        let entries = export
            .registrations
            .iter()
            .map(|registration| {
                (
                    (
                        export.survey_form_id.clone(),
                        registration.registration_id.clone(),
                    ),
                    registration.attachment_ids.clone(),
                )
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, survey_form_id: &str, registration_id: &str) -> Option<&[AttachmentId]> {
        self.entries
            .get(&(survey_form_id.to_string(), registration_id.to_string()))
            .map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unchanged only when the previous list has the same ids in the same
    /// order with the same multiplicity
    pub fn needs_processing(&self, survey_form_id: &str, registration: &Registration) -> bool {
        match self.get(survey_form_id, &registration.registration_id) {
            Some(previous) => previous != registration.attachment_ids.as_slice(),
            None => true,
        }
    }

    /// Split an export into (unchanged, needs processing), keeping export order
    pub fn partition<'a>(
        &self,
        export: &'a SurveyExport,
    ) -> (Vec<&'a Registration>, Vec<&'a Registration>) {
        export
            .registrations
            .iter()
            .partition(|registration| !self.needs_processing(&export.survey_form_id, registration))
    }
}

/// Listing prefix shared by all exports of the survey `object_path` belongs to.
///
/// `source/A/B/001` gives `source/A/B/`. Paths with no more than three segments
/// are not inside a survey folder and have no prefix.
pub fn export_prefix(object_path: &str) -> Option<String> {
    let segments: Vec<&str> = object_path.split('/').collect();
    if segments.len() <= PREFIX_SEGMENTS {
        return None;
    }
    Some(format!("{}/", segments[..PREFIX_SEGMENTS].join("/")))
}

/// The key sorting immediately before `current` in `listing`.
///
/// Keys are compared lexicographically. If `current` is not in the listing the
/// ordering cannot be trusted and no previous export is reported.
pub fn select_previous(listing: &[String], current: &str) -> Option<String> {
    let mut keys: Vec<&str> = listing.iter().map(String::as_str).collect();
    keys.sort_unstable();
    keys.dedup();

    if keys.len() < 2 {
        return None;
    }

    let position = keys.binary_search(&current).ok()?;
    position.checked_sub(1).map(|index| keys[index].to_string())
}

/// Builds the [`DiffIndex`] for an incoming export
pub struct SnapshotDiffer {
    store: Arc<dyn ObjectStore>,
}

impl SnapshotDiffer {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Index of the export preceding `object_path`.
    ///
    /// Never fails: a missing, unreadable or malformed previous export gives
    /// an empty index, which makes every registration need processing.
    #[instrument(skip(self))]
    pub async fn previous_index(&self, bucket: &str, object_path: &str) -> DiffIndex {
        let Some(previous_path) = self.locate_previous(bucket, object_path).await else {
            debug!("No previous export");
            return DiffIndex::empty();
        };

        let bytes = match self.store.get_object(bucket, &previous_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(previous = %previous_path, error = %e, "Failed to read previous export");
                return DiffIndex::empty();
            }
        };

        match SurveyExport::parse(&bytes) {
            Ok(previous) => {
                let index = DiffIndex::from_export(&previous);
                info!(
                    previous = %previous_path,
                    registrations = index.len(),
                    "Loaded previous export"
                );
                index
            }
            Err(e) => {
                warn!(previous = %previous_path, error = %e, "Previous export is malformed, ignoring it");
                DiffIndex::empty()
            }
        }
    }

    async fn locate_previous(&self, bucket: &str, object_path: &str) -> Option<String> {
        let prefix = export_prefix(object_path)?;

        let listing = match self.store.list_objects(bucket, &prefix).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(prefix = %prefix, error = %e, "Failed to list exports");
                return None;
            }
        };

        let previous = select_previous(&listing, object_path);
        if previous.is_none() && listing.len() >= 2 && !listing.iter().any(|k| k == object_path) {
            warn!(
                prefix = %prefix,
                listed = listing.len(),
                "Current export missing from its own listing"
            );
        }
        previous
    }
}
