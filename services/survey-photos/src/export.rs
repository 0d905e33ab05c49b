//! Survey export documents.
//!
//! An export is a JSON snapshot of all registrations of one survey form:
//!
//! ```json
//! { "elements": [
//!     { "info": { "formId": "formX" },
//!       "meta": { "serialNumber": "regY" },
//!       "data": { "...": "free-form payload" } } ] }
//! ```
//!
//! Only the fields needed to locate photos are read. The `data` payload is kept
//! as an untyped tree and handed to the extractor.

use crate::extractor::{extract_attachments, AttachmentId};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Errors raised while reading an export document
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Export is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Export has a missing or invalid field: {0}")]
    MissingField(&'static str),
}

/// One registration (survey submission) inside an export
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    /// Registration serial number
    pub registration_id: String,
    /// Free-form submission payload
    pub payload: Value,
    /// Photo references found in the payload, in document order
    pub attachment_ids: Vec<AttachmentId>,
}

impl Registration {
    pub fn new(registration_id: impl Into<String>, payload: Value) -> Self {
        let attachment_ids = extract_attachments(&payload);
        Self {
            registration_id: registration_id.into(),
            payload,
            attachment_ids,
        }
    }
}

/// A parsed survey export
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SurveyExport {
    /// Survey form identifier, empty when the export has no elements
    pub survey_form_id: String,
    /// Registrations in export order
    pub registrations: Vec<Registration>,
}

impl SurveyExport {
    /// Parse an export from raw bytes.
    ///
    /// A document without `elements` (or with an empty array) is a valid empty
    /// export. Elements without a usable serial number are skipped so one bad
    /// submission does not hide the others.
    ///
    /// Payloads have no depth limit; the stack grows on demand while parsing.
    pub fn parse(bytes: &[u8]) -> Result<Self, ExportError> {
        let mut json = serde_json::Deserializer::from_slice(bytes);
        json.disable_recursion_limit();
        let document = Value::deserialize(serde_stacker::Deserializer::new(&mut json))?;
        json.end()?;
        Self::from_value(document)
    }

    pub fn from_value(mut document: Value) -> Result<Self, ExportError> {
        let elements = match document.get_mut("elements").map(Value::take) {
            Some(Value::Array(elements)) if !elements.is_empty() => elements,
            Some(Value::Array(_)) | Some(Value::Null) | None => return Ok(Self::default()),
            Some(_) => return Err(ExportError::MissingField("elements")),
        };

        let survey_form_id = elements[0]
            .pointer("/info/formId")
            .and_then(scalar_to_string)
            .ok_or(ExportError::MissingField("elements[0].info.formId"))?;

        let mut registrations = Vec::with_capacity(elements.len());
        for (index, mut element) in elements.into_iter().enumerate() {
            let Some(registration_id) = element
                .pointer("/meta/serialNumber")
                .and_then(scalar_to_string)
            else {
                warn!(
                    survey_id = %survey_form_id,
                    element_index = index,
                    "Registration has no serial number, skipping"
                );
                continue;
            };

            let payload = element
                .get_mut("data")
                .map(Value::take)
                .unwrap_or(Value::Null);
            registrations.push(Registration::new(registration_id, payload));
        }

        Ok(Self {
            survey_form_id,
            registrations,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

/// Identifiers arrive as strings or numbers depending on the export version
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
