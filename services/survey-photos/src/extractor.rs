//! Photo reference extraction from survey payloads.
//!
//! Registration payloads have no stable schema. Photo references can appear
//! at any depth as strings of the form `gridfs://registrationFiles/<id>`, so
//! the payload is walked as a plain JSON tree.

use serde_json::Value;

/// Prefix marking a string value as a photo reference.
pub const ATTACHMENT_SENTINEL: &str = "gridfs://registrationFiles/";

/// Opaque identifier of a photo in the media service.
pub type AttachmentId = String;

/// Collect every photo reference in `node`, in document order.
///
/// Duplicates are kept: a photo referenced twice is reported twice. The walk
/// uses an explicit stack, so nesting depth is bounded only by memory.
pub fn extract_attachments(node: &Value) -> Vec<AttachmentId> {
    let mut attachments = Vec::new();
    // Children are pushed in reverse so they pop in document order
    let mut pending = vec![node];

    while let Some(node) = pending.pop() {
        match node {
            Value::Array(items) => pending.extend(items.iter().rev()),
            Value::Object(fields) => pending.extend(fields.values().rev()),
            Value::String(text) => {
                if let Some(id) = attachment_id(text) {
                    attachments.push(id.to_string());
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }

    attachments
}

/// Final path segment of a sentinel URI, `None` for any other string.
///
/// A reference with nothing after the last `/` names no photo and is dropped.
fn attachment_id(text: &str) -> Option<&str> {
    if !text.starts_with(ATTACHMENT_SENTINEL) {
        return None;
    }
    text.rsplit('/').next().filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_mapping() {
        let payload = json!({"f": "gridfs://registrationFiles/img1.png"});
        assert_eq!(extract_attachments(&payload), vec!["img1.png"]);
    }

    #[test]
    fn test_nested_in_document_order() {
        let payload = json!({
            "zeta": "gridfs://registrationFiles/a.jpg",
            "alpha": [
                {"photo": "gridfs://registrationFiles/b.jpg"},
                [["gridfs://registrationFiles/c.jpg"]]
            ],
            "mid": {"deep": {"deeper": {"p": "gridfs://registrationFiles/d.jpg"}}}
        });

        assert_eq!(
            extract_attachments(&payload),
            vec!["a.jpg", "b.jpg", "c.jpg", "d.jpg"]
        );
    }

    #[test]
    fn test_duplicates_are_kept() {
        let payload = json!([
            "gridfs://registrationFiles/same.png",
            {"again": "gridfs://registrationFiles/same.png"}
        ]);
        assert_eq!(extract_attachments(&payload), vec!["same.png", "same.png"]);
    }

    #[test]
    fn test_non_sentinel_values_ignored() {
        let payload = json!({
            "url": "https://example.com/registrationFiles/x.png",
            "prefix_later": "see gridfs://registrationFiles/y.png",
            "n": 42,
            "b": true,
            "nothing": null,
            "empty": [],
            "obj": {}
        });
        assert!(extract_attachments(&payload).is_empty());
    }

    #[test]
    fn test_takes_final_segment() {
        let payload = json!("gridfs://registrationFiles/nested/dir/photo.jpeg");
        assert_eq!(extract_attachments(&payload), vec!["photo.jpeg"]);
    }

    #[test]
    fn test_bare_sentinel_ignored() {
        let payload = json!(["gridfs://registrationFiles/", "gridfs://registrationFiles/x/"]);
        assert!(extract_attachments(&payload).is_empty());
    }

    #[test]
    fn test_scalars_at_root() {
        assert!(extract_attachments(&Value::Null).is_empty());
        assert!(extract_attachments(&json!(3.5)).is_empty());
        assert!(extract_attachments(&json!("plain")).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let payload = json!({
            "a": ["gridfs://registrationFiles/1", {"b": "gridfs://registrationFiles/2"}],
            "c": "gridfs://registrationFiles/3"
        });
        assert_eq!(extract_attachments(&payload), extract_attachments(&payload));
    }

    #[test]
    fn test_deep_nesting() {
        let mut payload = json!("gridfs://registrationFiles/bottom.png");
        for _ in 0..200 {
            payload = json!({ "level": [payload, "gridfs://registrationFiles/side.png"] });
        }
        let attachments = extract_attachments(&payload);
        assert_eq!(attachments.len(), 201);
        assert_eq!(attachments[0], "bottom.png");
        assert!(attachments[1..].iter().all(|id| id == "side.png"));
    }
}
