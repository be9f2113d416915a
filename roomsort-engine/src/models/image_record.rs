//! Per-image classification record
//!
//! One record per `(request_id, image_id)`. Records are created at upload
//! time, then mutated in place by the resize trigger, the fast tier and the
//! fallback tier. They are never deleted.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Stored marker for "not yet classified"
pub const NONE_CLASSIFICATION: &str = "None";
/// Stored marker for "a classifier ran but found nothing"
pub const UNCLASSIFIED_CLASSIFICATION: &str = "Unclassified";

/// Image formats accepted at upload
pub const SUPPORTED_IMAGE_TYPES: &[&str] = &["png", "jpeg"];

/// Classification state of an image
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Classification {
    /// Not yet classified
    None,
    /// A classifier ran and found no label from the vocabulary
    Unclassified,
    /// A real room/location label
    Label(String),
}

impl Classification {
    pub fn as_str(&self) -> &str {
        match self {
            Classification::None => NONE_CLASSIFICATION,
            Classification::Unclassified => UNCLASSIFIED_CLASSIFICATION,
            Classification::Label(label) => label,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Classification::None)
    }

    pub fn is_label(&self) -> bool {
        matches!(self, Classification::Label(_))
    }
}

impl From<String> for Classification {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | NONE_CLASSIFICATION => Classification::None,
            UNCLASSIFIED_CLASSIFICATION => Classification::Unclassified,
            _ => Classification::Label(value),
        }
    }
}

impl From<&str> for Classification {
    fn from(value: &str) -> Self {
        Classification::from(value.to_string())
    }
}

impl From<Classification> for String {
    fn from(value: Classification) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image Record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    /// Groups images submitted together
    pub request_id: String,
    pub image_id: String,
    /// File format / extension (`png`, `jpeg`)
    pub image_type: String,
    pub resized: bool,
    pub classification: Classification,
    /// 0-100
    pub confidence: f64,
    /// Fallback-tier attempts made for this image
    pub tries: u32,
    /// Tier that produced the current classification
    pub service: String,
    /// Accumulated cost, USD
    pub cost: f64,
    pub processing_time_ms: u64,
    /// Day the resized asset became available (reconciliation index)
    pub resized_on: Option<NaiveDate>,
}

impl ImageRecord {
    /// Fresh record as written at upload time
    pub fn new_upload(
        request_id: impl Into<String>,
        image_id: impl Into<String>,
        image_type: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            image_id: image_id.into(),
            image_type: image_type.into(),
            resized: false,
            classification: Classification::None,
            confidence: 0.0,
            tries: 0,
            service: String::new(),
            cost: 0.0,
            processing_time_ms: 0,
            resized_on: None,
        }
    }

    /// Object key of the original upload
    pub fn source_path(&self, source_prefix: &str) -> String {
        format!(
            "{}/{}/{}.{}",
            source_prefix, self.request_id, self.image_id, self.image_type
        )
    }

    /// Object key of the resized asset
    pub fn resized_path(&self, resized_prefix: &str) -> String {
        format!(
            "{}/{}/{}.{}",
            resized_prefix, self.request_id, self.image_id, self.image_type
        )
    }

    /// Still eligible for a fallback-tier attempt
    pub fn eligible_for_fallback(&self, max_tries: u32) -> bool {
        self.classification.is_none() && self.tries < max_tries
    }
}

/// Split `"<image_id>.<image_type>"` as used in object keys
pub fn split_image_file(file_name: &str) -> Option<(&str, &str)> {
    let (id, ext) = file_name.rsplit_once('.')?;
    if id.is_empty() || ext.is_empty() {
        return None;
    }
    Some((id, ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_from_stored_strings() {
        assert_eq!(Classification::from("None"), Classification::None);
        assert_eq!(Classification::from(""), Classification::None);
        assert_eq!(Classification::from("Unclassified"), Classification::Unclassified);
        assert_eq!(
            Classification::from("Kitchen"),
            Classification::Label("Kitchen".to_string())
        );
    }

    #[test]
    fn test_classification_serializes_as_plain_string() {
        let json = serde_json::to_string(&Classification::Label("Pool".into())).unwrap();
        assert_eq!(json, "\"Pool\"");
        let back: Classification = serde_json::from_str("\"None\"").unwrap();
        assert!(back.is_none());
    }

    #[test]
    fn test_resized_path_scheme() {
        let record = ImageRecord::new_upload("R1", "img-1", "png");
        assert_eq!(record.resized_path("resized-images"), "resized-images/R1/img-1.png");
        assert_eq!(record.source_path("source-images"), "source-images/R1/img-1.png");
    }

    #[test]
    fn test_fallback_eligibility_bound() {
        let mut record = ImageRecord::new_upload("R1", "a", "png");
        assert!(record.eligible_for_fallback(2));
        record.tries = 2;
        assert!(!record.eligible_for_fallback(2));
        record.tries = 1;
        record.classification = Classification::Unclassified;
        assert!(!record.eligible_for_fallback(2));
    }

    #[test]
    fn test_split_image_file() {
        assert_eq!(split_image_file("abc.jpeg"), Some(("abc", "jpeg")));
        assert_eq!(split_image_file("a.b.png"), Some(("a.b", "png")));
        assert_eq!(split_image_file("noext"), None);
        assert_eq!(split_image_file(".png"), None);
    }
}
