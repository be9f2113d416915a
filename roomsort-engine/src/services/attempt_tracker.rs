//! Per-request attempt bookkeeping
//!
//! Pure selection logic over one request's image records. Nothing here
//! touches storage.

use roomsort_common::{Error, Result};
use std::collections::HashSet;

use crate::models::ImageRecord;

/// Validated set of records belonging to one request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestImages {
    request_id: String,
    records: Vec<ImageRecord>,
    max_tries: u32,
}

impl RequestImages {
    /// Rejects records from another request, empty ids and duplicate ids
    pub fn new(request_id: impl Into<String>, records: Vec<ImageRecord>, max_tries: u32) -> Result<Self> {
        let request_id = request_id.into();
        if request_id.trim().is_empty() {
            return Err(Error::Validation("request id must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for record in &records {
            if record.request_id != request_id {
                return Err(Error::Validation(format!(
                    "image {} belongs to request {}, not {}",
                    record.image_id, record.request_id, request_id
                )));
            }
            if record.image_id.trim().is_empty() {
                return Err(Error::Validation("image id must not be empty".to_string()));
            }
            if !seen.insert(record.image_id.as_str()) {
                return Err(Error::Validation(format!("duplicate image id {}", record.image_id)));
            }
        }

        Ok(Self {
            request_id,
            records,
            max_tries,
        })
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ImageRecord> {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Never classified and never seen by the fallback tier
    pub fn pending_for_fast_tier(&self) -> Vec<&ImageRecord> {
        self.records
            .iter()
            .filter(|r| r.classification.is_none() && r.tries == 0)
            .collect()
    }

    /// Tried by the fallback tier before, still unclassified, tries left
    pub fn previously_tried_unclassified(&self) -> Vec<&ImageRecord> {
        self.records
            .iter()
            .filter(|r| r.classification.is_none() && r.tries > 0 && r.tries < self.max_tries)
            .collect()
    }

    /// Fallback candidates: previously tried images plus the fast tier's
    /// fresh `None` outcomes, without duplicates, in image id order
    pub fn pending_for_fallback_tier<'a>(
        &'a self,
        fast_tier_none: &'a [ImageRecord],
    ) -> Vec<&'a ImageRecord> {
        let mut pending: Vec<&ImageRecord> = self.previously_tried_unclassified();
        let mut seen: HashSet<String> = pending.iter().map(|r| r.image_id.clone()).collect();

        for record in fast_tier_none {
            if record.eligible_for_fallback(self.max_tries) && seen.insert(record.image_id.clone()) {
                pending.push(record);
            }
        }

        pending.sort_by(|a, b| a.image_id.cmp(&b.image_id));
        pending
    }

    /// Size of the fallback batch after a fast-tier pass
    pub fn unclassified_count(&self, fast_tier_none: &[ImageRecord]) -> u32 {
        self.pending_for_fallback_tier(fast_tier_none).len() as u32
    }

    /// Some image can still be classified by either tier
    pub fn has_pending_work(&self) -> bool {
        !self.pending_for_fast_tier().is_empty() || !self.previously_tried_unclassified().is_empty()
    }

    /// Every image has a resized asset; an empty request is never ready
    pub fn all_resized(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(|r| r.resized)
    }
}
