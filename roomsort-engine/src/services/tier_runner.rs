//! Shared contract of the two classification tiers

use async_trait::async_trait;

use super::classifier::ClassifierError;
use crate::models::ImageRecord;

/// Result for one input image
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationOutcome {
    /// Record as it should be stored after this pass
    pub record: ImageRecord,
    /// False when the tier skipped the image; such records are unchanged
    pub attempted: bool,
}

impl ClassificationOutcome {
    pub fn attempted(record: ImageRecord) -> Self {
        Self { record, attempted: true }
    }

    pub fn untouched(record: ImageRecord) -> Self {
        Self { record, attempted: false }
    }
}

/// One outcome per input image, in processing order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TierReport {
    pub outcomes: Vec<ClassificationOutcome>,
    /// The downstream service rate-limited us and the pass stopped early
    pub rate_limit_error: bool,
    /// A non-rate-limit error stopped the pass early
    pub failure: Option<ClassifierError>,
    /// Writing an outcome failed and the pass stopped early
    pub write_error: Option<String>,
}

impl TierReport {
    /// Records that must be written back
    pub fn written(&self) -> Vec<ImageRecord> {
        self.outcomes
            .iter()
            .filter(|o| o.attempted)
            .map(|o| o.record.clone())
            .collect()
    }

    /// Attempted records still without a classification
    pub fn unclassified(&self) -> Vec<ImageRecord> {
        self.outcomes
            .iter()
            .filter(|o| o.attempted && o.record.classification.is_none())
            .map(|o| o.record.clone())
            .collect()
    }

    pub fn attempted_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.attempted).count()
    }
}

/// Receives attempted records as soon as a tier produces them, so work
/// already paid for survives a pass that is cut short
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn write(&self, records: &[ImageRecord]) -> roomsort_common::Result<()>;
}

#[async_trait]
pub trait TierRunner: Send + Sync {
    /// Classify `batch`, writing every attempted record to `sink` before
    /// the next downstream call goes out
    async fn classify(&self, batch: &[ImageRecord], sink: &dyn OutcomeSink) -> TierReport;
}
