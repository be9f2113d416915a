//! Fast-tier runner
//!
//! Sub-batches run one detector call per image concurrently; sub-batches
//! themselves are sequential with a pacing delay between them. A failed call
//! only costs that image its label. Each sub-batch is written before the next
//! one starts.

use async_trait::async_trait;
use futures::future::join_all;
use roomsort_common::config::FastTierConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::classifier::LabelDetector;
use super::tier_runner::{ClassificationOutcome, OutcomeSink, TierReport, TierRunner};
use crate::models::labels::fast_tier_label;
use crate::models::{Classification, ImageRecord};

pub struct FastTierRunner {
    detector: Arc<dyn LabelDetector>,
    config: FastTierConfig,
    resized_prefix: String,
}

impl FastTierRunner {
    pub fn new(detector: Arc<dyn LabelDetector>, config: FastTierConfig, resized_prefix: impl Into<String>) -> Self {
        Self {
            detector,
            config,
            resized_prefix: resized_prefix.into(),
        }
    }

    async fn classify_one(&self, record: &ImageRecord) -> ClassificationOutcome {
        let started = Instant::now();
        let image_ref = record.resized_path(&self.resized_prefix);
        let mut updated = record.clone();
        updated.resized = true;

        match self
            .detector
            .detect(&image_ref, self.config.max_labels, self.config.min_confidence)
            .await
        {
            Ok(labels) => {
                let best = labels.iter().find_map(|label| {
                    fast_tier_label(&label.name)
                        .filter(|_| label.confidence > self.config.min_confidence)
                        .map(|name| (name, label.confidence))
                });

                match best {
                    Some((name, confidence)) => {
                        updated.classification = Classification::from(name);
                        updated.confidence = confidence.round();
                    }
                    None => {
                        updated.classification = Classification::None;
                        updated.confidence = 0.0;
                    }
                }
                updated.cost = self.config.unit_price_usd;
                updated.service = self.detector.service_name().to_string();
            }
            Err(e) => {
                warn!(
                    request_id = %record.request_id,
                    image_id = %record.image_id,
                    error = %e,
                    "Label detection failed, deferring image to fallback tier"
                );
                updated.classification = Classification::None;
            }
        }

        updated.processing_time_ms = started.elapsed().as_millis() as u64;
        ClassificationOutcome::attempted(updated)
    }
}

#[async_trait]
impl TierRunner for FastTierRunner {
    async fn classify(&self, batch: &[ImageRecord], sink: &dyn OutcomeSink) -> TierReport {
        let mut report = TierReport::default();
        let chunk_size = self.config.batch_size.max(1);

        for (index, chunk) in batch.chunks(chunk_size).enumerate() {
            if report.write_error.is_some() {
                report
                    .outcomes
                    .extend(chunk.iter().cloned().map(ClassificationOutcome::untouched));
                continue;
            }

            if index > 0 && self.config.pacing_ms > 0 {
                debug!(pacing_ms = self.config.pacing_ms, "Pacing fast-tier sub-batches");
                tokio::time::sleep(Duration::from_millis(self.config.pacing_ms)).await;
            }

            let outcomes = join_all(chunk.iter().map(|record| self.classify_one(record))).await;
            let records: Vec<ImageRecord> = outcomes.iter().map(|o| o.record.clone()).collect();
            if let Err(e) = sink.write(&records).await {
                warn!(error = %e, images = records.len(), "Writing fast-tier results failed, stopping pass");
                report.write_error = Some(e.to_string());
            }
            report.outcomes.extend(outcomes);
        }

        let labeled = report
            .outcomes
            .iter()
            .filter(|o| o.record.classification.is_label())
            .count();
        debug!(images = batch.len(), labeled, "Fast tier pass complete");

        report
    }
}
