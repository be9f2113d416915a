//! Fallback-tier runner
//!
//! Strictly one image at a time: every call is paid for and counted against
//! the shared budget, so a rate-limit answer must stop the pass before the
//! next call goes out. Each answer is written before the next call as well.

use async_trait::async_trait;
use roomsort_common::config::FallbackTierConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::classifier::{ClassifierError, VisionClassifier};
use super::object_store::ObjectStore;
use super::tier_runner::{ClassificationOutcome, OutcomeSink, TierReport, TierRunner};
use crate::models::labels::{fallback_prompt, match_fallback_label};
use crate::models::ImageRecord;

pub struct FallbackTierRunner {
    classifier: Arc<dyn VisionClassifier>,
    object_store: Arc<dyn ObjectStore>,
    config: FallbackTierConfig,
    /// Fast-tier unit price, charged on top of the token cost
    surcharge_usd: f64,
    resized_prefix: String,
    url_ttl: Duration,
    prompt: String,
}

impl FallbackTierRunner {
    pub fn new(
        classifier: Arc<dyn VisionClassifier>,
        object_store: Arc<dyn ObjectStore>,
        config: FallbackTierConfig,
        surcharge_usd: f64,
        resized_prefix: impl Into<String>,
        url_ttl: Duration,
    ) -> Self {
        Self {
            classifier,
            object_store,
            config,
            surcharge_usd,
            resized_prefix: resized_prefix.into(),
            url_ttl,
            prompt: fallback_prompt(),
        }
    }

    pub fn max_tries(&self) -> u32 {
        self.config.max_tries
    }

    async fn classify_one(&self, record: &ImageRecord) -> Result<ImageRecord, ClassifierError> {
        let started = Instant::now();
        let path = record.resized_path(&self.resized_prefix);
        let url = self
            .object_store
            .presigned_read_url(&path, self.url_ttl)
            .map_err(|e| ClassifierError::Network(format!("presign {} failed: {}", path, e)))?;

        let response = self.classifier.classify(&url, &self.prompt).await?;

        let mut updated = record.clone();
        updated.classification = match_fallback_label(&response.text);
        updated.confidence = self.config.reported_confidence;
        updated.cost = response.tokens_used as f64 * self.config.per_token_rate_usd + self.surcharge_usd;
        updated.service = self.classifier.service_name().to_string();
        updated.tries = record.tries + 1;
        updated.processing_time_ms = started.elapsed().as_millis() as u64;

        debug!(
            request_id = %record.request_id,
            image_id = %record.image_id,
            classification = %updated.classification,
            tokens = response.tokens_used,
            "Fallback classification"
        );
        Ok(updated)
    }
}

#[async_trait]
impl TierRunner for FallbackTierRunner {
    async fn classify(&self, batch: &[ImageRecord], sink: &dyn OutcomeSink) -> TierReport {
        let mut ordered: Vec<&ImageRecord> = batch.iter().collect();
        ordered.sort_by(|a, b| a.image_id.cmp(&b.image_id));

        let mut report = TierReport::default();
        let mut stopped = false;

        for record in ordered {
            if stopped || !record.eligible_for_fallback(self.config.max_tries) {
                report.outcomes.push(ClassificationOutcome::untouched(record.clone()));
                continue;
            }

            match self.classify_one(record).await {
                Ok(updated) => {
                    if let Err(e) = sink.write(std::slice::from_ref(&updated)).await {
                        warn!(
                            request_id = %record.request_id,
                            image_id = %record.image_id,
                            error = %e,
                            "Writing fallback result failed, stopping pass"
                        );
                        report.write_error = Some(e.to_string());
                        stopped = true;
                    }
                    report.outcomes.push(ClassificationOutcome::attempted(updated));
                }
                Err(ClassifierError::RateLimited { remaining_requests }) => {
                    info!(
                        request_id = %record.request_id,
                        image_id = %record.image_id,
                        ?remaining_requests,
                        "Fallback tier rate limited, stopping pass"
                    );
                    report.rate_limit_error = true;
                    stopped = true;
                    report.outcomes.push(ClassificationOutcome::untouched(record.clone()));
                }
                Err(e) => {
                    warn!(
                        request_id = %record.request_id,
                        image_id = %record.image_id,
                        error = %e,
                        "Fallback classification failed, stopping pass"
                    );
                    report.failure = Some(e);
                    stopped = true;
                    report.outcomes.push(ClassificationOutcome::untouched(record.clone()));
                }
            }
        }

        report
    }
}
