//! Effect handlers
//!
//! Each handler performs one effect for one execution and reports the
//! outcome as a [`StepEvent`]. Handlers are safe to re-run: all writes are
//! upserts of the records they computed. Tier results are written as they
//! arrive, so a step cut short by its timeout keeps what it already paid for.

use chrono::{DateTime, Utc};
use roomsort_common::Error;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

use super::execution::WorkflowExecution;
use super::state_machine::{Effect, StepEvent};
use crate::db::images::{self, ImageWriter};
use crate::models::{ImageRecord, RequestStatus};
use crate::services::attempt_tracker::RequestImages;
use crate::services::notifier::NotificationSink;
use crate::services::rate_limiter::RateLimiter;
use crate::services::tier_runner::TierRunner;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// Retried under the step's retry policy
    #[error("transient step failure: {0}")]
    Transient(String),

    /// Fails the execution immediately
    #[error("fatal step failure: {0}")]
    Fatal(String),
}

impl From<Error> for StepError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(_) | Error::Config(_) | Error::NotFound(_) | Error::Serialization(_) => {
                StepError::Fatal(err.to_string())
            }
            _ => StepError::Transient(err.to_string()),
        }
    }
}

/// Collaborators the effect handlers need
pub struct StepContext {
    pub pool: SqlitePool,
    pub fast_tier: Arc<dyn TierRunner>,
    pub fallback_tier: Arc<dyn TierRunner>,
    pub rate_limiter: Arc<RateLimiter>,
    pub notifier: Arc<dyn NotificationSink>,
    /// Fallback attempts allowed per image
    pub max_tries: u32,
}

impl StepContext {
    /// Perform `effect`; suspension and completion are the executor's business
    pub async fn perform(
        &self,
        execution: &WorkflowExecution,
        effect: &Effect,
        now: DateTime<Utc>,
    ) -> Result<StepEvent, StepError> {
        match effect {
            Effect::ClassifyFastTier => self.classify_fast_tier(&execution.request_id).await,
            Effect::ReserveBudget { requested, retry_count } => {
                let decision = self
                    .rate_limiter
                    .check_budget_at(*requested, *retry_count, now)
                    .await?;
                Ok(StepEvent::BudgetChecked(decision))
            }
            Effect::ClassifyFallbackTier => self.classify_fallback_tier(&execution.request_id).await,
            Effect::ComputeStatus => {
                let records = images::load_request(&self.pool, &execution.request_id).await?;
                let elapsed = (now - execution.started_at).to_std().ok();
                Ok(StepEvent::StatusComputed(RequestStatus::summarize(
                    &execution.request_id,
                    &records,
                    elapsed,
                )))
            }
            Effect::PublishResult(status) => {
                self.notifier.publish_result(status).await?;
                Ok(StepEvent::Published)
            }
            Effect::PublishAlert { message } => {
                self.notifier
                    .publish_alert(&execution.request_id, message)
                    .await?;
                Ok(StepEvent::Published)
            }
            Effect::Suspend { .. } | Effect::Finish(_) => Err(StepError::Fatal(format!(
                "effect {:?} is handled by the executor",
                effect
            ))),
        }
    }

    async fn load_images(&self, request_id: &str) -> Result<RequestImages, StepError> {
        let records = images::load_request(&self.pool, request_id).await?;
        Ok(RequestImages::new(request_id, records, self.max_tries)?)
    }

    async fn classify_fast_tier(&self, request_id: &str) -> Result<StepEvent, StepError> {
        let request_images = self.load_images(request_id).await?;

        if !request_images.all_resized() {
            warn!(
                request_id,
                images = request_images.records().len(),
                "Request has no images or unresized images, skipping classification"
            );
            return Ok(StepEvent::FastTierCompleted {
                unclassified_images_count: 0,
            });
        }

        let pending: Vec<ImageRecord> = request_images.pending_for_fast_tier().into_iter().cloned().collect();
        let writer = ImageWriter::new(self.pool.clone());
        let report = self.fast_tier.classify(&pending, &writer).await;
        if let Some(write_error) = report.write_error {
            return Err(StepError::Transient(write_error));
        }

        let fast_tier_none = report.unclassified();
        let unclassified_images_count = request_images.unclassified_count(&fast_tier_none);

        info!(
            request_id,
            processed = report.attempted_count(),
            unclassified_images_count,
            "Fast tier complete"
        );
        Ok(StepEvent::FastTierCompleted {
            unclassified_images_count,
        })
    }

    async fn classify_fallback_tier(&self, request_id: &str) -> Result<StepEvent, StepError> {
        let request_images = self.load_images(request_id).await?;

        let fresh: Vec<ImageRecord> = request_images.pending_for_fast_tier().into_iter().cloned().collect();
        let batch: Vec<ImageRecord> = request_images
            .pending_for_fallback_tier(&fresh)
            .into_iter()
            .cloned()
            .collect();

        let writer = ImageWriter::new(self.pool.clone());
        let report = self.fallback_tier.classify(&batch, &writer).await;

        info!(
            request_id,
            batch = batch.len(),
            attempted = report.attempted_count(),
            rate_limit_error = report.rate_limit_error,
            "Fallback tier pass complete"
        );

        if let Some(write_error) = report.write_error {
            return Err(StepError::Transient(write_error));
        }
        if let Some(failure) = report.failure {
            return Err(StepError::Transient(failure.to_string()));
        }

        Ok(StepEvent::FallbackTierCompleted {
            rate_limit_error: report.rate_limit_error,
        })
    }
}
