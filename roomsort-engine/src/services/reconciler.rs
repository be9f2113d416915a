//! Backfill sweep
//!
//! Finds requests whose images are all resized but still carry unclassified
//! images, and restarts their workflow. The sweep stands down while any
//! execution is running so it never competes for the shared budget.

use chrono::NaiveDate;
use roomsort_common::config::ReconcilerConfig;
use roomsort_common::{time, Error, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::attempt_tracker::RequestImages;
use crate::db::images;
use crate::workflow::scheduler::ExecutionScheduler;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Another execution was running, nothing was scanned
    pub skipped_active: bool,
    /// `(request_id, execution_id)` of each execution started
    pub started: Vec<(String, Uuid)>,
}

pub struct Reconciler {
    pool: SqlitePool,
    scheduler: Arc<dyn ExecutionScheduler>,
    config: ReconcilerConfig,
    max_tries: u32,
}

impl Reconciler {
    pub fn new(
        pool: SqlitePool,
        scheduler: Arc<dyn ExecutionScheduler>,
        config: ReconcilerConfig,
        max_tries: u32,
    ) -> Self {
        Self {
            pool,
            scheduler,
            config,
            max_tries,
        }
    }

    /// One sweep over the lookback window ending the day before `today`
    pub async fn run_once(&self, today: NaiveDate) -> Result<ReconcileReport> {
        let running = self.scheduler.list_running().await?;
        if !running.is_empty() {
            debug!(running = running.len(), "Executions active, skipping backfill");
            return Ok(ReconcileReport {
                skipped_active: true,
                started: Vec::new(),
            });
        }

        let mut report = ReconcileReport::default();

        // Oldest day first
        for offset in (1..=self.config.lookback_days).rev() {
            let day = time::days_before(today, offset);
            let candidates =
                images::requests_pending_on(&self.pool, day, self.config.tries_ceiling).await?;
            debug!(%day, candidates = candidates.len(), "Backfill day scanned");

            for request_id in candidates {
                if report.started.len() >= self.config.max_starts {
                    break;
                }
                if !self.ready(&request_id).await? {
                    continue;
                }

                let execution_id = self.scheduler.start_execution(&request_id).await?;
                info!(%request_id, %execution_id, %day, "Backfill restarted request");
                report.started.push((request_id, execution_id));
            }

            if !report.started.is_empty() {
                break;
            }
        }

        Ok(report)
    }

    /// Fully resized and holding an image some tier would still attempt;
    /// the day query alone admits images the fallback tier has given up on
    async fn ready(&self, request_id: &str) -> Result<bool> {
        let records = images::load_request(&self.pool, request_id).await?;
        match RequestImages::new(request_id, records, self.max_tries) {
            Ok(images) => Ok(images.all_resized() && images.has_pending_work()),
            Err(Error::Validation(reason)) => {
                warn!(request_id, %reason, "Skipping malformed request during backfill");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Sweep on a fixed interval until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        info!(interval_secs = period.as_secs(), "Backfill reconciler started");
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let today = time::resize_date(time::now());
                    match self.run_once(today).await {
                        Ok(report) if !report.started.is_empty() => {
                            info!(started = report.started.len(), "Backfill sweep complete");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Backfill sweep failed"),
                    }
                }
            }
        }

        info!("Backfill reconciler stopped");
    }
}
