//! Step executor
//!
//! Polls for due executions, claims each under a lease, performs one effect,
//! feeds the outcome through the state machine and persists the result.
//! Different executions advance concurrently; a single execution never has
//! more than one step in flight.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use roomsort_common::config::WorkflowConfig;
use roomsort_common::events::{EventBus, RoomsortEvent};
use roomsort_common::{time, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::execution::WorkflowExecution;
use super::retry::{retry_delay, StepRetryPolicies};
use super::state_machine::{
    effect_for, transition, Effect, ExecutionStatus, StepEvent, TransitionPolicy, WorkflowState,
};
use super::steps::{StepContext, StepError};
use crate::db::executions;

/// Executions claimed per poll
const CLAIM_BATCH: u32 = 32;

pub struct StepExecutor {
    pool: SqlitePool,
    context: Arc<StepContext>,
    event_bus: EventBus,
    retry_policies: StepRetryPolicies,
    transition_policy: TransitionPolicy,
    step_timeout: Duration,
    lease: Duration,
    poll_interval: Duration,
}

impl StepExecutor {
    pub fn new(
        pool: SqlitePool,
        context: Arc<StepContext>,
        event_bus: EventBus,
        config: &WorkflowConfig,
        transition_policy: TransitionPolicy,
    ) -> Self {
        Self {
            pool,
            context,
            event_bus,
            retry_policies: StepRetryPolicies::from_config(config),
            transition_policy,
            step_timeout: Duration::from_secs(config.step_timeout_secs),
            lease: Duration::from_secs(config.step_lease_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
        }
    }

    /// Advance every due execution by one step
    pub async fn tick(&self) -> Result<usize> {
        self.tick_at(time::now()).await
    }

    /// Advance executions due at `now`; returns how many were claimed
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let now_ms = now.timestamp_millis();
        let lease_until = now_ms + self.lease.as_millis() as i64;
        let claimed = executions::claim_due(&self.pool, now_ms, lease_until, CLAIM_BATCH).await?;
        let count = claimed.len();

        if count > 0 {
            debug!(count, "Claimed due executions");
        }

        join_all(claimed.into_iter().map(|execution| self.advance(execution, now))).await;
        Ok(count)
    }

    /// Poll until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "Step executor started");
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Step executor poll failed");
                    }
                }
            }
        }

        info!("Step executor stopped");
    }

    async fn advance(&self, mut execution: WorkflowExecution, now: DateTime<Utc>) {
        let state = execution.state;

        let event = match state {
            // Only claimable once the suspension ran out
            WorkflowState::WaitForRateLimitLift => Ok(StepEvent::WaitElapsed),
            _ => self.perform(&execution, now).await,
        };

        let outcome = event.and_then(|event| {
            transition(state, &execution.payload, event, &self.transition_policy)
                .map_err(|e| StepError::Fatal(e.to_string()))
        });

        match outcome {
            Ok(next) => {
                for entered in &next.path {
                    info!(
                        execution_id = %execution.execution_id,
                        request_id = %execution.request_id,
                        from = %state,
                        state = %entered,
                        "State entered"
                    );
                    self.event_bus.emit_lossy(RoomsortEvent::StateEntered {
                        execution_id: execution.execution_id,
                        request_id: execution.request_id.clone(),
                        state: entered.to_string(),
                        timestamp: now,
                    });
                }

                execution.state = next.state;
                execution.payload = next.payload;
                execution.attempt = 0;
                execution.last_error = None;

                match next.effect {
                    Effect::Finish(status) => {
                        execution.status = status;
                        execution.ended_at = Some(now);
                        info!(
                            execution_id = %execution.execution_id,
                            request_id = %execution.request_id,
                            status = status.as_str(),
                            "Workflow execution finished"
                        );
                    }
                    Effect::Suspend { seconds } => {
                        execution.wake_at = wake_after(now, Duration::from_secs(seconds));
                        info!(
                            execution_id = %execution.execution_id,
                            request_id = %execution.request_id,
                            wait_seconds = seconds,
                            retry_count = execution.payload.retry_count,
                            "Waiting for rate limit to lift"
                        );
                    }
                    _ => execution.wake_at = now.timestamp_millis(),
                }
            }
            Err(StepError::Transient(message)) => self.schedule_retry(&mut execution, now, message),
            Err(StepError::Fatal(message)) => self.fail(&mut execution, now, message),
        }

        execution.updated_at = now;
        if let Err(e) = executions::save_execution(&self.pool, &execution).await {
            // The lease expires and the step is re-run
            error!(
                execution_id = %execution.execution_id,
                error = %e,
                "Failed to persist step outcome"
            );
        }
    }

    async fn perform(&self, execution: &WorkflowExecution, now: DateTime<Utc>) -> std::result::Result<StepEvent, StepError> {
        let effect = effect_for(execution.state, &execution.payload);
        match tokio::time::timeout(self.step_timeout, self.context.perform(execution, &effect, now)).await {
            Ok(result) => result,
            Err(_) => Err(StepError::Transient(format!(
                "step {} timed out after {:?}",
                execution.state, self.step_timeout
            ))),
        }
    }

    fn schedule_retry(&self, execution: &mut WorkflowExecution, now: DateTime<Utc>, message: String) {
        let policy = self.retry_policies.for_state(execution.state);
        let retry = execution.attempt + 1;

        if retry > policy.max_retries {
            let message = format!("{} (retries exhausted after {} attempts)", message, retry);
            self.fail(execution, now, message);
            return;
        }

        let delay = retry_delay(&policy, retry);
        warn!(
            execution_id = %execution.execution_id,
            request_id = %execution.request_id,
            state = %execution.state,
            attempt = retry,
            delay_secs = delay.as_secs(),
            error = %message,
            "Step failed, retry scheduled"
        );
        execution.attempt = retry;
        execution.wake_at = wake_after(now, delay);
        execution.last_error = Some(message);
    }

    fn fail(&self, execution: &mut WorkflowExecution, now: DateTime<Utc>, message: String) {
        error!(
            execution_id = %execution.execution_id,
            request_id = %execution.request_id,
            state = %execution.state,
            error = %message,
            "Workflow execution failed"
        );
        self.event_bus.emit_lossy(RoomsortEvent::WorkflowFailed {
            execution_id: execution.execution_id,
            request_id: execution.request_id.clone(),
            error: message.clone(),
            timestamp: now,
        });
        execution.status = ExecutionStatus::Failed;
        execution.ended_at = Some(now);
        execution.last_error = Some(message);
    }
}

fn wake_after(now: DateTime<Utc>, delay: Duration) -> i64 {
    let delay = ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::days(3650));
    now.checked_add_signed(delay)
        .unwrap_or(now)
        .timestamp_millis()
}
