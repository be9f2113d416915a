//! Execution scheduler
//!
//! Starts, lists and inspects workflow executions. The step executor picks
//! started executions up from the same table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roomsort_common::events::{EventBus, RoomsortEvent};
use roomsort_common::{time, Error, Result};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use super::execution::WorkflowExecution;
use crate::db::executions;

#[async_trait]
pub trait ExecutionScheduler: Send + Sync {
    /// Start an execution for `request_id`, or return the one already running
    async fn start_execution(&self, request_id: &str) -> Result<Uuid>;

    async fn list_running(&self) -> Result<Vec<WorkflowExecution>>;

    async fn started_at(&self, execution_id: Uuid) -> Result<Option<DateTime<Utc>>>;
}

pub struct SqliteScheduler {
    pool: SqlitePool,
    event_bus: EventBus,
}

impl SqliteScheduler {
    pub fn new(pool: SqlitePool, event_bus: EventBus) -> Self {
        Self { pool, event_bus }
    }
}

#[async_trait]
impl ExecutionScheduler for SqliteScheduler {
    async fn start_execution(&self, request_id: &str) -> Result<Uuid> {
        if request_id.trim().is_empty() {
            return Err(Error::Validation("request id must not be empty".to_string()));
        }

        let execution = WorkflowExecution::new(request_id, time::now());
        if executions::insert_if_idle(&self.pool, &execution).await? {
            info!(
                execution_id = %execution.execution_id,
                request_id,
                "Workflow execution started"
            );
            self.event_bus.emit_lossy(RoomsortEvent::WorkflowStarted {
                execution_id: execution.execution_id,
                request_id: request_id.to_string(),
                timestamp: execution.started_at,
            });
            return Ok(execution.execution_id);
        }

        let existing = executions::find_running_for_request(&self.pool, request_id)
            .await?
            // Finished between the insert and the lookup
            .ok_or_else(|| Error::Internal(format!("Execution for {} vanished during start", request_id)))?;
        debug!(execution_id = %existing, request_id, "Execution already running");
        Ok(existing)
    }

    async fn list_running(&self) -> Result<Vec<WorkflowExecution>> {
        executions::list_running(&self.pool).await
    }

    async fn started_at(&self, execution_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        Ok(executions::load_execution(&self.pool, execution_id)
            .await?
            .map(|e| e.started_at))
    }
}
