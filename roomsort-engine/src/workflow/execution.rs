//! Persisted workflow execution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state_machine::{ExecutionPayload, ExecutionStatus, WorkflowState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub execution_id: Uuid,
    pub request_id: String,
    /// Resting state; its effect is what the next step performs
    pub state: WorkflowState,
    pub payload: ExecutionPayload,
    pub status: ExecutionStatus,
    /// Failed attempts of the current step
    pub attempt: u32,
    /// Unix millis at which the next step becomes due
    pub wake_at: i64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl WorkflowExecution {
    /// New execution resting in the initial state, due immediately
    pub fn new(request_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        let start = super::state_machine::start(request_id);
        Self {
            execution_id: Uuid::new_v4(),
            request_id: start.payload.request_id.clone(),
            state: start.state,
            payload: start.payload,
            status: ExecutionStatus::Running,
            attempt: 0,
            wake_at: now.timestamp_millis(),
            started_at: now,
            updated_at: now,
            ended_at: None,
            last_error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }
}
