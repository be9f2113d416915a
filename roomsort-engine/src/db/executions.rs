//! Workflow execution persistence
//!
//! A running execution is due when `wake_at <= now`. Claiming pushes
//! `wake_at` forward by the lease, so a crashed executor's step becomes due
//! again once the lease runs out.

use chrono::{DateTime, Utc};
use roomsort_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use crate::workflow::execution::WorkflowExecution;
use crate::workflow::state_machine::{ExecutionStatus, WorkflowState};

const SELECT_COLUMNS: &str = "execution_id, request_id, state, payload, status, attempt, wake_at, started_at, updated_at, ended_at, last_error";

/// Insert a new execution unless one is already running for the request
///
/// Returns false when the running-per-request uniqueness rule refused it.
pub async fn insert_if_idle(pool: &SqlitePool, execution: &WorkflowExecution) -> Result<bool> {
    let payload = serde_json::to_string(&execution.payload)?;
    let execution_id = execution.execution_id.to_string();
    let started_at = execution.started_at.to_rfc3339();
    let updated_at = execution.updated_at.to_rfc3339();
    let (payload, execution_id, started_at, updated_at) = (&payload, &execution_id, &started_at, &updated_at);

    let rows = retry_on_lock("insert_execution", DEFAULT_MAX_LOCK_WAIT_MS, || async move {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO workflow_executions (
                execution_id, request_id, state, payload, status,
                attempt, wake_at, started_at, updated_at, ended_at, last_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL)
            "#,
        )
        .bind(execution_id)
        .bind(&execution.request_id)
        .bind(execution.state.as_str())
        .bind(payload)
        .bind(execution.status.as_str())
        .bind(i64::from(execution.attempt))
        .bind(execution.wake_at)
        .bind(started_at)
        .bind(updated_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    })
    .await?;

    Ok(rows == 1)
}

/// Persist the outcome of a step
pub async fn save_execution(pool: &SqlitePool, execution: &WorkflowExecution) -> Result<()> {
    let payload = serde_json::to_string(&execution.payload)?;
    let execution_id = execution.execution_id.to_string();
    let updated_at = execution.updated_at.to_rfc3339();
    let ended_at = execution.ended_at.map(|dt| dt.to_rfc3339());
    let (payload, execution_id, updated_at, ended_at) = (&payload, &execution_id, &updated_at, &ended_at);

    retry_on_lock("save_execution", DEFAULT_MAX_LOCK_WAIT_MS, || async move {
        sqlx::query(
            r#"
            UPDATE workflow_executions SET
                state = ?, payload = ?, status = ?, attempt = ?, wake_at = ?,
                updated_at = ?, ended_at = ?, last_error = ?
            WHERE execution_id = ?
            "#,
        )
        .bind(execution.state.as_str())
        .bind(payload)
        .bind(execution.status.as_str())
        .bind(i64::from(execution.attempt))
        .bind(execution.wake_at)
        .bind(updated_at)
        .bind(ended_at)
        .bind(&execution.last_error)
        .bind(execution_id)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

pub async fn load_execution(pool: &SqlitePool, execution_id: Uuid) -> Result<Option<WorkflowExecution>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM workflow_executions WHERE execution_id = ?",
        SELECT_COLUMNS
    ))
    .bind(execution_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_execution).transpose()
}

/// Id of the execution currently running for `request_id`
pub async fn find_running_for_request(pool: &SqlitePool, request_id: &str) -> Result<Option<Uuid>> {
    let id: Option<String> = sqlx::query_scalar(
        "SELECT execution_id FROM workflow_executions WHERE request_id = ? AND status = ?",
    )
    .bind(request_id)
    .bind(ExecutionStatus::Running.as_str())
    .fetch_optional(pool)
    .await?;

    id.map(|s| parse_uuid(&s)).transpose()
}

pub async fn list_running(pool: &SqlitePool) -> Result<Vec<WorkflowExecution>> {
    list_by_status(pool, ExecutionStatus::Running).await
}

pub async fn list_by_status(pool: &SqlitePool, status: ExecutionStatus) -> Result<Vec<WorkflowExecution>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM workflow_executions WHERE status = ? ORDER BY started_at, execution_id",
        SELECT_COLUMNS
    ))
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_execution).collect()
}

/// Claim up to `limit` due executions, leasing each until `lease_until` (unix ms)
pub async fn claim_due(pool: &SqlitePool, now_ms: i64, lease_until: i64, limit: u32) -> Result<Vec<WorkflowExecution>> {
    let rows = retry_on_lock("claim_due", DEFAULT_MAX_LOCK_WAIT_MS, || async move {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE workflow_executions SET wake_at = ?1
            WHERE status = ?2 AND wake_at <= ?3 AND execution_id IN (
                SELECT execution_id FROM workflow_executions
                WHERE status = ?2 AND wake_at <= ?3
                ORDER BY wake_at
                LIMIT ?4
            )
            RETURNING {}
            "#,
            SELECT_COLUMNS
        ))
        .bind(lease_until)
        .bind(ExecutionStatus::Running.as_str())
        .bind(now_ms)
        .bind(i64::from(limit))
        .fetch_all(pool)
        .await?;
        Ok(rows)
    })
    .await?;

    rows.iter().map(row_to_execution).collect()
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid execution id {}: {}", value, e)))
}

fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

fn row_to_execution(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowExecution> {
    let execution_id: String = row.try_get("execution_id")?;
    let state: String = row.try_get("state")?;
    let payload: String = row.try_get("payload")?;
    let status: String = row.try_get("status")?;
    let attempt: i64 = row.try_get("attempt")?;
    let started_at: String = row.try_get("started_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let ended_at: Option<String> = row.try_get("ended_at")?;

    Ok(WorkflowExecution {
        execution_id: parse_uuid(&execution_id)?,
        request_id: row.try_get("request_id")?,
        state: state
            .parse::<WorkflowState>()
            .map_err(|e| Error::Internal(e.to_string()))?,
        payload: serde_json::from_str(&payload)?,
        status: status
            .parse::<ExecutionStatus>()
            .map_err(|e| Error::Internal(e.to_string()))?,
        attempt: attempt.max(0) as u32,
        wake_at: row.try_get("wake_at")?,
        started_at: parse_timestamp(&started_at, "started_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
        ended_at: ended_at
            .map(|s| parse_timestamp(&s, "ended_at"))
            .transpose()?,
        last_error: row.try_get("last_error")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database_pool;

    async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("exec.db")).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn test_one_running_execution_per_request() {
        let (_dir, pool) = test_pool().await;
        let now = Utc::now();
        let first = WorkflowExecution::new("R1", now);
        let second = WorkflowExecution::new("R1", now);

        assert!(insert_if_idle(&pool, &first).await.unwrap());
        assert!(!insert_if_idle(&pool, &second).await.unwrap());
        assert_eq!(
            find_running_for_request(&pool, "R1").await.unwrap(),
            Some(first.execution_id)
        );

        let mut finished = first.clone();
        finished.status = ExecutionStatus::Succeeded;
        finished.ended_at = Some(now);
        save_execution(&pool, &finished).await.unwrap();

        assert!(insert_if_idle(&pool, &second).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_due_leases_execution() {
        let (_dir, pool) = test_pool().await;
        let now = Utc::now();
        let execution = WorkflowExecution::new("R1", now);
        insert_if_idle(&pool, &execution).await.unwrap();

        let now_ms = now.timestamp_millis();
        let claimed = claim_due(&pool, now_ms, now_ms + 10_000, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].wake_at, now_ms + 10_000);
        assert_eq!(claimed[0].payload.request_id, "R1");

        // Leased: not due again until the lease ends
        assert!(claim_due(&pool, now_ms + 1, now_ms + 20_000, 10).await.unwrap().is_empty());
        assert_eq!(
            claim_due(&pool, now_ms + 10_000, now_ms + 20_000, 10).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_round_trip_through_row() {
        let (_dir, pool) = test_pool().await;
        let mut execution = WorkflowExecution::new("R9", Utc::now());
        insert_if_idle(&pool, &execution).await.unwrap();

        execution.state = WorkflowState::WaitForRateLimitLift;
        execution.payload.wait_duration = 60;
        execution.attempt = 2;
        execution.last_error = Some("boom".to_string());
        save_execution(&pool, &execution).await.unwrap();

        let loaded = load_execution(&pool, execution.execution_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, WorkflowState::WaitForRateLimitLift);
        assert_eq!(loaded.payload.wait_duration, 60);
        assert_eq!(loaded.attempt, 2);
        assert_eq!(loaded.last_error.as_deref(), Some("boom"));
    }
}
