//! SQLite-backed rate budget counters

use async_trait::async_trait;
use roomsort_common::Result;
use sqlx::SqlitePool;

use crate::services::rate_limiter::BudgetStore;
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Budget counters in the `rate_budget` table
#[derive(Clone)]
pub struct SqliteBudgetStore {
    pool: SqlitePool,
}

impl SqliteBudgetStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Current counter value, 0 for an unused window
    pub async fn used(&self, window_key: &str) -> Result<u32> {
        let used: Option<i64> =
            sqlx::query_scalar("SELECT used FROM rate_budget WHERE window_key = ?")
                .bind(window_key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(used.unwrap_or(0).max(0) as u32)
    }
}

#[async_trait]
impl BudgetStore for SqliteBudgetStore {
    async fn try_consume(
        &self,
        window_key: &str,
        requested: u32,
        limit: u32,
        expires_at: i64,
    ) -> Result<Option<u32>> {
        if requested > limit {
            return Ok(None);
        }

        let pool = &self.pool;
        // The WHERE clause on the upsert turns a refused increment into zero
        // affected rows, so RETURNING yields nothing.
        let used: Option<i64> = retry_on_lock("rate_budget.try_consume", DEFAULT_MAX_LOCK_WAIT_MS, || async move {
            let used = sqlx::query_scalar(
                r#"
                INSERT INTO rate_budget (window_key, used, expires_at)
                VALUES (?, ?, ?)
                ON CONFLICT(window_key) DO UPDATE SET
                    used = rate_budget.used + excluded.used
                WHERE rate_budget.used + excluded.used <= ?
                RETURNING used
                "#,
            )
            .bind(window_key)
            .bind(i64::from(requested))
            .bind(expires_at)
            .bind(i64::from(limit))
            .fetch_optional(pool)
            .await?;
            Ok(used)
        })
        .await?;

        Ok(used.map(|u| u.max(0) as u32))
    }

    async fn purge_expired(&self, now: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rate_budget WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            tracing::debug!(purged = result.rows_affected(), "Expired budget windows removed");
        }
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database_pool;

    async fn store() -> (tempfile::TempDir, SqliteBudgetStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("budget.db")).await.unwrap();
        (dir, SqliteBudgetStore::new(pool))
    }

    #[tokio::test]
    async fn test_conditional_increment() {
        let (_dir, store) = store().await;

        assert_eq!(store.try_consume("w", 3, 5, 100).await.unwrap(), Some(3));
        assert_eq!(store.try_consume("w", 2, 5, 100).await.unwrap(), Some(5));
        assert_eq!(store.try_consume("w", 1, 5, 100).await.unwrap(), None);
        assert_eq!(store.used("w").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_refused_increment_leaves_counter() {
        let (_dir, store) = store().await;
        store.try_consume("w", 4, 5, 100).await.unwrap();

        assert_eq!(store.try_consume("w", 2, 5, 100).await.unwrap(), None);
        assert_eq!(store.used("w").await.unwrap(), 4);
        assert_eq!(store.try_consume("w", 1, 5, 100).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_first_use_over_limit_creates_nothing() {
        let (_dir, store) = store().await;
        assert_eq!(store.try_consume("w", 6, 5, 100).await.unwrap(), None);
        assert_eq!(store.used("w").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (_dir, store) = store().await;
        store.try_consume("old", 1, 5, 100).await.unwrap();
        store.try_consume("new", 1, 5, 200).await.unwrap();

        assert_eq!(store.purge_expired(150).await.unwrap(), 1);
        assert_eq!(store.used("old").await.unwrap(), 0);
        assert_eq!(store.used("new").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_never_overcommit() {
        let (_dir, store) = store().await;
        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.try_consume("w", 1, 10, 100).await.unwrap()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                granted += 1;
            }
        }
        assert_eq!(granted, 10);
        assert_eq!(store.used("w").await.unwrap(), 10);
    }
}
