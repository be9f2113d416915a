//! Image record persistence
//!
//! Writes are upserts keyed on `(request_id, image_id)`, so replaying a batch
//! after a retried step leaves the same rows behind.

use chrono::NaiveDate;
use roomsort_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use async_trait::async_trait;

use crate::models::{Classification, ImageRecord};
use crate::services::tier_runner::OutcomeSink;
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Writes tier outcomes straight into the images table
pub struct ImageWriter {
    pool: SqlitePool,
}

impl ImageWriter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutcomeSink for ImageWriter {
    async fn write(&self, records: &[ImageRecord]) -> Result<()> {
        upsert_images(&self.pool, records).await
    }
}

/// Records written per transaction
pub const WRITE_CHUNK_SIZE: usize = 25;

/// Insert or replace image records
///
/// `resized_on` is only ever set, never cleared, by a write.
pub async fn upsert_images(pool: &SqlitePool, records: &[ImageRecord]) -> Result<()> {
    for chunk in records.chunks(WRITE_CHUNK_SIZE) {
        retry_on_lock("upsert_images", DEFAULT_MAX_LOCK_WAIT_MS, || async move {
            let mut tx = pool.begin().await?;

            for record in chunk {
                sqlx::query(
                    r#"
                    INSERT INTO images (
                        request_id, image_id, image_type, resized, classification,
                        confidence, tries, service, cost, processing_time_ms, resized_on
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(request_id, image_id) DO UPDATE SET
                        image_type = excluded.image_type,
                        resized = excluded.resized,
                        classification = excluded.classification,
                        confidence = excluded.confidence,
                        tries = excluded.tries,
                        service = excluded.service,
                        cost = excluded.cost,
                        processing_time_ms = excluded.processing_time_ms,
                        resized_on = COALESCE(excluded.resized_on, images.resized_on)
                    "#,
                )
                .bind(&record.request_id)
                .bind(&record.image_id)
                .bind(&record.image_type)
                .bind(record.resized)
                .bind(record.classification.as_str())
                .bind(record.confidence)
                .bind(i64::from(record.tries))
                .bind(&record.service)
                .bind(record.cost)
                .bind(record.processing_time_ms as i64)
                .bind(record.resized_on)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        })
        .await?;
    }

    tracing::debug!(count = records.len(), "Image records written");
    Ok(())
}

/// All records of a request, ordered by image id
pub async fn load_request(pool: &SqlitePool, request_id: &str) -> Result<Vec<ImageRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT request_id, image_id, image_type, resized, classification,
               confidence, tries, service, cost, processing_time_ms, resized_on
        FROM images
        WHERE request_id = ?
        ORDER BY image_id
        "#,
    )
    .bind(request_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_record).collect()
}

/// Flag one image as resized without touching its classification
///
/// Images never registered by an upload are rejected with `NotFound`.
pub async fn mark_resized(
    pool: &SqlitePool,
    request_id: &str,
    image_id: &str,
    image_type: &str,
    resized_on: NaiveDate,
) -> Result<()> {
    let updated = retry_on_lock("mark_resized", DEFAULT_MAX_LOCK_WAIT_MS, || async move {
        let result = sqlx::query(
            r#"
            UPDATE images
            SET resized = 1, resized_on = ?
            WHERE request_id = ? AND image_id = ? AND image_type = ?
            "#,
        )
        .bind(resized_on)
        .bind(request_id)
        .bind(image_id)
        .bind(image_type)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    })
    .await?;

    if updated == 0 {
        return Err(Error::NotFound(format!(
            "image {}.{} is not registered on request {}",
            image_id, image_type, request_id
        )));
    }
    Ok(())
}

/// Requests with an unclassified image resized on `date` and below the tries ceiling
pub async fn requests_pending_on(
    pool: &SqlitePool,
    date: NaiveDate,
    tries_ceiling: u32,
) -> Result<Vec<String>> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT request_id
        FROM images
        WHERE resized_on = ? AND classification = ? AND tries < ?
        ORDER BY request_id
        "#,
    )
    .bind(date)
    .bind(Classification::None.as_str())
    .bind(i64::from(tries_ceiling))
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ImageRecord> {
    let tries: i64 = row.try_get("tries")?;
    let processing_time_ms: i64 = row.try_get("processing_time_ms")?;
    let classification: String = row.try_get("classification")?;

    Ok(ImageRecord {
        request_id: row.try_get("request_id")?,
        image_id: row.try_get("image_id")?,
        image_type: row.try_get("image_type")?,
        resized: row.try_get("resized")?,
        classification: Classification::from(classification),
        confidence: row.try_get("confidence")?,
        tries: u32::try_from(tries)
            .map_err(|_| Error::Internal(format!("Invalid tries value: {}", tries)))?,
        service: row.try_get("service")?,
        cost: row.try_get("cost")?,
        processing_time_ms: processing_time_ms.max(0) as u64,
        resized_on: row.try_get("resized_on")?,
    })
}
