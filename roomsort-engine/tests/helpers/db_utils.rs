//! Database Test Utilities

use anyhow::Result;
use chrono::NaiveDate;
use roomsort_engine::db::{self, images};
use roomsort_engine::models::ImageRecord;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Create temporary test database with tables initialized
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_roomsort.db");
    let pool = db::init_database_pool(&db_path).await?;
    Ok((temp_dir, pool))
}

/// Resized, never classified record
pub fn resized_record(request_id: &str, image_id: &str, resized_on: NaiveDate) -> ImageRecord {
    let mut record = ImageRecord::new_upload(request_id, image_id, "png");
    record.resized = true;
    record.resized_on = Some(resized_on);
    record
}

pub async fn seed_records(pool: &SqlitePool, records: &[ImageRecord]) {
    images::upsert_images(pool, records)
        .await
        .expect("Failed to seed image records");
}
