//! Upload registration and resize notices

use chrono::NaiveDate;
use roomsort_common::config::StorageConfig;
use roomsort_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::attempt_tracker::RequestImages;
use super::object_store::{content_type_for, ObjectStore};
use crate::db::images;
use crate::models::{ImageRecord, SUPPORTED_IMAGE_TYPES};
use crate::workflow::scheduler::ExecutionScheduler;

/// One image announced by an upload request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadImage {
    pub id: String,
    #[serde(rename = "type")]
    pub image_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadRequest {
    #[serde(default)]
    pub images: Vec<UploadImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUpload {
    pub id: String,
    pub upload_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub request_id: String,
    pub signed_urls: Vec<SignedUpload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeOutcome {
    pub all_resized: bool,
    /// Execution started (or already running) once every image is resized
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
}

pub struct Intake {
    pool: SqlitePool,
    object_store: Arc<dyn ObjectStore>,
    scheduler: Arc<dyn ExecutionScheduler>,
    storage: StorageConfig,
    max_tries: u32,
}

impl Intake {
    pub fn new(
        pool: SqlitePool,
        object_store: Arc<dyn ObjectStore>,
        scheduler: Arc<dyn ExecutionScheduler>,
        storage: StorageConfig,
        max_tries: u32,
    ) -> Self {
        Self {
            pool,
            object_store,
            scheduler,
            storage,
            max_tries,
        }
    }

    /// Validate an upload, record its images and hand out write URLs
    pub async fn register_upload(&self, request: UploadRequest) -> Result<UploadResponse> {
        validate_upload(&request)?;

        let request_id = Uuid::new_v4().to_string();
        let ttl = Duration::from_secs(self.storage.url_ttl_secs);

        let records: Vec<ImageRecord> = request
            .images
            .iter()
            .map(|image| ImageRecord::new_upload(&request_id, &image.id, &image.image_type))
            .collect();

        let signed_urls = records
            .iter()
            .map(|record| {
                let upload_url = self.object_store.presigned_write_url(
                    &record.source_path(&self.storage.source_prefix),
                    &content_type_for(&record.image_type),
                    ttl,
                )?;
                Ok(SignedUpload {
                    id: record.image_id.clone(),
                    upload_url,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        images::upsert_images(&self.pool, &records).await?;
        info!(%request_id, images = records.len(), "Upload registered");

        Ok(UploadResponse {
            request_id,
            signed_urls,
        })
    }

    /// Record a finished resize; start the workflow once the whole request is ready
    pub async fn mark_resized(
        &self,
        request_id: &str,
        image_id: &str,
        image_type: &str,
        resized_on: NaiveDate,
    ) -> Result<ResizeOutcome> {
        if request_id.trim().is_empty() || image_id.trim().is_empty() {
            return Err(Error::Validation("request and image ids must not be empty".to_string()));
        }
        if !SUPPORTED_IMAGE_TYPES.contains(&image_type) {
            return Err(Error::Validation(format!("unsupported image type: {}", image_type)));
        }

        images::mark_resized(&self.pool, request_id, image_id, image_type, resized_on).await?;

        let records = images::load_request(&self.pool, request_id).await?;
        let request_images = RequestImages::new(request_id, records, self.max_tries)?;
        if !request_images.all_resized() {
            debug!(request_id, image_id, "Image resized, request not complete yet");
            return Ok(ResizeOutcome {
                all_resized: false,
                execution_id: None,
            });
        }

        let execution_id = self.scheduler.start_execution(request_id).await?;
        Ok(ResizeOutcome {
            all_resized: true,
            execution_id: Some(execution_id),
        })
    }
}

fn validate_upload(request: &UploadRequest) -> Result<()> {
    if request.images.is_empty() {
        return Err(Error::Validation("Invalid image array in request body.".to_string()));
    }

    let mut seen = HashSet::new();
    for image in &request.images {
        if image.id.trim().is_empty() {
            return Err(Error::Validation("image id must not be empty".to_string()));
        }
        if image.id.contains('/') {
            return Err(Error::Validation(format!("image id {} must not contain '/'", image.id)));
        }
        if !SUPPORTED_IMAGE_TYPES.contains(&image.image_type.as_str()) {
            return Err(Error::Validation(format!(
                "unsupported image type {} for image {}",
                image.image_type, image.id
            )));
        }
        if !seen.insert(image.id.as_str()) {
            return Err(Error::Validation(format!("duplicate image id {}", image.id)));
        }
    }
    Ok(())
}
