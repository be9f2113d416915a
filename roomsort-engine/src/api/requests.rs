//! Request intake, resize notices, status and execution listing

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use roomsort_common::time;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::models::{split_image_file, RequestStatus};
use crate::services::intake::{ResizeOutcome, UploadRequest, UploadResponse};
use crate::services::status::request_status;
use crate::workflow::WorkflowExecution;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizedQuery {
    /// Defaults to today (UTC)
    pub resized_on: Option<NaiveDate>,
}

/// POST /requests
pub async fn create_request(
    State(state): State<AppState>,
    Json(request): Json<UploadRequest>,
) -> ApiResult<Json<UploadResponse>> {
    let response = state.intake.register_upload(request).await?;
    Ok(Json(response))
}

/// POST /requests/:request_id/images/:image_file/resized
///
/// `image_file` is `<image_id>.<image_type>`, as in the object key.
pub async fn image_resized(
    State(state): State<AppState>,
    Path((request_id, image_file)): Path<(String, String)>,
    Query(query): Query<ResizedQuery>,
) -> ApiResult<Json<ResizeOutcome>> {
    let (image_id, image_type) = split_image_file(&image_file)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid image file name: {}", image_file)))?;
    let resized_on = query
        .resized_on
        .unwrap_or_else(|| time::resize_date(time::now()));

    let outcome = state
        .intake
        .mark_resized(&request_id, image_id, image_type, resized_on)
        .await?;
    Ok(Json(outcome))
}

/// GET /requests/:request_id/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<RequestStatus>> {
    Ok(Json(request_status(&state.db, &request_id).await?))
}

/// GET /executions
pub async fn list_executions(State(state): State<AppState>) -> ApiResult<Json<Vec<WorkflowExecution>>> {
    Ok(Json(state.scheduler.list_running().await?))
}

pub fn request_routes() -> Router<AppState> {
    Router::new()
        .route("/requests", post(create_request))
        .route(
            "/requests/:request_id/images/:image_file/resized",
            post(image_resized),
        )
        .route("/requests/:request_id/status", get(get_status))
        .route("/executions", get(list_executions))
}
