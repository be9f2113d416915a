//! Request status read

use roomsort_common::{Error, Result};
use sqlx::SqlitePool;

use crate::db::images;
use crate::models::RequestStatus;

/// Status summary of a request, without processing time
pub async fn request_status(pool: &SqlitePool, request_id: &str) -> Result<RequestStatus> {
    let records = images::load_request(pool, request_id).await?;
    if records.is_empty() {
        return Err(Error::NotFound(format!("Request {}", request_id)));
    }
    Ok(RequestStatus::summarize(request_id, &records, None))
}
