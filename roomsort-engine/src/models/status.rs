//! Request-scoped status summary

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::image_record::ImageRecord;

/// One classified image in a status summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStatus {
    pub id: String,
    pub classification: String,
    pub confidence: f64,
    pub cost: f64,
    pub service: String,
    pub processing_time_seconds: f64,
}

/// Aggregate cost/status of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatus {
    pub request_id: String,
    /// Images with a classification (real label or Unclassified)
    pub images: Vec<ImageStatus>,
    #[serde(rename = "totalCostUSD")]
    pub total_cost_usd: f64,
    /// At least one image is still not classified
    pub has_unprocessed_images: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_processing_time_seconds: Option<f64>,
}

impl RequestStatus {
    /// Summarize stored records; `elapsed` is the execution's wall time when known
    pub fn summarize(request_id: &str, records: &[ImageRecord], elapsed: Option<Duration>) -> Self {
        let total_cost: f64 = records.iter().map(|r| r.cost.max(0.0)).sum();

        let images = records
            .iter()
            .filter(|r| !r.classification.is_none())
            .map(|r| ImageStatus {
                id: r.image_id.clone(),
                classification: r.classification.to_string(),
                confidence: r.confidence,
                cost: r.cost,
                service: r.service.clone(),
                processing_time_seconds: r.processing_time_ms as f64 / 1000.0,
            })
            .collect();

        Self {
            request_id: request_id.to_string(),
            images,
            total_cost_usd: round_usd(total_cost),
            has_unprocessed_images: records.iter().any(|r| r.classification.is_none()),
            total_processing_time_seconds: elapsed.map(|d| d.as_millis() as f64 / 1000.0),
        }
    }
}

/// Round to 8 decimal places (sub-cent per-token prices accumulate float noise)
pub fn round_usd(value: f64) -> f64 {
    (value * 100_000_000.0).round() / 100_000_000.0
}
