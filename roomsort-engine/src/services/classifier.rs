//! Black-box classifier interfaces for both tiers

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Downstream classifier errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifierError {
    /// The service refused the call because of its own quota
    #[error("Rate limited (remaining requests: {remaining_requests:?})")]
    RateLimited { remaining_requests: Option<u64> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Request timed out")]
    Timeout,
}

impl ClassifierError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ClassifierError::RateLimited { .. })
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClassifierError::Timeout
        } else if err.is_decode() {
            ClassifierError::Parse(err.to_string())
        } else {
            ClassifierError::Network(err.to_string())
        }
    }
}

/// One label reported by the fast-tier detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedLabel {
    pub name: String,
    /// 0-100
    pub confidence: f64,
}

/// Fast-tier label detection
#[async_trait]
pub trait LabelDetector: Send + Sync {
    /// Labels for the image at `image_ref`, best first, none at or below `min_confidence`
    async fn detect(
        &self,
        image_ref: &str,
        max_labels: u32,
        min_confidence: f64,
    ) -> Result<Vec<DetectedLabel>, ClassifierError>;

    /// Recorded as the `service` of fast-tier classifications
    fn service_name(&self) -> &str;
}

/// Free-text answer of the fallback-tier model
#[derive(Debug, Clone, PartialEq)]
pub struct VisionResponse {
    pub text: String,
    pub tokens_used: u64,
}

/// Fallback-tier vision-language classification
#[async_trait]
pub trait VisionClassifier: Send + Sync {
    async fn classify(&self, image_url: &str, prompt: &str) -> Result<VisionResponse, ClassifierError>;

    fn service_name(&self) -> &str;
}
