//! HTTP label-detection client (fast tier)

use async_trait::async_trait;
use roomsort_common::config::FastTierConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::classifier::{ClassifierError, DetectedLabel, LabelDetector};

const USER_AGENT: &str = concat!("roomsort/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DetectRequest<'a> {
    image: &'a str,
    max_labels: u32,
    min_confidence: f64,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    labels: Vec<DetectedLabel>,
}

/// Label detector reached over JSON/HTTP
pub struct HttpLabelDetector {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpLabelDetector {
    pub fn new(config: &FastTierConfig) -> Result<Self, ClassifierError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ClassifierError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl LabelDetector for HttpLabelDetector {
    async fn detect(
        &self,
        image_ref: &str,
        max_labels: u32,
        min_confidence: f64,
    ) -> Result<Vec<DetectedLabel>, ClassifierError> {
        tracing::debug!(image = image_ref, "Requesting label detection");

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&DetectRequest {
                image: image_ref,
                max_labels,
                min_confidence,
            })
            .send()
            .await
            .map_err(ClassifierError::from_reqwest)?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ClassifierError::RateLimited { remaining_requests: None });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Api(status.as_u16(), body));
        }

        let parsed: DetectResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Parse(e.to_string()))?;

        Ok(parsed
            .labels
            .into_iter()
            .filter(|label| label.confidence > min_confidence)
            .take(max_labels as usize)
            .collect())
    }

    fn service_name(&self) -> &str {
        "label-detection"
    }
}
