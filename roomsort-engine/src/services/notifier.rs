//! Result and alert delivery

use async_trait::async_trait;
use roomsort_common::config::NotificationConfig;
use roomsort_common::events::{EventBus, RoomsortEvent};
use roomsort_common::{time, Error, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::models::RequestStatus;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Structured result of a finished request
    async fn publish_result(&self, status: &RequestStatus) -> Result<()>;

    /// Plain-text operator alert
    async fn publish_alert(&self, request_id: &str, message: &str) -> Result<()>;
}

/// Publishes onto the in-process event bus (streamed to SSE clients)
pub struct EventBusNotifier {
    event_bus: EventBus,
}

impl EventBusNotifier {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

#[async_trait]
impl NotificationSink for EventBusNotifier {
    async fn publish_result(&self, status: &RequestStatus) -> Result<()> {
        self.event_bus.emit_lossy(RoomsortEvent::ClassificationResult {
            request_id: status.request_id.clone(),
            result: serde_json::to_value(status)?,
            timestamp: time::now(),
        });
        Ok(())
    }

    async fn publish_alert(&self, request_id: &str, message: &str) -> Result<()> {
        self.event_bus.emit_lossy(RoomsortEvent::OperatorAlert {
            request_id: request_id.to_string(),
            message: message.to_string(),
            timestamp: time::now(),
        });
        Ok(())
    }
}

/// POSTs results and alerts to configured webhooks
pub struct WebhookNotifier {
    http_client: reqwest::Client,
    result_url: Option<String>,
    alert_url: Option<String>,
}

impl WebhookNotifier {
    pub fn new(config: &NotificationConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build webhook client: {}", e)))?;

        Ok(Self {
            http_client,
            result_url: config.result_webhook_url.clone(),
            alert_url: config.alert_webhook_url.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.result_url.is_some() || self.alert_url.is_some()
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> Result<()> {
        let response = self
            .http_client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("Webhook delivery failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Internal(format!(
                "Webhook {} answered {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn publish_result(&self, status: &RequestStatus) -> Result<()> {
        match &self.result_url {
            Some(url) => self.post(url, serde_json::to_value(status)?).await,
            None => Ok(()),
        }
    }

    async fn publish_alert(&self, request_id: &str, message: &str) -> Result<()> {
        match &self.alert_url {
            Some(url) => {
                self.post(url, json!({ "requestId": request_id, "message": message }))
                    .await
            }
            None => Ok(()),
        }
    }
}

/// Delivers to every sink; fails if any sink fails
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl NotificationSink for FanoutNotifier {
    async fn publish_result(&self, status: &RequestStatus) -> Result<()> {
        for sink in &self.sinks {
            sink.publish_result(status).await?;
        }
        Ok(())
    }

    async fn publish_alert(&self, request_id: &str, message: &str) -> Result<()> {
        for sink in &self.sinks {
            sink.publish_alert(request_id, message).await?;
        }
        Ok(())
    }
}
