//! OpenAI-compatible chat-completions client (fallback tier)

use async_trait::async_trait;
use roomsort_common::config::FallbackTierConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::classifier::{ClassifierError, VisionClassifier, VisionResponse};

const USER_AGENT: &str = concat!("roomsort/", env!("CARGO_PKG_VERSION"));
const REMAINING_REQUESTS_HEADER: &str = "x-ratelimit-remaining-requests";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u64,
}

pub struct OpenAiVisionClient {
    http_client: reqwest::Client,
    completions_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiVisionClient {
    pub fn new(config: &FallbackTierConfig) -> Result<Self, ClassifierError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ClassifierError::Network(e.to_string()))?;

        if config.api_key.is_none() {
            tracing::warn!("No fallback-tier API key configured; requests will be unauthenticated");
        }

        Ok(Self {
            http_client,
            completions_url: format!("{}/chat/completions", config.endpoint.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl VisionClassifier for OpenAiVisionClient {
    async fn classify(&self, image_url: &str, prompt: &str) -> Result<VisionResponse, ClassifierError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: image_url },
                    },
                ],
            }],
        };

        let mut request = self.http_client.post(&self.completions_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(ClassifierError::from_reqwest)?;

        let status = response.status();
        if status.as_u16() == 429 {
            let remaining_requests = response
                .headers()
                .get(REMAINING_REQUESTS_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            tracing::warn!(?remaining_requests, "Vision model rate limited");
            return Err(ClassifierError::RateLimited { remaining_requests });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Api(status.as_u16(), text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Parse(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ClassifierError::Parse("response has no message content".to_string()))?;

        Ok(VisionResponse {
            text,
            tokens_used: parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }

    fn service_name(&self) -> &str {
        "vision-language-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = ChatRequest {
            model: "m",
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: "p" },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: "http://x/y.png" },
                    },
                ],
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert_eq!(json["messages"][0]["content"][1]["type"], "image_url");
        assert_eq!(json["messages"][0]["content"][1]["image_url"]["url"], "http://x/y.png");
    }

    #[test]
    fn test_completions_url_joins_endpoint() {
        let client = OpenAiVisionClient::new(&FallbackTierConfig {
            endpoint: "http://localhost:9/v1/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.completions_url, "http://localhost:9/v1/chat/completions");
    }
}
