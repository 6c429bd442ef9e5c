//! OpenAI API Client
//!
//! Chat completions against any OpenAI-compatible endpoint. The history document is
//! sent verbatim as `messages`.

use crate::error::ExternalError;
use crate::turn::Turn;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One chat completion request
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Turn>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Anything that can answer a chat completion
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Generated text for the request
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ExternalError>;
}

/// API response
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// OpenAI API client
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str, base_url: &str, timeout: Duration) -> Result<Self, ExternalError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create from config
    pub fn from_config(config: &crate::config::Config) -> Result<Self, ExternalError> {
        Self::new(
            &config.openai_api_key,
            &config.openai_base_url,
            config.request_timeout,
        )
    }

    fn error_message(body: &str) -> String {
        serde_json::from_str::<ErrorEnvelope>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.chars().take(500).collect())
    }
}

#[async_trait]
impl InferenceClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ExternalError> {
        debug!(
            "Calling OpenAI API: model={}, messages={}, max_tokens={}",
            request.model,
            request.messages.len(),
            request.max_tokens
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            warn!("OpenAI rate limit: {}", Self::error_message(&body));
            return Err(ExternalError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalError::Api {
                status: status.as_u16(),
                message: Self::error_message(&body),
            });
        }

        let result: ChatCompletionResponse = response.json().await?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ExternalError::MalformedResponse("no choices in completion".into()))?;

        if let Some(usage) = result.usage {
            info!(
                "OpenAI response: model={}, in={}, out={}",
                result.model.as_deref().unwrap_or(&request.model),
                usage.prompt_tokens,
                usage.completion_tokens
            );
        }

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let request = CompletionRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![Turn::system("You are a helpful assistant"), Turn::user("hello")],
            temperature: 0.5,
            max_tokens: 3000,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "You are a helpful assistant"},
                    {"role": "user", "content": "hello"}
                ],
                "temperature": 0.5,
                "max_tokens": 3000
            })
        );
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error": {"message": "Invalid model", "type": "invalid_request_error"}}"#;
        assert_eq!(OpenAiClient::error_message(body), "Invalid model");
        assert_eq!(OpenAiClient::error_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 2, "total_tokens": 14}
        }"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Hi!"));
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 12);
    }
}
