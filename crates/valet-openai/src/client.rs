// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client and wire types for the OpenAI chat completions API.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;
use valet_core::ValetError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "system", "user", or "assistant".
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: ChatUsage,
}

impl ChatResponse {
    /// Text of the first choice, empty if the API returned none.
    pub fn text(&self) -> String {
        self.choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type", default)]
    type_: String,
}

/// Authenticated client for one chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str, base_url: &str) -> Result<Self, ValetError> {
        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {api_key}");
        headers.insert(
            "authorization",
            HeaderValue::from_str(&bearer)
                .map_err(|e| ValetError::Config(format!("invalid API key header value: {e}")))?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ValetError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Sends one chat completion request. Overload statuses surface as
    /// [`ValetError::Transient`]; retry policy lives in the gateway.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ValetError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ValetError::Transient {
                        message: format!("HTTP request failed: {e}"),
                    }
                } else {
                    ValetError::Provider {
                        message: format!("HTTP request failed: {e}"),
                        source: Some(Box::new(e)),
                    }
                }
            })?;

        let status = response.status();
        debug!(status = %status, model = %request.model, "chat completion response received");

        if status.is_success() {
            let body = response.text().await.map_err(|e| ValetError::Provider {
                message: format!("failed to read response body: {e}"),
                source: Some(Box::new(e)),
            })?;
            return serde_json::from_str(&body).map_err(|e| ValetError::Provider {
                message: format!("failed to parse API response: {e}"),
                source: Some(Box::new(e)),
            });
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ApiErrorResponse>(&body)
            .map(|e| format!("{}: {}", e.error.type_, e.error.message))
            .unwrap_or_else(|_| format!("API returned {status}: {body}"));

        match status.as_u16() {
            429 | 500 | 503 => Err(ValetError::Transient { message: detail }),
            401 | 403 => Err(ValetError::Auth {
                message: format!("{detail}. Check openai.api_key or OPENAI_API_KEY."),
            }),
            _ => Err(ValetError::Provider {
                message: detail,
                source: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![ChatMessage::new("user", "Hello")],
            max_tokens: 256,
        }
    }

    #[tokio::test]
    async fn chat_success_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "choices": [{"message": {"role": "assistant", "content": "Hi!"}}],
                "usage": {"prompt_tokens": 9, "completion_tokens": 3}
            })))
            .mount(&server)
            .await;

        let client = OpenAiClient::new("test-key", &server.uri()).unwrap();
        let response = client.chat(&test_request()).await.unwrap();
        assert_eq!(response.text(), "Hi!");
        assert_eq!(response.usage.prompt_tokens, 9);
    }

    #[tokio::test]
    async fn rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"type": "rate_limit_error", "message": "slow down"}
            })))
            .mount(&server)
            .await;

        let client = OpenAiClient::new("test-key", &server.uri()).unwrap();
        let err = client.chat(&test_request()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn invalid_key_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"type": "invalid_request_error", "message": "bad key"}
            })))
            .mount(&server)
            .await;

        let client = OpenAiClient::new("test-key", &server.uri()).unwrap();
        let err = client.chat(&test_request()).await.unwrap_err();
        assert!(matches!(err, ValetError::Auth { .. }));
    }

    #[tokio::test]
    async fn empty_choices_yield_empty_text() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"model": "gpt-4o-mini", "choices": []}"#,
        )
        .unwrap();
        assert_eq!(response.text(), "");
    }
}
