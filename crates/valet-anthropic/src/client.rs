// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the Anthropic Messages API.
//!
//! Performs single attempts only. Overload statuses surface as
//! [`ValetError::Transient`] so the gateway's retry and failover policy
//! owns all repetition.

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::debug;
use valet_core::ValetError;

use crate::sse::{self, StreamEvent};
use crate::types::{ApiErrorResponse, MessageRequest, MessageResponse};

const API_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Authenticated HTTP client for the Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str, api_version: &str) -> Result<Self, ValetError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key)
                .map_err(|e| ValetError::Config(format!("invalid API key header value: {e}")))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_str(api_version)
                .map_err(|e| ValetError::Config(format!("invalid API version header value: {e}")))?,
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
            base_url: API_BASE_URL.to_string(),
        })
    }

    /// Overrides the base URL (for testing with wiremock).
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    /// Sends one streaming request and returns the SSE event stream.
    pub async fn stream_message(
        &self,
        request: &MessageRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent, ValetError>> + Send>>, ValetError>
    {
        let mut req = request.clone();
        req.stream = true;

        let response = self.send(&req).await?;
        Ok(sse::parse_sse_stream(response))
    }

    /// Sends one non-streaming request and returns the full response.
    pub async fn complete_message(
        &self,
        request: &MessageRequest,
    ) -> Result<MessageResponse, ValetError> {
        let mut req = request.clone();
        req.stream = false;

        let response = self.send(&req).await?;
        let body = response.text().await.map_err(|e| ValetError::Provider {
            message: format!("failed to read response body: {e}"),
            source: Some(Box::new(e)),
        })?;
        serde_json::from_str(&body).map_err(|e| ValetError::Provider {
            message: format!("failed to parse API response: {e}"),
            source: Some(Box::new(e)),
        })
    }

    async fn send(&self, request: &MessageRequest) -> Result<reqwest::Response, ValetError> {
        let response = self
            .client
            .post(&self.base_url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                // Connection-level failures are worth a retry.
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
        debug!(status = %status, model = %request.model, "API response received");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ApiErrorResponse>(&body)
            .map(|e| format!("{}: {}", e.error.type_, e.error.message))
            .unwrap_or_else(|_| format!("API returned {status}: {body}"));

        if is_transient_status(status) {
            Err(ValetError::Transient { message: detail })
        } else if status.as_u16() == 401 || status.as_u16() == 403 {
            Err(ValetError::Auth {
                message: format!("{detail}. Check anthropic.api_key or ANTHROPIC_API_KEY."),
            })
        } else {
            Err(ValetError::Provider {
                message: detail,
                source: None,
            })
        }
    }
}

/// Status codes that indicate a momentary condition worth retrying.
fn is_transient_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 503 | 529)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ApiMessage;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> AnthropicClient {
        AnthropicClient::new("test-api-key", "2023-06-01")
            .unwrap()
            .with_base_url(base_url.to_string())
    }

    fn test_request() -> MessageRequest {
        MessageRequest {
            model: "claude-sonnet-4-20250514".into(),
            messages: vec![ApiMessage::user_text("Hello")],
            system: None,
            max_tokens: 1024,
            stream: false,
            tools: None,
        }
    }

    fn success_body() -> serde_json::Value {
        serde_json::json!({
            "id": "msg_test",
            "content": [{"type": "text", "text": "Hi there!"}],
            "model": "claude-sonnet-4-20250514",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        })
    }

    #[tokio::test]
    async fn complete_message_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("x-api-key", "test-api-key"))
            .and(header("anthropic-version", "2023-06-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body()))
            .mount(&server)
            .await;

        let result = test_client(&server.uri()).complete_message(&test_request()).await.unwrap();
        assert_eq!(result.id, "msg_test");
        assert_eq!(result.text(), "Hi there!");
        assert_eq!(result.usage.input_tokens, 10);
    }

    #[tokio::test]
    async fn overload_status_maps_to_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_json(serde_json::json!({
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            })))
            .mount(&server)
            .await;

        let err = test_client(&server.uri()).complete_message(&test_request()).await.unwrap_err();
        assert!(err.is_retryable(), "expected transient, got {err:?}");
    }

    #[tokio::test]
    async fn bad_request_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"type": "invalid_request_error", "message": "Bad model"}
            })))
            .mount(&server)
            .await;

        let err = test_client(&server.uri()).complete_message(&test_request()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("invalid_request_error"));
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"type": "authentication_error", "message": "invalid x-api-key"}
            })))
            .mount(&server)
            .await;

        let err = test_client(&server.uri()).complete_message(&test_request()).await.unwrap_err();
        assert!(matches!(err, ValetError::Auth { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn stream_message_yields_events() {
        use futures::StreamExt;

        let sse = concat!(
            "event: content_block_delta\n",
            "data: {\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
            "event: message_stop\ndata: {}\n\n",
        );
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&server)
            .await;

        let mut stream = test_client(&server.uri()).stream_message(&test_request()).await.unwrap();
        assert!(matches!(
            stream.next().await.unwrap().unwrap(),
            crate::sse::StreamEvent::ContentBlockDelta(_)
        ));
        assert!(matches!(
            stream.next().await.unwrap().unwrap(),
            crate::sse::StreamEvent::MessageStop
        ));
    }
}
