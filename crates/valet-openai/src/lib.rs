// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenAI backend for the Valet gateway.
//!
//! The simple backend: non-streaming chat completions, an in-process
//! per-session history map trimmed to the last twenty turns, transient-error
//! retry with backoff, and no model failover. Idle sessions are reaped by a
//! periodic sweep.

pub mod client;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;
use valet_config::ValetConfig;
use valet_core::traits::QueryProvider;
use valet_core::types::{ProgressEvent, QueryRequest, QueryResponse, TokenUsage, UsageTotals};
use valet_core::ValetError;

use crate::client::{ChatMessage, ChatRequest, OpenAiClient};

const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(8);
/// Hard ceiling on any single query, unioned with the caller's cancel token.
const HARD_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);
/// Twenty turns of history per session.
const HISTORY_MAX_MESSAGES: usize = 40;

struct SessionHistory {
    messages: Vec<ChatMessage>,
    last_used: DateTime<Utc>,
}

/// OpenAI backend implementing the unified query contract.
pub struct OpenAiGateway {
    client: OpenAiClient,
    default_model: String,
    max_tokens: u32,
    system_prompt: String,
    hard_timeout: Duration,
    history: Mutex<HashMap<String, SessionHistory>>,
    usage: Mutex<UsageTotals>,
}

impl OpenAiGateway {
    /// Builds the gateway from configuration. The API key resolves from
    /// config first, then the `OPENAI_API_KEY` environment variable.
    pub fn new(config: &ValetConfig) -> Result<Self, ValetError> {
        let api_key = resolve_api_key(&config.openai.api_key)?;
        let client = OpenAiClient::new(&api_key, &config.openai.base_url)?;

        info!(model = %config.openai.default_model, "openai backend initialized");
        Ok(Self {
            client,
            default_model: config.openai.default_model.clone(),
            max_tokens: config.openai.max_tokens,
            system_prompt: format!(
                "You are {}, a concise personal assistant.",
                config.agent.name
            ),
            hard_timeout: HARD_TIMEOUT,
            history: Mutex::new(HashMap::new()),
            usage: Mutex::new(UsageTotals::default()),
        })
    }

    /// Overrides the hard timeout ceiling (for tests).
    pub fn with_hard_timeout(mut self, ceiling: Duration) -> Self {
        self.hard_timeout = ceiling;
        self
    }

    /// Drops sessions idle longer than `idle`. Returns how many were removed.
    pub fn reap_idle(&self, idle: Duration) -> usize {
        self.reap_idle_at(idle, Utc::now())
    }

    fn reap_idle_at(&self, idle: Duration, now: DateTime<Utc>) -> usize {
        let threshold = chrono::Duration::from_std(idle).unwrap_or(chrono::Duration::hours(2));
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let before = history.len();
        history.retain(|_, session| now.signed_duration_since(session.last_used) <= threshold);
        let reaped = before - history.len();
        if reaped > 0 {
            debug!(reaped, remaining = history.len(), "reaped idle sessions");
        }
        reaped
    }

    fn messages_for(&self, session_id: &str, prompt: &str) -> Vec<ChatMessage> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let mut messages = vec![ChatMessage::new("system", &self.system_prompt)];
        if let Some(session) = history.get(session_id) {
            messages.extend(session.messages.iter().cloned());
        }
        messages.push(ChatMessage::new("user", prompt));
        messages
    }

    fn record_exchange(&self, session_id: &str, prompt: &str, answer: &str) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let session = history
            .entry(session_id.to_string())
            .or_insert_with(|| SessionHistory {
                messages: Vec::new(),
                last_used: Utc::now(),
            });
        session.messages.push(ChatMessage::new("user", prompt));
        session.messages.push(ChatMessage::new("assistant", answer));
        session.last_used = Utc::now();
        if session.messages.len() > HISTORY_MAX_MESSAGES {
            let excess = session.messages.len() - HISTORY_MAX_MESSAGES;
            session.messages.drain(..excess);
        }
    }

    async fn chat_with_retries(&self, request: &ChatRequest) -> Result<client::ChatResponse, ValetError> {
        let mut last_error = None;
        for attempt in 0..=MAX_RETRIES {
            match self.client.chat(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    let delay = backoff_delay(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e,
                        "transient failure, backing off");
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| ValetError::Internal("retry loop exhausted".into())))
    }
}

#[async_trait]
impl QueryProvider for OpenAiGateway {
    fn name(&self) -> &str {
        "openai"
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, ValetError> {
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let model = request
            .model_override
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let chat_request = ChatRequest {
            model: model.clone(),
            messages: self.messages_for(&session_id, &request.prompt),
            max_tokens: self.max_tokens,
        };

        let response = tokio::select! {
            result = self.chat_with_retries(&chat_request) => result?,
            _ = request.cancel.cancelled() => {
                debug!(session_id, "query stopped by caller");
                return Ok(QueryResponse {
                    text: String::new(),
                    session_id: Some(session_id),
                    tools_used: Vec::new(),
                    usage: None,
                    error: None,
                    model: None,
                });
            }
            _ = tokio::time::sleep(self.hard_timeout) => {
                warn!(session_id, "query hit hard timeout");
                return Ok(QueryResponse {
                    text: String::new(),
                    session_id: Some(session_id),
                    tools_used: Vec::new(),
                    usage: None,
                    error: Some("query timed out after 2 hours".into()),
                    model: None,
                });
            }
        };

        let text = response.text();
        let usage = TokenUsage {
            input_tokens: response.usage.prompt_tokens,
            output_tokens: response.usage.completion_tokens,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            cost_usd: estimate_cost(
                &response.model,
                response.usage.prompt_tokens,
                response.usage.completion_tokens,
            ),
        };
        self.usage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(&usage);
        self.record_exchange(&session_id, &request.prompt, &text);

        // The whole answer arrives at once; forward it as one chunk so
        // streaming consumers behave the same on both backends.
        if let Some(tx) = &request.progress {
            let _ = tx.send(ProgressEvent::TextChunk(text.clone())).await;
        }

        Ok(QueryResponse {
            text,
            session_id: Some(session_id),
            tools_used: Vec::new(),
            usage: Some(usage),
            error: None,
            model: Some(response.model),
        })
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, ValetError> {
        let chat_request = ChatRequest {
            model: self.default_model.clone(),
            messages: vec![ChatMessage::new("user", prompt)],
            max_tokens,
        };
        let response = self.chat_with_retries(&chat_request).await?;
        let usage = TokenUsage {
            input_tokens: response.usage.prompt_tokens,
            output_tokens: response.usage.completion_tokens,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            cost_usd: estimate_cost(
                &response.model,
                response.usage.prompt_tokens,
                response.usage.completion_tokens,
            ),
        };
        self.usage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(&usage);
        Ok(response.text())
    }

    fn usage_totals(&self) -> UsageTotals {
        *self.usage.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Per-million-token pricing by model family.
fn estimate_cost(model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    let (input_rate, output_rate) = if model.contains("4o-mini") {
        (0.15, 0.60)
    } else if model.contains("4o") {
        (2.5, 10.0)
    } else {
        (1.0, 3.0)
    };
    f64::from(prompt_tokens) * input_rate * 1e-6 + f64::from(completion_tokens) * output_rate * 1e-6
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE.saturating_mul(2u32.saturating_pow(attempt)).min(BACKOFF_CAP);
    let jitter = rand::thread_rng().gen_range(0.7..1.3);
    base.mul_f64(jitter)
}

fn resolve_api_key(config_key: &Option<String>) -> Result<String, ValetError> {
    if let Some(key) = config_key
        && !key.is_empty()
    {
        return Ok(key.clone());
    }
    std::env::var("OPENAI_API_KEY").map_err(|_| {
        ValetError::Config(
            "OpenAI API key not found. Set openai.api_key in config or the OPENAI_API_KEY environment variable.".into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> ValetConfig {
        valet_config::load_config_from_str(&format!(
            r#"
            [openai]
            api_key = "test-key"
            base_url = "{base_url}"
            default_model = "gpt-4o-mini"
            max_tokens = 512
            "#
        ))
        .unwrap()
    }

    fn answer(text: &str) -> serde_json::Value {
        serde_json::json!({
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": text}}],
            "usage": {"prompt_tokens": 8, "completion_tokens": 4}
        })
    }

    #[tokio::test]
    async fn query_round_trip_with_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("Hi!")))
            .mount(&server)
            .await;

        let gw = OpenAiGateway::new(&test_config(&server.uri())).unwrap();
        let response = gw.query(QueryRequest::new("hello")).await.unwrap();
        assert_eq!(response.text, "Hi!");
        assert!(response.error.is_none());
        assert_eq!(response.usage.unwrap().input_tokens, 8);
        assert_eq!(gw.usage_totals().queries, 1);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
                "error": {"type": "server_error", "message": "overloaded"}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("recovered")))
            .mount(&server)
            .await;

        let gw = OpenAiGateway::new(&test_config(&server.uri())).unwrap();
        let response = gw.query(QueryRequest::new("hello")).await.unwrap();
        assert_eq!(response.text, "recovered");
    }

    #[tokio::test]
    async fn history_carries_across_turns_and_trims() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("ok")))
            .mount(&server)
            .await;

        let gw = OpenAiGateway::new(&test_config(&server.uri())).unwrap();
        for i in 0..25 {
            let mut req = QueryRequest::new(format!("question {i}"));
            req.session_id = Some("sess-1".into());
            gw.query(req).await.unwrap();
        }

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests.last().unwrap().body).unwrap();
        let messages = body["messages"].as_array().unwrap();
        // system + trimmed history (40) + new prompt.
        assert_eq!(messages.len(), 42);
        assert_eq!(messages[0]["role"], "system");
        // Oldest turns fell off the front.
        assert_eq!(messages[1]["content"], "question 4");
    }

    #[tokio::test]
    async fn reaper_drops_only_idle_sessions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("ok")))
            .mount(&server)
            .await;

        let gw = OpenAiGateway::new(&test_config(&server.uri())).unwrap();
        let mut req = QueryRequest::new("a");
        req.session_id = Some("old".into());
        gw.query(req).await.unwrap();
        let mut req = QueryRequest::new("b");
        req.session_id = Some("fresh".into());
        gw.query(req).await.unwrap();

        // Age the "old" session three hours into the future's past.
        {
            let mut history = gw.history.lock().unwrap();
            history.get_mut("old").unwrap().last_used = Utc::now() - chrono::Duration::hours(3);
        }

        let reaped = gw.reap_idle(Duration::from_secs(2 * 3600));
        assert_eq!(reaped, 1);
        let history = gw.history.lock().unwrap();
        assert!(history.contains_key("fresh"));
        assert!(!history.contains_key("old"));
    }

    #[tokio::test]
    async fn cancelled_query_returns_empty_without_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(answer("late"))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let gw = OpenAiGateway::new(&test_config(&server.uri())).unwrap();
        let req = QueryRequest::new("hello");
        req.cancel.cancel();
        let response = gw.query(req).await.unwrap();
        assert!(response.error.is_none());
        assert_eq!(response.text, "");
    }

    #[tokio::test]
    async fn hard_timeout_sets_error_instead_of_failing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(answer("too late"))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let gw = OpenAiGateway::new(&test_config(&server.uri()))
            .unwrap()
            .with_hard_timeout(Duration::from_millis(100));
        let response = gw.query(QueryRequest::new("hello")).await.unwrap();
        assert!(response.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(response.text, "");
        assert!(response.session_id.is_some());
    }

    #[test]
    fn mini_models_cost_less() {
        assert!(estimate_cost("gpt-4o-mini", 1000, 1000) < estimate_cost("gpt-4o", 1000, 1000));
    }
}
