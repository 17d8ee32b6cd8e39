// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anthropic backend for the Valet gateway.
//!
//! Implements [`QueryProvider`] over the Messages API with SSE streaming,
//! a model-driven tool loop, transient-error retry with exponential backoff,
//! and model failover down the capability ladder when overload persists.

pub mod client;
pub mod pricing;
pub mod sse;
pub mod tools;
pub mod types;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use valet_config::ValetConfig;
use valet_core::traits::QueryProvider;
use valet_core::types::{ProgressEvent, QueryRequest, QueryResponse, TokenUsage, UsageTotals};
use valet_core::ValetError;
use valet_storage::Database;

use crate::client::AnthropicClient;
use crate::sse::StreamEvent;
use crate::tools::ToolRunner;
use crate::types::{ApiContentBlock, ApiMessage, MessageRequest, ResponseContentBlock, SseDelta};

/// Retries after the initial attempt.
const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(8);
/// Hard ceiling on any single query, unioned with the caller's cancel token.
const HARD_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);
/// In-process history keeps at most this many messages per session.
const HISTORY_MAX_MESSAGES: usize = 80;

const SONNET_FALLBACK: &str = "claude-sonnet-4-20250514";
const HAIKU_FALLBACK: &str = "claude-3-5-haiku-20241022";

/// Anthropic backend implementing the unified query contract.
pub struct AnthropicGateway {
    client: AnthropicClient,
    default_model: String,
    max_tokens: u32,
    system_prompt: String,
    db: Option<Database>,
    memory_limit: usize,
    tools: Arc<dyn ToolRunner>,
    hard_timeout: Duration,
    history: Mutex<HashMap<String, Vec<ApiMessage>>>,
    usage: Mutex<UsageTotals>,
}

struct AttemptResult {
    text: String,
    usage: TokenUsage,
    model: String,
    tools_used: Vec<String>,
}

impl AnthropicGateway {
    /// Builds the gateway from configuration. The API key resolves from
    /// config first, then the `ANTHROPIC_API_KEY` environment variable.
    pub fn new(
        config: &ValetConfig,
        db: Option<Database>,
        tools: Arc<dyn ToolRunner>,
    ) -> Result<Self, ValetError> {
        let api_key = resolve_api_key(&config.anthropic.api_key)?;
        let client = AnthropicClient::new(&api_key, &config.anthropic.api_version)?;

        info!(model = %config.anthropic.default_model, "anthropic backend initialized");
        Ok(Self {
            client,
            default_model: config.anthropic.default_model.clone(),
            max_tokens: config.anthropic.max_tokens,
            system_prompt: format!(
                "You are {}, a concise personal assistant.",
                config.agent.name
            ),
            db,
            memory_limit: config.memory.injection_limit,
            tools,
            hard_timeout: HARD_TIMEOUT,
            history: Mutex::new(HashMap::new()),
            usage: Mutex::new(UsageTotals::default()),
        })
    }

    /// Overrides the API base URL (for testing with wiremock).
    pub fn with_base_url(mut self, url: String) -> Self {
        self.client = self.client.with_base_url(url);
        self
    }

    /// Overrides the hard timeout ceiling (for tests).
    pub fn with_hard_timeout(mut self, ceiling: Duration) -> Self {
        self.hard_timeout = ceiling;
        self
    }

    async fn build_system_prompt(&self, user_id: Option<&str>) -> String {
        let mut system = self.system_prompt.clone();
        if let (Some(user), Some(db)) = (user_id, &self.db) {
            match valet_memory::recall::build_context_block(db, user, self.memory_limit).await {
                Ok(Some(block)) => {
                    system.push_str("\n\n");
                    system.push_str(&block);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "memory recall failed, continuing without context"),
            }
        }
        system
    }

    fn history_snapshot(&self, session_id: &str) -> Vec<ApiMessage> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    fn record_exchange(&self, session_id: &str, prompt: &str, answer: &str) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let entry = history.entry(session_id.to_string()).or_default();
        entry.push(ApiMessage::user_text(prompt));
        entry.push(ApiMessage::assistant_text(answer));
        if entry.len() > HISTORY_MAX_MESSAGES {
            let excess = entry.len() - HISTORY_MAX_MESSAGES;
            entry.drain(..excess);
        }
    }

    fn record_usage(&self, usage: &TokenUsage) {
        self.usage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(usage);
    }

    /// One attempt: drive the streaming tool loop to completion on a fixed
    /// model. Text deltas flow into `partial` and the progress channel as
    /// they arrive.
    async fn run_attempt(
        &self,
        model: &str,
        system: &str,
        base_messages: &[ApiMessage],
        progress: Option<&mpsc::Sender<ProgressEvent>>,
        partial: &Mutex<String>,
        tools_seen: &Mutex<Vec<String>>,
    ) -> Result<AttemptResult, ValetError> {
        let definitions = self.tools.definitions();
        let tool_defs = if definitions.is_empty() {
            None
        } else {
            Some(definitions)
        };

        let mut messages = base_messages.to_vec();
        let mut answer = String::new();
        let mut usage = TokenUsage::default();
        let mut tools_used: Vec<String> = Vec::new();

        loop {
            let request = MessageRequest {
                model: model.to_string(),
                messages: messages.clone(),
                system: Some(system.to_string()),
                max_tokens: self.max_tokens,
                stream: true,
                tools: tool_defs.clone(),
            };
            let mut stream = self.client.stream_message(&request).await?;

            let mut round_text = String::new();
            let mut tool_blocks: HashMap<usize, (String, String, String)> = HashMap::new();
            let mut tool_calls: Vec<(String, String, serde_json::Value)> = Vec::new();
            let mut stop_reason: Option<String> = None;

            while let Some(event) = stream.next().await {
                match event? {
                    StreamEvent::MessageStart(ms) => {
                        usage.input_tokens += ms.message.usage.input_tokens;
                        usage.cache_read_tokens += ms.message.usage.cache_read_input_tokens;
                        usage.cache_creation_tokens +=
                            ms.message.usage.cache_creation_input_tokens;
                    }
                    StreamEvent::ContentBlockStart(cbs) => {
                        if let ResponseContentBlock::ToolUse { id, name, .. } = &cbs.content_block
                        {
                            tool_blocks
                                .insert(cbs.index, (id.clone(), name.clone(), String::new()));
                        }
                    }
                    StreamEvent::ContentBlockDelta(delta) => match delta.delta {
                        SseDelta::TextDelta { text } => {
                            round_text.push_str(&text);
                            partial
                                .lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .push_str(&text);
                            if let Some(tx) = progress {
                                let _ = tx.send(ProgressEvent::TextChunk(text)).await;
                            }
                        }
                        SseDelta::InputJsonDelta { partial_json } => {
                            if let Some((_, _, json)) = tool_blocks.get_mut(&delta.index) {
                                json.push_str(&partial_json);
                            }
                        }
                    },
                    StreamEvent::ContentBlockStop(cbs) => {
                        if let Some((id, name, json)) = tool_blocks.remove(&cbs.index) {
                            let input = if json.is_empty() {
                                serde_json::Value::Object(serde_json::Map::new())
                            } else {
                                serde_json::from_str(&json).unwrap_or_else(|e| {
                                    warn!(error = %e, tool = %name, "unparseable tool input JSON");
                                    serde_json::json!({"_parse_error": e.to_string(), "_raw": json})
                                })
                            };
                            if !tools_used.contains(&name) {
                                tools_used.push(name.clone());
                                tools_seen
                                    .lock()
                                    .unwrap_or_else(|e| e.into_inner())
                                    .push(name.clone());
                            }
                            if let Some(tx) = progress {
                                let _ = tx.send(ProgressEvent::ToolUse(name.clone())).await;
                            }
                            tool_calls.push((id, name, input));
                        }
                    }
                    StreamEvent::MessageDelta(md) => {
                        if let Some(u) = md.usage {
                            usage.output_tokens += u.output_tokens;
                        }
                        if md.delta.stop_reason.is_some() {
                            stop_reason = md.delta.stop_reason;
                        }
                    }
                    StreamEvent::MessageStop => break,
                    StreamEvent::Error(err) => {
                        return Err(classify_sse_error(&err.error.type_, &err.error.message));
                    }
                    StreamEvent::Ping => {}
                }
            }

            answer.push_str(&round_text);

            if stop_reason.as_deref() == Some("tool_use") && !tool_calls.is_empty() {
                // Feed tool results back and let the model continue.
                let mut assistant_blocks: Vec<ApiContentBlock> = Vec::new();
                if !round_text.is_empty() {
                    assistant_blocks.push(ApiContentBlock::Text { text: round_text });
                }
                let mut result_blocks: Vec<ApiContentBlock> = Vec::new();
                for (id, name, input) in &tool_calls {
                    assistant_blocks.push(ApiContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    });
                    let (content, is_error) = match self.tools.run(name, input).await {
                        Ok(output) => (output, None),
                        Err(e) => {
                            warn!(tool = %name, error = %e, "tool invocation failed");
                            (e.to_string(), Some(true))
                        }
                    };
                    result_blocks.push(ApiContentBlock::ToolResult {
                        tool_use_id: id.clone(),
                        content,
                        is_error,
                    });
                }
                messages.push(ApiMessage {
                    role: "assistant".into(),
                    content: types::ApiContent::Blocks(assistant_blocks),
                });
                messages.push(ApiMessage {
                    role: "user".into(),
                    content: types::ApiContent::Blocks(result_blocks),
                });
                continue;
            }

            usage.cost_usd = pricing::estimate_cost(model, &usage);
            return Ok(AttemptResult {
                text: answer,
                usage,
                model: model.to_string(),
                tools_used,
            });
        }
    }

    /// Retry loop over the failover chain. The first retry stays on the
    /// requested model; from the second retry each attempt steps down the
    /// chain, announcing the downgrade through the progress channel.
    async fn run_with_retries(
        &self,
        chain: &[String],
        system: &str,
        base_messages: &[ApiMessage],
        progress: Option<&mpsc::Sender<ProgressEvent>>,
        partial: &Mutex<String>,
        tools_seen: &Mutex<Vec<String>>,
    ) -> Result<AttemptResult, ValetError> {
        let mut last_error = None;
        let mut current_model = chain[0].as_str();

        for attempt in 0..=MAX_RETRIES {
            let model = model_for_attempt(chain, attempt);
            if model != current_model {
                info!(from = current_model, to = model, "failing over to fallback model");
                if let Some(tx) = progress {
                    let _ = tx
                        .send(ProgressEvent::Notice(format!(
                            "model overloaded, switching to {model}"
                        )))
                        .await;
                }
                current_model = model;
            }

            // Discard partial output from the failed attempt.
            partial.lock().unwrap_or_else(|e| e.into_inner()).clear();
            tools_seen.lock().unwrap_or_else(|e| e.into_inner()).clear();

            match self
                .run_attempt(model, system, base_messages, progress, partial, tools_seen)
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    let delay = backoff_delay(attempt);
                    warn!(attempt, model, delay_ms = delay.as_millis() as u64, error = %e,
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
impl QueryProvider for AnthropicGateway {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, ValetError> {
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let requested_model = request
            .model_override
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let chain = failover_chain(&requested_model);

        let system = self.build_system_prompt(request.user_id.as_deref()).await;
        let mut messages = self.history_snapshot(&session_id);
        messages.push(ApiMessage::user_text(&request.prompt));

        let partial = Mutex::new(String::new());
        let tools_seen = Mutex::new(Vec::new());
        let progress = request.progress.as_ref();

        let outcome = tokio::select! {
            result = self.run_with_retries(&chain, &system, &messages, progress, &partial, &tools_seen) => Some(result),
            _ = request.cancel.cancelled() => None,
            _ = tokio::time::sleep(self.hard_timeout) => {
                warn!(session_id, "query hit hard timeout");
                let text = std::mem::take(&mut *partial.lock().unwrap_or_else(|e| e.into_inner()));
                let tools_used = std::mem::take(&mut *tools_seen.lock().unwrap_or_else(|e| e.into_inner()));
                return Ok(QueryResponse {
                    text,
                    session_id: Some(session_id),
                    tools_used,
                    usage: None,
                    error: Some("query timed out after 2 hours".into()),
                    model: None,
                });
            }
        };

        match outcome {
            Some(Ok(result)) => {
                self.record_usage(&result.usage);
                self.record_exchange(&session_id, &request.prompt, &result.text);
                debug!(session_id, model = %result.model, "query complete");
                Ok(QueryResponse {
                    text: result.text,
                    session_id: Some(session_id),
                    tools_used: result.tools_used,
                    usage: Some(result.usage),
                    error: None,
                    model: Some(result.model),
                })
            }
            Some(Err(e)) => Err(e),
            // User-initiated stop: return what was streamed so far, no error.
            None => {
                let text = std::mem::take(&mut *partial.lock().unwrap_or_else(|e| e.into_inner()));
                let tools_used =
                    std::mem::take(&mut *tools_seen.lock().unwrap_or_else(|e| e.into_inner()));
                debug!(session_id, chars = text.len(), "query stopped by caller");
                Ok(QueryResponse {
                    text,
                    session_id: Some(session_id),
                    tools_used,
                    usage: None,
                    error: None,
                    model: None,
                })
            }
        }
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, ValetError> {
        let request = MessageRequest {
            model: self.default_model.clone(),
            messages: vec![ApiMessage::user_text(prompt)],
            system: None,
            max_tokens,
            stream: false,
            tools: None,
        };

        let mut last_error = None;
        for attempt in 0..=MAX_RETRIES {
            match self.client.complete_message(&request).await {
                Ok(response) => {
                    let mut usage = TokenUsage {
                        input_tokens: response.usage.input_tokens,
                        output_tokens: response.usage.output_tokens,
                        cache_read_tokens: response.usage.cache_read_input_tokens,
                        cache_creation_tokens: response.usage.cache_creation_input_tokens,
                        cost_usd: 0.0,
                    };
                    usage.cost_usd = pricing::estimate_cost(&response.model, &usage);
                    self.record_usage(&usage);
                    return Ok(response.text());
                }
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| ValetError::Internal("retry loop exhausted".into())))
    }

    fn usage_totals(&self) -> UsageTotals {
        *self.usage.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The model ladder for overload failover, strongest first.
fn failover_chain(model: &str) -> Vec<String> {
    let mut chain = vec![model.to_string()];
    if model.contains("opus") {
        chain.push(SONNET_FALLBACK.to_string());
        chain.push(HAIKU_FALLBACK.to_string());
    } else if model.contains("sonnet") {
        chain.push(HAIKU_FALLBACK.to_string());
    }
    chain.dedup();
    chain
}

/// Attempt 0 and the first retry stay on the requested model; later retries
/// step down the chain one model per attempt.
fn model_for_attempt(chain: &[String], attempt: u32) -> &str {
    let index = (attempt.saturating_sub(1) as usize).min(chain.len() - 1);
    &chain[index]
}

/// Exponential backoff with 30% jitter, capped.
fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE.saturating_mul(2u32.saturating_pow(attempt)).min(BACKOFF_CAP);
    let jitter = rand::thread_rng().gen_range(0.7..1.3);
    base.mul_f64(jitter)
}

fn classify_sse_error(type_: &str, message: &str) -> ValetError {
    match type_ {
        "overloaded_error" | "rate_limit_error" | "api_error" => ValetError::Transient {
            message: format!("{type_}: {message}"),
        },
        _ => ValetError::Provider {
            message: format!("{type_}: {message}"),
            source: None,
        },
    }
}

fn resolve_api_key(config_key: &Option<String>) -> Result<String, ValetError> {
    if let Some(key) = config_key
        && !key.is_empty()
    {
        return Ok(key.clone());
    }
    std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
        ValetError::Config(
            "Anthropic API key not found. Set anthropic.api_key in config or the ANTHROPIC_API_KEY environment variable.".into(),
        )
    })
}
