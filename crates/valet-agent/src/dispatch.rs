// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message dispatch: the orchestration entry point handed to the front end.
//!
//! `MessageGateway` admits each inbound message through the sender's lane,
//! opens a streaming coordinator over the channel transport, runs the
//! provider query under a per-user stop token, and settles persistence
//! afterwards (session create-or-touch, query log, fact extraction).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use valet_config::ValetConfig;
use valet_core::traits::{ChannelTransport, QueryProvider};
use valet_core::types::{QueryRequest, QueryResponse, Session};
use valet_storage::queries::{query_log, sessions};
use valet_storage::{now_iso, Database};

use crate::lanes::LaneQueue;
use crate::streaming::StreamingCoordinator;

/// Queued plus running messages allowed per user before rejection.
const LANE_DEPTH_CAP: usize = 3;
/// Progress channel capacity; bounded so a stalled transport backpressures
/// the provider instead of buffering unboundedly.
const PROGRESS_CHANNEL_CAPACITY: usize = 64;
const TITLE_CHARS: usize = 40;

const BUSY_NOTICE: &str =
    "You already have a few requests in flight. Give me a moment to catch up.";

/// Per-message orchestration, constructed once at startup and shared with
/// the front end as an explicit dependency.
pub struct MessageGateway {
    provider: Arc<dyn QueryProvider>,
    transport: Arc<dyn ChannelTransport>,
    db: Database,
    lanes: LaneQueue,
    /// In-flight stop tokens by user id.
    stops: Mutex<HashMap<String, CancellationToken>>,
    session_timeout_hours: i64,
    memory_enabled: bool,
}

impl MessageGateway {
    pub fn new(
        provider: Arc<dyn QueryProvider>,
        transport: Arc<dyn ChannelTransport>,
        db: Database,
        config: &ValetConfig,
    ) -> Self {
        Self {
            provider,
            transport,
            db,
            lanes: LaneQueue::new(LANE_DEPTH_CAP),
            stops: Mutex::new(HashMap::new()),
            session_timeout_hours: config.session.timeout_hours,
            memory_enabled: config.memory.enabled,
        }
    }

    /// Admits one inbound message into the sender's lane. When the lane is
    /// at capacity the message is dropped and a busy notice goes out
    /// immediately instead.
    pub async fn handle_message(self: &Arc<Self>, user_id: &str, chat_id: &str, text: &str) {
        let gateway = Arc::clone(self);
        let user = user_id.to_string();
        let chat = chat_id.to_string();
        let prompt = text.to_string();

        let accepted = self.lanes.submit(user_id, async move {
            gateway.run_query(&user, &chat, &prompt).await;
        });

        if !accepted {
            info!(user_id, "lane full, sending busy notice");
            if let Err(e) = self.transport.send(chat_id, BUSY_NOTICE, None).await {
                warn!(user_id, error = %e, "failed to deliver busy notice");
            }
        }
    }

    /// Cancels the user's in-flight query, if any. The provider returns its
    /// accumulated partial text; this is a requested stop, not an error.
    pub fn stop(&self, user_id: &str) -> bool {
        let token = self
            .stops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id);
        match token {
            Some(token) => {
                info!(user_id, "stopping in-flight query");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Forgets the user's active session so the next message starts a fresh
    /// conversation.
    pub async fn reset_session(&self, user_id: &str) -> Result<(), valet_core::ValetError> {
        sessions::clear_active_session(&self.db, user_id).await
    }

    pub fn lane_depth(&self, user_id: &str) -> usize {
        self.lanes.depth(user_id)
    }

    async fn run_query(&self, user_id: &str, chat_id: &str, prompt: &str) {
        let _ = self.transport.typing(chat_id).await;

        let existing = match sessions::get_active_session(
            &self.db,
            user_id,
            self.session_timeout_hours,
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                // A broken session lookup degrades to a fresh conversation.
                warn!(user_id, error = %e, "active session lookup failed");
                None
            }
        };

        let cancel = CancellationToken::new();
        self.stops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id.to_string(), cancel.clone());

        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let coordinator = StreamingCoordinator::new(Arc::clone(&self.transport), chat_id);
        let stream = tokio::spawn(coordinator.run(rx));

        let request = QueryRequest {
            prompt: prompt.to_string(),
            session_id: existing.as_ref().map(|s| s.session_id.clone()),
            user_id: Some(user_id.to_string()),
            model_override: None,
            progress: Some(tx),
            cancel: cancel.clone(),
        };

        let started = Instant::now();
        let result = self.provider.query(request).await;
        let latency_ms = started.elapsed().as_millis() as i64;

        // The provider dropped its progress sender; the coordinator drains
        // the channel and performs its final flush.
        let delivered = match stream.await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(user_id, error = %e, "streamed delivery failed");
                false
            }
            Err(e) => {
                error!(user_id, error = %e, "streaming coordinator panicked");
                false
            }
        };

        self.stops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(user_id);

        match result {
            Ok(response) => {
                if !delivered && !response.text.is_empty() {
                    // Streamed delivery broke partway; resend the whole
                    // answer as a fresh plain message so nothing is lost.
                    if let Err(e) = self.transport.send(chat_id, &response.text, None).await {
                        error!(user_id, error = %e, "plain resend of the answer failed");
                    }
                }
                self.settle(user_id, chat_id, prompt, latency_ms, &response)
                    .await;
            }
            Err(e) => {
                error!(user_id, error = %e, "query failed");
                if let Err(send_err) = self
                    .transport
                    .send(chat_id, &e.user_message(), None)
                    .await
                {
                    error!(user_id, error = %send_err, "failed to deliver error message");
                }
            }
        }
    }

    /// Post-query bookkeeping. Persistence failures are logged, never
    /// surfaced; the answer already reached the user.
    async fn settle(
        &self,
        user_id: &str,
        chat_id: &str,
        prompt: &str,
        latency_ms: i64,
        response: &QueryResponse,
    ) {
        if let Some(session_id) = &response.session_id {
            let outcome = match sessions::get_active_session(
                &self.db,
                user_id,
                self.session_timeout_hours,
            )
            .await
            {
                Ok(Some(existing)) if existing.session_id == *session_id => {
                    sessions::touch_session(&self.db, user_id, session_id).await
                }
                _ => {
                    let now = now_iso();
                    sessions::create_session(
                        &self.db,
                        &Session {
                            user_id: user_id.to_string(),
                            session_id: session_id.clone(),
                            model: response
                                .model
                                .clone()
                                .unwrap_or_else(|| "unknown".to_string()),
                            title: derive_title(prompt),
                            created_at: now.clone(),
                            last_active_at: now,
                        },
                    )
                    .await
                }
            };
            if let Err(e) = outcome {
                warn!(user_id, error = %e, "session bookkeeping failed");
            }
        }

        if let Some(message) = &response.error {
            // Partial text already went out through the coordinator; the
            // termination reason goes out as a plain follow-up.
            if let Err(e) = self.transport.send(chat_id, message, None).await {
                warn!(user_id, error = %e, "failed to deliver termination notice");
            }
        }

        let usage = response.usage.unwrap_or_default();
        if let Err(e) = query_log::log_query(
            &self.db,
            user_id,
            prompt,
            latency_ms,
            i64::from(usage.input_tokens),
            i64::from(usage.output_tokens),
            usage.cost_usd,
            &response.tools_used,
        )
        .await
        {
            warn!(user_id, error = %e, "query log append failed");
        }

        if self.memory_enabled && response.error.is_none() && !response.text.is_empty() {
            match valet_memory::extractor::extract_facts(
                self.provider.as_ref(),
                &self.db,
                user_id,
                prompt,
                &response.text,
            )
            .await
            {
                Ok(saved) if saved > 0 => info!(user_id, saved, "extracted memory facts"),
                Ok(_) => {}
                Err(e) => warn!(user_id, error = %e, "fact extraction failed"),
            }
        }
    }
}

/// Session title from the first words of the first prompt, truncated on a
/// char boundary.
fn derive_title(prompt: &str) -> String {
    let flat = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= TITLE_CHARS {
        return flat;
    }
    let mut title: String = flat.chars().take(TITLE_CHARS).collect();
    title.push_str("...");
    title
}
