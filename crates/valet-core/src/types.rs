// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across the Valet gateway: the unified query contract,
//! progress events, usage accounting, and the persisted domain entities.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// --- Query contract ---

/// A progress event emitted by a provider while a query is in flight.
///
/// Consumed by the streaming coordinator through a bounded mpsc channel,
/// preserving ordering and backpressure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// An addition to the accumulating answer text.
    TextChunk(String),
    /// The agent has started invoking a named capability.
    ToolUse(String),
    /// An advisory notice (e.g., model downgrade). Never part of the answer.
    Notice(String),
}

/// A request under the unified query contract.
#[derive(Debug)]
pub struct QueryRequest {
    /// The outgoing prompt text.
    pub prompt: String,
    /// Existing conversation handle, if the caller wants continuation.
    pub session_id: Option<String>,
    /// User id. Enables memory-context injection on providers that support it.
    pub user_id: Option<String>,
    /// Overrides the provider's default model for this query only.
    pub model_override: Option<String>,
    /// Progress event sink. `None` disables streaming notifications.
    pub progress: Option<mpsc::Sender<ProgressEvent>>,
    /// Caller-supplied cancellation. Providers union this with their hard ceiling.
    pub cancel: CancellationToken,
}

impl QueryRequest {
    /// Creates a request with just a prompt; all optional fields unset.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            session_id: None,
            user_id: None,
            model_override: None,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// The unified result of one query, produced after internal retries and
/// failover are exhausted or one attempt succeeds.
#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    /// Full response text (possibly partial if aborted or timed out).
    pub text: String,
    /// Resolved conversation handle for continuation.
    pub session_id: Option<String>,
    /// Distinct tool names invoked during the query, in first-use order.
    pub tools_used: Vec<String>,
    /// Token usage of the successful attempt only.
    pub usage: Option<TokenUsage>,
    /// Set on timeout or unexpected termination; empty on success and on
    /// user-initiated stop (which was requested, so it is not an error).
    pub error: Option<String>,
    /// The model that actually answered (after any failover).
    pub model: Option<String>,
}

/// Token usage statistics for a single query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_creation_tokens: u32,
    pub cost_usd: f64,
}

/// Process-lifetime usage counters owned by a provider instance.
///
/// Passed to status-reporting collaborators as an explicit dependency,
/// never a module-level singleton.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub queries: u64,
}

impl UsageTotals {
    /// Folds one query's usage into the cumulative counters.
    pub fn record(&mut self, usage: &TokenUsage) {
        self.input_tokens += u64::from(usage.input_tokens);
        self.output_tokens += u64::from(usage.output_tokens);
        self.cost_usd += usage.cost_usd;
        self.queries += 1;
    }
}

// --- Persisted domain entities ---

/// One active or historical conversation thread for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Owning user id.
    pub user_id: String,
    /// Backend-assigned conversation handle (opaque).
    pub session_id: String,
    /// Model identifier in use for this conversation.
    pub model: String,
    /// Human-readable title, derived from the first prompt.
    pub title: String,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
    /// ISO 8601 last-active timestamp, refreshed on every message.
    pub last_active_at: String,
}

/// An atomic piece of long-term knowledge about a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFact {
    pub id: i64,
    pub user_id: String,
    /// Free-text fact. Unique per (user, exact text).
    pub fact: String,
    /// Stored category string; parse with [`FactCategory::from_str_value`].
    pub category: String,
    /// Provenance: "explicit", "extracted", "consolidated".
    pub source: String,
    pub created_at: String,
    pub updated_at: String,
    pub last_accessed_at: String,
    pub access_count: i64,
}

/// Closed category vocabulary for memory facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactCategory {
    Preference,
    Decision,
    Personal,
    Technical,
    Project,
    Workflow,
    General,
}

impl FactCategory {
    /// String form for SQLite storage and prompt rendering.
    pub fn as_str(&self) -> &'static str {
        match self {
            FactCategory::Preference => "preference",
            FactCategory::Decision => "decision",
            FactCategory::Personal => "personal",
            FactCategory::Technical => "technical",
            FactCategory::Project => "project",
            FactCategory::Workflow => "workflow",
            FactCategory::General => "general",
        }
    }

    /// Parse from a stored or model-produced string. Unknown values map to
    /// `General` rather than failing -- category is advisory, not load-bearing.
    pub fn from_str_value(s: &str) -> Self {
        match s {
            "preference" => FactCategory::Preference,
            "decision" => FactCategory::Decision,
            "personal" => FactCategory::Personal,
            "technical" => FactCategory::Technical,
            "project" => FactCategory::Project,
            "workflow" => FactCategory::Workflow,
            _ => FactCategory::General,
        }
    }

    /// All categories, in the order they render in a memory context block.
    pub fn all() -> [FactCategory; 7] {
        [
            FactCategory::Preference,
            FactCategory::Decision,
            FactCategory::Personal,
            FactCategory::Technical,
            FactCategory::Project,
            FactCategory::Workflow,
            FactCategory::General,
        ]
    }
}

/// One append-only analytics record per completed query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub id: i64,
    pub user_id: String,
    /// Prompt preview truncated to 50 characters.
    pub prompt_preview: String,
    pub latency_ms: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
    /// Comma-joined tool names, empty when no tools ran.
    pub tools: String,
    pub created_at: String,
}

/// A monitored external resource (web page, feed) checked by background jobs.
///
/// Shares the store with the core but is driven entirely by collaborators
/// through the notify callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedResource {
    pub id: i64,
    pub user_id: String,
    pub url: String,
    /// Content hash from the last check, for change detection.
    pub last_hash: Option<String>,
    pub last_checked_at: Option<String>,
    pub created_at: String,
}
