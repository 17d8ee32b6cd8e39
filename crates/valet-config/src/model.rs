// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Valet agent gateway.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Valet configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable
/// overrides. All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ValetConfig {
    /// Agent identity and logging settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Backend selection.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Anthropic API settings.
    #[serde(default)]
    pub anthropic: AnthropicConfig,

    /// OpenAI-compatible API settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Session lifecycle settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Long-term memory settings.
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Agent identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Display name of the agent.
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_agent_name() -> String {
    "valet".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Backend selection. The backend set is closed; the binary resolves the
/// name to a concrete provider exactly once at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Which backend family answers queries: "anthropic" or "openai".
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
        }
    }
}

fn default_backend() -> String {
    "anthropic".to_string()
}

/// Anthropic API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AnthropicConfig {
    /// Anthropic API key. `None` requires the environment variable.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Default model to use for queries.
    #[serde(default = "default_anthropic_model")]
    pub default_model: String,

    /// Maximum tokens to generate per response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Anthropic API version string.
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_model: default_anthropic_model(),
            max_tokens: default_max_tokens(),
            api_version: default_api_version(),
        }
    }
}

fn default_anthropic_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_api_version() -> String {
    "2023-06-01".to_string()
}

/// OpenAI-compatible API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAiConfig {
    /// API key. `None` requires the environment variable.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL, overridable for OpenAI-compatible servers.
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Default model to use for queries.
    #[serde(default = "default_openai_model")]
    pub default_model: String,

    /// Maximum tokens to generate per response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Hours of inactivity before an in-process conversation history is
    /// reaped by the hourly sweep.
    #[serde(default = "default_history_idle_hours")]
    pub history_idle_hours: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_openai_base_url(),
            default_model: default_openai_model(),
            max_tokens: default_max_tokens(),
            history_idle_hours: default_history_idle_hours(),
        }
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_history_idle_hours() -> u64 {
    2
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("valet").join("valet.db"))
        .and_then(|p| p.to_str().map(String::from))
        .unwrap_or_else(|| "valet.db".to_string())
}

fn default_wal_mode() -> bool {
    true
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Hours of inactivity after which the active session expires and the
    /// next message starts a fresh conversation.
    #[serde(default = "default_session_timeout_hours")]
    pub timeout_hours: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_hours: default_session_timeout_hours(),
        }
    }
}

fn default_session_timeout_hours() -> i64 {
    6
}

/// Long-term memory configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Master switch for fact extraction and context injection.
    #[serde(default = "default_memory_enabled")]
    pub enabled: bool,

    /// How many top-scored facts are injected into an outgoing prompt.
    #[serde(default = "default_injection_limit")]
    pub injection_limit: usize,

    /// Minimum fact count before a user's facts are considered for
    /// consolidation.
    #[serde(default = "default_consolidation_min_facts")]
    pub consolidation_min_facts: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: default_memory_enabled(),
            injection_limit: default_injection_limit(),
            consolidation_min_facts: default_consolidation_min_facts(),
        }
    }
}

fn default_memory_enabled() -> bool {
    true
}

fn default_injection_limit() -> usize {
    30
}

fn default_consolidation_min_facts() -> i64 {
    10
}
