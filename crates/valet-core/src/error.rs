// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Valet agent gateway.

use thiserror::Error;

/// The primary error type used across all Valet components.
///
/// Variants follow the gateway's failure taxonomy: transient backend
/// failures are the only retryable kind, auth failures carry a remediation
/// hint and are never retried, and malformed output from completion-based
/// helpers is absorbed by the caller as a no-op.
#[derive(Debug, Error)]
pub enum ValetError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Messaging front-end errors (send/edit failure, rate limiting).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transient backend failures: rate limits, overload, 5xx-class errors.
    /// The only retryable variant.
    #[error("transient backend error: {message}")]
    Transient { message: String },

    /// Authentication failure. Fatal for the attempt, never retried.
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// Non-retryable provider errors (malformed request, unknown model, parse failure).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A query exceeded its hard time ceiling.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Unparseable structured output from a completion-based helper
    /// (fact extraction, consolidation). Callers treat this as a no-op.
    #[error("malformed upstream data: {0}")]
    Malformed(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ValetError {
    /// Whether the retry loop may attempt this query again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ValetError::Transient { .. })
    }

    /// The single human-readable line shown to the end user.
    ///
    /// Internal retry and failover detail never reaches this string.
    pub fn user_message(&self) -> String {
        match self {
            ValetError::Auth { message } => {
                format!("Authentication failed: {message}")
            }
            ValetError::Timeout { duration } => {
                format!("The request timed out after {}s.", duration.as_secs())
            }
            ValetError::Transient { .. } => {
                "The model service is overloaded right now. Please try again in a moment."
                    .to_string()
            }
            other => format!("Sorry, something went wrong: {other}"),
        }
    }
}
