// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider trait: the unified query contract every backend family implements.

use async_trait::async_trait;

use crate::error::ValetError;
use crate::types::{QueryRequest, QueryResponse, UsageTotals};

/// A language-model backend behind the unified query contract.
///
/// Implementations own retry, backoff, and (where supported) model failover
/// internally -- callers never observe transient failures. Every query is
/// bound to the union of the caller's cancellation token and the provider's
/// hard time ceiling; on either, the accumulated partial text is returned
/// rather than discarded.
#[async_trait]
pub trait QueryProvider: Send + Sync {
    /// Stable provider name for logs and status output.
    fn name(&self) -> &str;

    /// Executes one query, streaming progress events to `request.progress`
    /// if present.
    async fn query(&self, request: QueryRequest) -> Result<QueryResponse, ValetError>;

    /// Plain text completion, used by memory helpers (fact extraction,
    /// consolidation). No session, no streaming, no failover.
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, ValetError>;

    /// Snapshot of the process-lifetime usage counters.
    fn usage_totals(&self) -> UsageTotals;
}
