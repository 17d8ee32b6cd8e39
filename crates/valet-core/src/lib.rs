// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Valet agent gateway.
//!
//! This crate provides the foundational trait definitions, error types, and
//! common types used throughout the Valet workspace. Providers and channel
//! transports implement traits defined here.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::ValetError;
pub use traits::{ChannelTransport, QueryProvider};
pub use types::{
    FactCategory, MemoryFact, ProgressEvent, QueryLogEntry, QueryRequest, QueryResponse, Session,
    TokenUsage, UsageTotals, WatchedResource,
};
