// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message orchestration for the Valet gateway.
//!
//! Inbound messages pass through per-user lanes (serial execution, bounded
//! depth), stream back out through a throttled edit-in-place coordinator,
//! and settle into sessions, the query log, and long-term memory.

pub mod dispatch;
pub mod lanes;
pub mod notify;
pub mod streaming;

pub use dispatch::MessageGateway;
pub use lanes::LaneQueue;
pub use notify::Notifier;
pub use streaming::StreamingCoordinator;
