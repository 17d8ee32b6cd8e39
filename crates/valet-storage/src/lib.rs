// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for the Valet agent gateway.
//!
//! A single tokio-rusqlite connection serializes all writes. Schema changes
//! ship as embedded refinery migrations and run on open.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::Database;

/// Current UTC time as an RFC 3339 string, the timestamp format used across
/// all tables.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
