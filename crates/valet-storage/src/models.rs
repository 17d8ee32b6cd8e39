// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain model types for storage entities.
//!
//! The canonical types are defined in `valet-core::types` for use across
//! trait boundaries. This module re-exports them for convenience within
//! the storage crate.

pub use valet_core::types::{FactCategory, MemoryFact, QueryLogEntry, Session, WatchedResource};
