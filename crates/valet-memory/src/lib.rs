// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-term memory for the Valet gateway.
//!
//! Facts live in valet-storage; this crate decides which facts matter
//! (scoring), assembles prompt context from them (recall), harvests new ones
//! from conversations (extractor), and periodically merges redundant ones
//! (consolidation).

pub mod consolidation;
pub mod extractor;
pub mod recall;
pub mod scoring;
