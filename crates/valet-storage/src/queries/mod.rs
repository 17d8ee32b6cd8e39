// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query functions organized by entity.

pub mod facts;
pub mod query_log;
pub mod sessions;
pub mod watched;
