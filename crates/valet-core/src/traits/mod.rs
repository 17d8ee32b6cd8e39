// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait definitions for Valet's two seams: language-model backends and
//! messaging front ends.

pub mod channel;
pub mod provider;

pub use channel::ChannelTransport;
pub use provider::QueryProvider;
