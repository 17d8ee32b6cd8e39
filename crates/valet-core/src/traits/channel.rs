// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel transport trait: the messaging front end's send/edit/typing
//! primitives consumed by the streaming coordinator.

use async_trait::async_trait;

use crate::error::ValetError;

/// The subset of a messaging platform the gateway needs.
///
/// The command surface, keyboards, and media handling live with the front
/// end; this trait is only what streaming delivery and notifications use.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Sends a new message, returning its platform message id.
    ///
    /// `parse_mode` requests platform formatting (e.g. "MarkdownV2");
    /// `None` sends plain text.
    async fn send(
        &self,
        chat_id: &str,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Result<String, ValetError>;

    /// Edits a previously sent message in place.
    async fn edit(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Result<(), ValetError>;

    /// Deletes a message. Used by callers that fall back to delete-and-resend.
    async fn delete(&self, chat_id: &str, message_id: &str) -> Result<(), ValetError>;

    /// Shows a typing indicator. Best-effort; failures are not fatal.
    async fn typing(&self, chat_id: &str) -> Result<(), ValetError>;
}
