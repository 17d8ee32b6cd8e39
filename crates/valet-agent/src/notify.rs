// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound notifications for background jobs.
//!
//! Watchers and schedulers run outside the message flow; this wraps the
//! channel transport into the plain `notify` callback they are handed.

use std::sync::Arc;

use tracing::warn;
use valet_core::traits::ChannelTransport;
use valet_core::ValetError;

/// Push-notification handle for collaborators that never see a chat loop.
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn ChannelTransport>,
    chat_id: String,
}

impl Notifier {
    pub fn new(transport: Arc<dyn ChannelTransport>, chat_id: impl Into<String>) -> Self {
        Self {
            transport,
            chat_id: chat_id.into(),
        }
    }

    /// Sends a plain-text notification. Delivery failures are logged and
    /// swallowed; background jobs must not die on a flaky channel.
    pub async fn notify(&self, text: &str) {
        if let Err(e) = self.try_notify(text).await {
            warn!(chat_id = %self.chat_id, error = %e, "notification delivery failed");
        }
    }

    /// Like [`notify`](Self::notify) but surfaces the delivery error.
    pub async fn try_notify(&self, text: &str) -> Result<(), ValetError> {
        self.transport.send(&self.chat_id, text, None).await?;
        Ok(())
    }
}
