// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Edit-in-place streamed delivery over a channel transport.
//!
//! Consumes the provider's progress events and keeps one outbound message
//! updated as text accumulates, throttled to respect channel rate limits.
//! Long answers split at paragraph boundaries into follow-up messages, and
//! formatting failures fall back to plain text.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};
use valet_core::traits::ChannelTransport;
use valet_core::types::ProgressEvent;
use valet_core::ValetError;

/// Leave margin below typical 4096-char channel limits for suffix overhead.
const SPLIT_THRESHOLD: usize = 3800;
const DEFAULT_THROTTLE: Duration = Duration::from_millis(1500);
const PARSE_MODE: &str = "Markdown";

/// Streams one answer into a chat via send-then-edit.
pub struct StreamingCoordinator {
    transport: Arc<dyn ChannelTransport>,
    chat_id: String,
    throttle: Duration,
    buffer: String,
    message_id: Option<String>,
    last_edit: Instant,
    current_tool: Option<String>,
    edit_in_flight: bool,
}

impl StreamingCoordinator {
    pub fn new(transport: Arc<dyn ChannelTransport>, chat_id: impl Into<String>) -> Self {
        Self::with_throttle(transport, chat_id, DEFAULT_THROTTLE)
    }

    pub fn with_throttle(
        transport: Arc<dyn ChannelTransport>,
        chat_id: impl Into<String>,
        throttle: Duration,
    ) -> Self {
        Self {
            transport,
            chat_id: chat_id.into(),
            throttle,
            buffer: String::new(),
            message_id: None,
            // Allow an immediate first send.
            last_edit: Instant::now() - throttle,
            current_tool: None,
            edit_in_flight: false,
        }
    }

    /// Drains the progress channel until the provider drops it, then flushes
    /// the final text without any status suffix.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ProgressEvent>) -> Result<(), ValetError> {
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::TextChunk(text) => {
                    // Text after a tool call means the tool is done.
                    self.current_tool = None;
                    self.buffer.push_str(&text);
                    if self.last_edit.elapsed() >= self.throttle {
                        self.flush(false).await?;
                    }
                }
                ProgressEvent::ToolUse(name) => {
                    self.current_tool = Some(name);
                    if self.last_edit.elapsed() >= self.throttle {
                        self.flush(false).await?;
                    }
                }
                // Notices are advisory and never part of the answer.
                ProgressEvent::Notice(text) => {
                    let _ = self.transport.send(&self.chat_id, &text, None).await;
                }
            }
        }
        self.current_tool = None;
        self.finish().await
    }

    /// The final forced flush. Answers beyond the size ceiling roll over
    /// into follow-up messages so no trailing content is lost.
    async fn finish(&mut self) -> Result<(), ValetError> {
        loop {
            if self.buffer.len() <= SPLIT_THRESHOLD {
                return self.flush(true).await;
            }
            let (head, rest) = split_at_paragraph_boundary(&self.buffer, SPLIT_THRESHOLD);
            let rest = rest.to_string();
            self.buffer.truncate(head.len());
            self.flush(true).await?;
            debug!(chat_id = %self.chat_id, "rolling long answer into a new message");
            self.message_id = None;
            self.buffer = rest;
        }
    }

    /// While streaming, oversized buffers render as a truncated prefix with
    /// a continuing marker; the untruncated tail is delivered at the end.
    fn display_text(&self, final_flush: bool) -> String {
        if final_flush {
            return self.buffer.clone();
        }
        let mut text = if self.buffer.len() > SPLIT_THRESHOLD {
            let (head, _) = split_at_paragraph_boundary(&self.buffer, SPLIT_THRESHOLD);
            format!("{head}\n\n_continuing..._")
        } else {
            self.buffer.clone()
        };
        match &self.current_tool {
            Some(tool) => text.push_str(&format!("\n\n_using {tool}..._")),
            None => text.push_str("\n\n_working..._"),
        }
        text
    }

    async fn flush(&mut self, final_flush: bool) -> Result<(), ValetError> {
        if self.buffer.is_empty() || self.edit_in_flight {
            return Ok(());
        }
        let text = self.display_text(final_flush);

        self.edit_in_flight = true;
        let result = self.send_or_edit(&text).await;
        self.edit_in_flight = false;
        result?;

        self.last_edit = Instant::now();
        Ok(())
    }

    /// Formatted first, plain on failure, fresh plain message as a last
    /// resort before giving up.
    async fn send_or_edit(&mut self, text: &str) -> Result<(), ValetError> {
        match &self.message_id {
            None => {
                let id = match self
                    .transport
                    .send(&self.chat_id, text, Some(PARSE_MODE))
                    .await
                {
                    Ok(id) => id,
                    Err(e) => {
                        debug!(error = %e, "formatted send failed, retrying as plain text");
                        self.transport.send(&self.chat_id, text, None).await?
                    }
                };
                self.message_id = Some(id);
                Ok(())
            }
            Some(id) => {
                match self
                    .transport
                    .edit(&self.chat_id, id, text, Some(PARSE_MODE))
                    .await
                {
                    Ok(()) => Ok(()),
                    Err(e) if e.to_string().contains("not modified") => {
                        debug!("message unchanged, skipping edit");
                        Ok(())
                    }
                    Err(e) => {
                        debug!(error = %e, "formatted edit failed, retrying as plain text");
                        match self.transport.edit(&self.chat_id, id, text, None).await {
                            Ok(()) => Ok(()),
                            Err(e) => {
                                warn!(error = %e, "plain edit failed, sending a new message");
                                let id = self.transport.send(&self.chat_id, text, None).await?;
                                self.message_id = Some(id);
                                Ok(())
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Splits text at the best boundary before `max_len`: double newline, then
/// single newline, then space, then a hard split.
pub fn split_at_paragraph_boundary(text: &str, max_len: usize) -> (&str, &str) {
    if text.len() <= max_len {
        return (text, "");
    }
    let mut boundary = max_len;
    while !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    let search_region = &text[..boundary];

    if let Some(pos) = search_region.rfind("\n\n") {
        return (&text[..pos], text[pos + 2..].trim_start());
    }
    if let Some(pos) = search_region.rfind('\n') {
        return (&text[..pos], text[pos + 1..].trim_start());
    }
    if let Some(pos) = search_region.rfind(' ') {
        return (&text[..pos], &text[pos + 1..]);
    }
    (&text[..boundary], &text[boundary..])
}
