// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Console front end: a `ChannelTransport` over stdout.
//!
//! Lets `valet serve` run end to end without an external messaging
//! platform. Edits redraw the previously printed message in place with
//! ANSI escapes, so streamed answers update live in the terminal.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use valet_core::traits::ChannelTransport;
use valet_core::ValetError;

/// Stdout-backed transport. Tracks how many terminal lines each message
/// occupies so edits can move the cursor back and redraw.
#[derive(Default)]
pub struct ConsoleTransport {
    printed_lines: Mutex<HashMap<String, usize>>,
    next_id: AtomicU64,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_out(&self, text: &str) -> Result<(), ValetError> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{text}")
            .and_then(|()| out.flush())
            .map_err(|e| ValetError::Channel {
                message: format!("stdout write failed: {e}"),
                source: Some(Box::new(e)),
            })
    }
}

/// Cursor-up-and-clear sequence covering `lines` previously printed lines.
fn redraw_sequence(lines: usize) -> String {
    format!("\x1b[{lines}A\x1b[0J")
}

fn rendered_lines(text: &str) -> usize {
    text.lines().count().max(1)
}

#[async_trait]
impl ChannelTransport for ConsoleTransport {
    async fn send(
        &self,
        _chat_id: &str,
        text: &str,
        _parse_mode: Option<&str>,
    ) -> Result<String, ValetError> {
        self.write_out(text)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let id = id.to_string();
        self.printed_lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), rendered_lines(text));
        Ok(id)
    }

    async fn edit(
        &self,
        _chat_id: &str,
        message_id: &str,
        text: &str,
        _parse_mode: Option<&str>,
    ) -> Result<(), ValetError> {
        let mut lines = self
            .printed_lines
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let Some(previous) = lines.get(message_id).copied() else {
            return Err(ValetError::Channel {
                message: format!("unknown message id {message_id}"),
                source: None,
            });
        };
        self.write_out(&format!("{}{text}", redraw_sequence(previous)))?;
        lines.insert(message_id.to_string(), rendered_lines(text));
        Ok(())
    }

    async fn delete(&self, _chat_id: &str, message_id: &str) -> Result<(), ValetError> {
        let mut lines = self
            .printed_lines
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = lines.remove(message_id) {
            let mut out = std::io::stdout().lock();
            write!(out, "{}", redraw_sequence(previous))
                .and_then(|()| out.flush())
                .map_err(|e| ValetError::Channel {
                    message: format!("stdout write failed: {e}"),
                    source: Some(Box::new(e)),
                })?;
        }
        Ok(())
    }

    // A terminal has no typing indicator worth drawing.
    async fn typing(&self, _chat_id: &str) -> Result<(), ValetError> {
        Ok(())
    }
}
