// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SSE parser for Anthropic Messages API streaming responses.
//!
//! Turns a reqwest byte stream into typed [`StreamEvent`]s via the
//! `eventsource-stream` crate.

use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use valet_core::ValetError;

use crate::types::{
    SseContentBlockDelta, SseContentBlockStart, SseContentBlockStop, SseError, SseMessageDelta,
    SseMessageStart,
};

/// Typed events from the Anthropic streaming protocol.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    MessageStart(SseMessageStart),
    ContentBlockStart(SseContentBlockStart),
    ContentBlockDelta(SseContentBlockDelta),
    ContentBlockStop(SseContentBlockStop),
    MessageDelta(SseMessageDelta),
    MessageStop,
    Ping,
    Error(SseError),
}

fn decode<T: DeserializeOwned>(name: &str, data: &str) -> Result<T, ValetError> {
    serde_json::from_str(data).map_err(|e| ValetError::Provider {
        message: format!("failed to parse {name} event: {e}"),
        source: Some(Box::new(e)),
    })
}

/// Parses a streaming response body into [`StreamEvent`]s. Unknown event
/// names are skipped, per the API's forward-compatibility policy.
pub fn parse_sse_stream(
    response: reqwest::Response,
) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, ValetError>> + Send>> {
    let events = response.bytes_stream().eventsource().filter_map(|result| async move {
        match result {
            Ok(event) => {
                let parsed = match event.event.as_str() {
                    "message_start" => decode(&event.event, &event.data).map(StreamEvent::MessageStart),
                    "content_block_start" => {
                        decode(&event.event, &event.data).map(StreamEvent::ContentBlockStart)
                    }
                    "content_block_delta" => {
                        decode(&event.event, &event.data).map(StreamEvent::ContentBlockDelta)
                    }
                    "content_block_stop" => {
                        decode(&event.event, &event.data).map(StreamEvent::ContentBlockStop)
                    }
                    "message_delta" => decode(&event.event, &event.data).map(StreamEvent::MessageDelta),
                    "message_stop" => Ok(StreamEvent::MessageStop),
                    "ping" => Ok(StreamEvent::Ping),
                    "error" => decode(&event.event, &event.data).map(StreamEvent::Error),
                    _ => return None,
                };
                Some(parsed)
            }
            Err(e) => Some(Err(ValetError::Provider {
                message: format!("SSE stream error: {e}"),
                source: None,
            })),
        }
    });

    Box::pin(events)
}
