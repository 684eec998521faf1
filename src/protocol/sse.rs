//! Server-Sent Events helpers
//!
//! Encoders for the Anthropic streaming event sequence:
//!
//! ```text
//! message_start -> content_block_start -> content_block_delta* ->
//! content_block_stop -> message_delta -> message_stop
//! ```
//!
//! plus [`SseDecoder`], which reassembles upstream SSE frames that arrive
//! split across arbitrary chunk boundaries.

use bytes::Bytes;
use serde_json::{Value, json};

/// Frame one SSE event
pub fn event(name: &str, data: &Value) -> Bytes {
    Bytes::from(format!("event: {}\ndata: {}\n\n", name, data))
}

pub fn message_start(id: &str, model: &str, input_tokens: u32) -> Bytes {
    event(
        "message_start",
        &json!({
            "type": "message_start",
            "message": {
                "id": id,
                "type": "message",
                "role": "assistant",
                "content": [],
                "model": model,
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {"input_tokens": input_tokens, "output_tokens": 0},
            },
        }),
    )
}

pub fn content_block_start(index: u32) -> Bytes {
    event(
        "content_block_start",
        &json!({
            "type": "content_block_start",
            "index": index,
            "content_block": {"type": "text", "text": ""},
        }),
    )
}

pub fn text_delta(index: u32, text: &str) -> Bytes {
    event(
        "content_block_delta",
        &json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {"type": "text_delta", "text": text},
        }),
    )
}

pub fn content_block_stop(index: u32) -> Bytes {
    event(
        "content_block_stop",
        &json!({"type": "content_block_stop", "index": index}),
    )
}

pub fn message_delta(stop_reason: &str, output_tokens: u32) -> Bytes {
    event(
        "message_delta",
        &json!({
            "type": "message_delta",
            "delta": {"stop_reason": stop_reason, "stop_sequence": null},
            "usage": {"output_tokens": output_tokens},
        }),
    )
}

pub fn message_stop() -> Bytes {
    event("message_stop", &json!({"type": "message_stop"}))
}

/// In-stream error event, sent when a committed stream fails
pub fn error_event(error_type: &str, message: &str) -> Bytes {
    event(
        "error",
        &json!({
            "type": "error",
            "error": {"type": error_type, "message": message},
        }),
    )
}

/// Complete event sequence for a single text reply
pub fn text_message_events(model: &str, text: &str, output_tokens: u32) -> Vec<Bytes> {
    let id = super::new_message_id();
    let mut events = vec![message_start(&id, model, 0), content_block_start(0)];
    if !text.is_empty() {
        events.push(text_delta(0, text));
    }
    events.extend([
        content_block_stop(0),
        message_delta("end_turn", output_tokens),
        message_stop(),
    ]);
    events
}

/// One decoded SSE frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE frame decoder
///
/// Bytes are buffered until a full line is available, so a multi-byte
/// character split across two chunks is decoded correctly. A frame is
/// emitted at each blank line; multiple `data:` lines are joined with `\n`.
/// Comment lines (`:keep-alive`) are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line_bytes: Vec<u8> = self.pending.drain(..=pos).collect();
            let raw = String::from_utf8_lossy(&line_bytes[..pos]);
            let line = raw.trim_end_matches('\r');

            if line.is_empty() {
                if let Some(frame) = self.take_frame() {
                    frames.push(frame);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        frames
    }

    /// Flush a final frame that was not terminated by a blank line
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.pending.is_empty() {
            let mut tail = std::mem::take(&mut self.pending);
            tail.push(b'\n');
            let mut frames = self.feed(&tail);
            if let Some(frame) = frames.pop() {
                return Some(frame);
            }
        }
        self.take_frame()
    }

    fn take_frame(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        Some(SseFrame {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}
