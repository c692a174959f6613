//! Line-buffered Server-Sent-Events parser
//!
//! Reads arrive in arbitrary chunks. Everything up to the last newline is split
//! into lines and processed; the trailing partial line stays in the buffer and
//! is prefixed onto the next read. Buffering happens on raw bytes so a UTF-8
//! sequence split between two reads decodes correctly.

use serde::{Deserialize, Serialize};

/// Event name assumed when a `data:` line has no preceding `event:` line
pub const DEFAULT_EVENT: &str = "chunk";

/// One `data:` line together with the event name in force when it was read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental SSE decoder
#[derive(Debug, Clone)]
pub struct SseParser {
    buffer: Vec<u8>,
    current_event: String,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            current_event: DEFAULT_EVENT.to_string(),
        }
    }

    /// Feed one read; returns the events completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(event) = self.process_line(&text) {
                events.push(event);
            }
        }
        events
    }

    /// Flush the final line of a stream that did not end with a newline
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&line);
        self.process_line(&text).into_iter().collect()
    }

    /// Bytes held back waiting for a newline
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop buffered bytes and the current event name
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.current_event = DEFAULT_EVENT.to_string();
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(rest) = line.strip_prefix("event:") {
            self.current_event = rest.trim().to_string();
            return None;
        }

        let rest = line.strip_prefix("data:")?;
        let event = SseEvent {
            event: std::mem::replace(&mut self.current_event, DEFAULT_EVENT.to_string()),
            data: rest.trim().to_string(),
        };
        Some(event)
    }
}

/// Parse a complete payload in one go
pub fn parse_all(payload: &[u8]) -> Vec<SseEvent> {
    let mut parser = SseParser::new();
    let mut events = parser.feed(payload);
    events.extend(parser.finish());
    events
}
