//! Streaming answer state machine
//!
//! `idle → searching` on send, `→ generating` on `sources`, `→ streaming` on
//! the first `chunk`, `→ done` on `done`, and any stage `→ error` on `error`.
//! Once `done` or `error` is reached further events are ignored.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LimitReached;
use crate::sse::{SseEvent, SseParser};

/// Stage of one streamed query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Idle,
    Searching,
    Generating,
    Streaming,
    Done,
    Error,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Error)
    }

    fn rank(self) -> u8 {
        match self {
            Stage::Idle => 0,
            Stage::Searching => 1,
            Stage::Generating => 2,
            Stage::Streaming => 3,
            Stage::Done | Stage::Error => 4,
        }
    }

    fn from_status(name: &str) -> Option<Stage> {
        match name {
            "searching" => Some(Stage::Searching),
            "generating" => Some(Stage::Generating),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Searching => "searching",
            Stage::Generating => "generating",
            Stage::Streaming => "streaming",
            Stage::Done => "done",
            Stage::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Observable state of one streamed query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingState {
    pub is_loading: bool,
    pub stage: Stage,
    pub sources: Vec<String>,
    pub scores: Vec<f64>,
    pub content: String,
    pub error: Option<String>,
    pub tokens_used: Option<u64>,
    /// Set when the error was a plan-limit refusal
    pub limit_reached: Option<LimitReached>,
    /// Message of the most recent `status` event
    pub status_message: Option<String>,
}

impl StreamingState {
    /// Fresh state for a query that has just been sent
    pub fn searching() -> Self {
        Self {
            is_loading: true,
            stage: Stage::Searching,
            ..Self::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Apply one decoded event; returns whether anything changed
    pub fn apply(&mut self, event: StreamEvent) -> bool {
        if self.is_terminal() {
            debug!(stage = %self.stage, "ignoring event after terminal stage");
            return false;
        }

        match event {
            StreamEvent::Status { stage, message } => {
                let mut changed = false;
                if let Some(next) = stage.as_deref().and_then(Stage::from_status) {
                    if next.rank() > self.stage.rank() {
                        self.stage = next;
                        changed = true;
                    }
                }
                if message.is_some() && message != self.status_message {
                    self.status_message = message;
                    changed = true;
                }
                changed
            }
            StreamEvent::Sources { sources, scores } => {
                self.sources = sources;
                self.scores = scores;
                if self.stage.rank() < Stage::Generating.rank() {
                    self.stage = Stage::Generating;
                }
                true
            }
            StreamEvent::Chunk { content } => {
                self.stage = Stage::Streaming;
                self.content.push_str(&content);
                true
            }
            StreamEvent::Done {
                full_response,
                tokens_used,
                sources,
            } => {
                if let Some(full) = full_response {
                    self.content = full;
                }
                if self.sources.is_empty() {
                    if let Some(sources) = sources {
                        self.sources = sources;
                    }
                }
                self.tokens_used = tokens_used;
                self.stage = Stage::Done;
                self.is_loading = false;
                true
            }
            StreamEvent::Error { message, limit } => {
                self.error = Some(message);
                self.limit_reached = limit;
                self.stage = Stage::Error;
                self.is_loading = false;
                true
            }
        }
    }

    /// Close out a stream that ended without `done` or `error`
    pub fn finish(&mut self) -> bool {
        if self.is_terminal() || self.stage == Stage::Idle {
            return false;
        }
        self.stage = Stage::Done;
        self.is_loading = false;
        true
    }
}

/// A decoded streaming event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    Status {
        stage: Option<String>,
        message: Option<String>,
    },
    Sources {
        sources: Vec<String>,
        scores: Vec<f64>,
    },
    Chunk {
        content: String,
    },
    Done {
        full_response: Option<String>,
        tokens_used: Option<u64>,
        sources: Option<Vec<String>>,
    },
    Error {
        message: String,
        limit: Option<LimitReached>,
    },
}

#[derive(Deserialize)]
struct StatusPayload {
    #[serde(default)]
    stage: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct SourcesPayload {
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    scores: Vec<f64>,
}

#[derive(Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct DonePayload {
    #[serde(default)]
    full_response: Option<String>,
    #[serde(default)]
    tokens_used: Option<u64>,
    #[serde(default)]
    sources: Option<Vec<String>>,
}

impl StreamEvent {
    /// Decode an SSE event; `None` for malformed JSON or unknown event names
    pub fn from_sse(event: &SseEvent) -> Option<StreamEvent> {
        let value: serde_json::Value = match serde_json::from_str(&event.data) {
            Ok(value) => value,
            Err(e) => {
                debug!(event = %event.event, error = %e, "skipping malformed event payload");
                return None;
            }
        };

        let decoded = match event.event.as_str() {
            "status" => serde_json::from_value::<StatusPayload>(value)
                .ok()
                .map(|p| StreamEvent::Status {
                    stage: p.stage,
                    message: p.message,
                }),
            "sources" => serde_json::from_value::<SourcesPayload>(value)
                .ok()
                .map(|p| StreamEvent::Sources {
                    sources: p.sources,
                    scores: p.scores,
                }),
            "chunk" => serde_json::from_value::<ChunkPayload>(value)
                .ok()
                .map(|p| StreamEvent::Chunk { content: p.content }),
            "done" => serde_json::from_value::<DonePayload>(value)
                .ok()
                .map(|p| StreamEvent::Done {
                    full_response: p.full_response,
                    tokens_used: p.tokens_used,
                    sources: p.sources,
                }),
            "error" => Some(Self::error_from_value(&value)),
            other => {
                debug!(event = other, "ignoring unknown event");
                None
            }
        };

        if decoded.is_none() {
            debug!(event = %event.event, "skipping event with unexpected payload shape");
        }
        decoded
    }

    fn error_from_value(value: &serde_json::Value) -> StreamEvent {
        if let Some(limit) = LimitReached::from_value(value) {
            return StreamEvent::Error {
                message: limit.to_string(),
                limit: Some(limit),
            };
        }

        let message = ["error", "message", "detail"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| "Unknown streaming error".to_string());

        StreamEvent::Error {
            message,
            limit: None,
        }
    }
}

/// Parser and state for one conversation's current query
///
/// A consumer is single-writer: `start` resets it for a new query and every
/// read of the response body goes through `feed`.
#[derive(Debug, Clone, Default)]
pub struct StreamingConsumer {
    parser: SseParser,
    state: StreamingState,
}

impl StreamingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset and enter `searching`
    pub fn start(&mut self) {
        self.parser.reset();
        self.state = StreamingState::searching();
    }

    /// Back to `idle`
    pub fn reset(&mut self) {
        self.parser.reset();
        self.state = StreamingState::default();
    }

    /// Process one read of the body; returns whether the state changed
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        let events = self.parser.feed(chunk);
        self.apply_all(events)
    }

    /// End of body
    pub fn finish(&mut self) -> bool {
        let events = self.parser.finish();
        let changed = self.apply_all(events);
        self.state.finish() || changed
    }

    /// Transport failure while reading the body
    pub fn fail(&mut self, message: impl Into<String>) {
        self.state.apply(StreamEvent::Error {
            message: message.into(),
            limit: None,
        });
    }

    /// The request was refused before streaming began because of a plan limit
    pub fn refuse(&mut self, limit: LimitReached) {
        self.state.apply(StreamEvent::Error {
            message: limit.to_string(),
            limit: Some(limit),
        });
    }

    pub fn state(&self) -> &StreamingState {
        &self.state
    }

    pub fn into_state(self) -> StreamingState {
        self.state
    }

    fn apply_all(&mut self, events: Vec<SseEvent>) -> bool {
        let mut changed = false;
        for event in events {
            if let Some(decoded) = StreamEvent::from_sse(&event) {
                changed |= self.state.apply(decoded);
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(payload: &str) -> StreamingState {
        let mut consumer = StreamingConsumer::new();
        consumer.start();
        consumer.feed(payload.as_bytes());
        consumer.finish();
        consumer.into_state()
    }

    #[test]
    fn test_hello_example() {
        let state = run(
            "event: chunk\ndata: {\"content\":\"Hel\"}\n\nevent: chunk\ndata:{\"content\":\"lo\"}\n\nevent: done\ndata:{\"full_response\":\"Hello\"}\n\n",
        );
        assert_eq!(state.content, "Hello");
        assert_eq!(state.stage, Stage::Done);
        assert!(!state.is_loading);
    }

    #[test]
    fn test_full_response_wins() {
        let state = run(
            "event: chunk\ndata: {\"content\":\"Helo wrld\"}\n\nevent: done\ndata: {\"full_response\":\"Hello world\",\"tokens_used\":42}\n\n",
        );
        assert_eq!(state.content, "Hello world");
        assert_eq!(state.tokens_used, Some(42));
    }

    #[test]
    fn test_done_without_full_response_keeps_accumulated() {
        let state = run("data: {\"content\":\"a\"}\ndata: {\"content\":\"b\"}\nevent: done\ndata: {}\n");
        assert_eq!(state.content, "ab");
        assert_eq!(state.stage, Stage::Done);
        assert_eq!(state.tokens_used, None);
    }

    #[test]
    fn test_stage_transitions() {
        let mut consumer = StreamingConsumer::new();
        assert_eq!(consumer.state().stage, Stage::Idle);

        consumer.start();
        assert_eq!(consumer.state().stage, Stage::Searching);
        assert!(consumer.state().is_loading);

        consumer.feed(b"event: sources\ndata: {\"sources\":[\"a.pdf\",\"b.pdf\"],\"num_contexts\":2,\"scores\":[0.91,0.4]}\n\n");
        assert_eq!(consumer.state().stage, Stage::Generating);
        assert_eq!(consumer.state().sources, vec!["a.pdf", "b.pdf"]);
        assert_eq!(consumer.state().scores, vec![0.91, 0.4]);

        consumer.feed(b"event: chunk\ndata: {\"content\":\"x\"}\n\n");
        assert_eq!(consumer.state().stage, Stage::Streaming);

        consumer.feed(b"event: done\ndata: {\"full_response\":\"x\",\"tokens_used\":7}\n\n");
        assert_eq!(consumer.state().stage, Stage::Done);

        consumer.reset();
        assert_eq!(consumer.state(), &StreamingState::default());
    }

    #[test]
    fn test_status_moves_forward_only() {
        let mut state = StreamingState::searching();
        assert!(state.apply(StreamEvent::Status {
            stage: Some("generating".to_string()),
            message: Some("Generating response...".to_string()),
        }));
        assert_eq!(state.stage, Stage::Generating);

        state.apply(StreamEvent::Chunk { content: "a".to_string() });
        state.apply(StreamEvent::Status {
            stage: Some("searching".to_string()),
            message: None,
        });
        assert_eq!(state.stage, Stage::Streaming);
        assert_eq!(state.status_message.as_deref(), Some("Generating response..."));
    }

    #[test]
    fn test_malformed_payload_skipped() {
        let state = run("event: chunk\ndata: {not json\n\ndata: {\"content\":\"ok\"}\n\nevent: done\ndata: {}\n\n");
        assert_eq!(state.content, "ok");
        assert_eq!(state.stage, Stage::Done);
        assert!(state.error.is_none());
    }

    #[test]
    fn test_error_event() {
        let state = run("event: status\ndata: {\"stage\":\"searching\"}\n\nevent: error\ndata: {\"error\":\"Chat not found\"}\n\n");
        assert_eq!(state.stage, Stage::Error);
        assert_eq!(state.error.as_deref(), Some("Chat not found"));
        assert!(state.limit_reached.is_none());
        assert!(!state.is_loading);
    }

    #[test]
    fn test_limit_reached_error_is_distinct() {
        let state = run(
            "event: error\ndata: {\"error\":\"limit_reached\",\"resource\":\"tokens\",\"limit\":10000,\"used\":10020}\n\n",
        );
        assert_eq!(state.stage, Stage::Error);
        let limit = state.limit_reached.unwrap();
        assert_eq!(limit.resource, "tokens");
        assert_eq!(limit.used, Some(10020));
    }

    #[test]
    fn test_events_after_terminal_ignored() {
        let state = run("event: done\ndata: {\"full_response\":\"final\"}\n\nevent: chunk\ndata: {\"content\":\" extra\"}\n\nevent: error\ndata: {\"error\":\"late\"}\n\n");
        assert_eq!(state.content, "final");
        assert_eq!(state.stage, Stage::Done);
        assert!(state.error.is_none());
    }

    #[test]
    fn test_stream_ending_without_done() {
        let state = run("event: chunk\ndata: {\"content\":\"partial\"}");
        assert_eq!(state.content, "partial");
        assert_eq!(state.stage, Stage::Done);
        assert!(!state.is_loading);
    }

    #[test]
    fn test_fail_sets_error() {
        let mut consumer = StreamingConsumer::new();
        consumer.start();
        consumer.fail("connection reset");
        assert_eq!(consumer.state().stage, Stage::Error);
        assert_eq!(consumer.state().error.as_deref(), Some("connection reset"));
    }

    #[test]
    fn test_refuse_records_limit() {
        let mut consumer = StreamingConsumer::new();
        consumer.start();
        consumer.refuse(LimitReached {
            resource: "tokens".to_string(),
            limit: Some(10000),
            used: Some(10000),
        });
        assert_eq!(consumer.state().stage, Stage::Error);
        assert_eq!(
            consumer.state().error.as_deref(),
            Some("tokens limit reached (10000 of 10000 used)")
        );
        assert!(consumer.state().limit_reached.is_some());
    }
}
