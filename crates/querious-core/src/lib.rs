//! Core traits and types for the Querious client
//!
//! This crate defines the domain model shared by the HTTP client and the CLI:
//! plan limits, upload quota accounting, the Server-Sent-Events parser and the
//! streaming answer state machine. It performs no I/O of its own, which keeps
//! everything here testable without a running backend.

pub mod api;
pub mod error;
pub mod limits;
pub mod quota;
pub mod sse;
pub mod streaming;
pub mod types;


pub use api::QueriousApi;
pub use error::{Error, LimitReached, Result};
pub use limits::{
    PlanLimits, Remaining, UploadLimits, ALLOWED_EXTENSIONS, MAX_FILE_SIZE,
    MAX_TOTAL_SIZE_PER_SCOPE, PDF_MAGIC,
};
pub use quota::{
    FileRejection, QuotaGate, UploadCandidate, UploadPlan, Uploadability, validate_candidate,
};
pub use sse::{SseEvent, SseParser};
pub use streaming::{Stage, StreamEvent, StreamingConsumer, StreamingState};
pub use types::*;
