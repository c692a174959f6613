//! HTTP and streaming client for the Querious API
//!
//! [`QueriousClient`] talks to the backend with a cookie session, refreshing
//! it once on `401`. On top of it sit the streaming [`Conversation`], the
//! batch uploader and the polling fallback for background jobs.

pub mod client;
pub mod config;
pub mod conversation;
mod polling;
pub mod refresh;
mod stream;
pub mod upload;


pub use client::{ChatUpdate, QueriousClient};
pub use config::ClientConfig;
pub use conversation::Conversation;
pub use refresh::RefreshGate;
pub use upload::{upload_candidates, upload_paths, UploadFailure, UploadReport};
