//! Common types used across the Querious client

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

use crate::error::Error;

/// Scope types for document ownership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    /// Document belongs to a specific chat
    Chat,
    /// Document belongs to a project and is shared across its chats
    Project,
}

impl ScopeType {
    /// Wire name used in query strings
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Chat => "chat",
            ScopeType::Project => "project",
        }
    }
}

impl FromStr for ScopeType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chat" => Ok(ScopeType::Chat),
            "project" => Ok(ScopeType::Project),
            other => Err(Error::InvalidInput(format!("unknown scope type '{}'", other))),
        }
    }
}

impl std::fmt::Display for ScopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A chat or project acting as a document-ownership boundary
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub scope_type: ScopeType,
    pub scope_id: String,
}

impl Scope {
    pub fn chat(id: impl Into<String>) -> Self {
        Self {
            scope_type: ScopeType::Chat,
            scope_id: id.into(),
        }
    }

    pub fn project(id: impl Into<String>) -> Self {
        Self {
            scope_type: ScopeType::Project,
            scope_id: id.into(),
        }
    }

    /// Query parameters identifying this scope
    pub fn query(&self) -> [(&'static str, &str); 2] {
        [
            ("scope_type", self.scope_type.as_str()),
            ("scope_id", self.scope_id.as_str()),
        ]
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.scope_type, self.scope_id)
    }
}

/// User subscription plans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPlan {
    #[default]
    Free,
    Pro,
    Premium,
}

impl SubscriptionPlan {
    /// Parse a plan name; anything unrecognised is treated as the free plan.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "pro" => SubscriptionPlan::Pro,
            "premium" => SubscriptionPlan::Premium,
            _ => SubscriptionPlan::Free,
        }
    }
}

impl<'de> Deserialize<'de> for SubscriptionPlan {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = Option::<String>::deserialize(deserializer)?;
        Ok(name.map(|n| Self::from_name(&n)).unwrap_or_default())
    }
}

impl std::fmt::Display for SubscriptionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubscriptionPlan::Free => "free",
            SubscriptionPlan::Pro => "pro",
            SubscriptionPlan::Premium => "premium",
        };
        write!(f, "{}", name)
    }
}

/// Valid roles for chat messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// Document lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Uploaded, ingestion in progress
    Pending,
    /// Fully ingested and searchable
    Ready,
    /// Marked for deletion, hidden from queries
    Deleting,
}

/// Authenticated user as returned by `/api/auth/me`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default, deserialize_with = "timestamp::optional")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::optional")]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub plan: SubscriptionPlan,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub token_limit: u64,
    #[serde(default)]
    pub active_documents_count: u64,
}

/// Envelope of `/api/auth/me` and `/api/auth/login`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEnvelope {
    pub user: User,
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub is_new: bool,
}

/// Reply to `POST /api/auth/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterOutcome {
    pub message: String,
    /// A previously deleted account was restored and can log in right away
    #[serde(default)]
    pub restored: bool,
}

/// One signed-in device, from `GET /api/auth/sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub device_info: Option<String>,
    #[serde(default, deserialize_with = "timestamp::optional")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::optional")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_current: bool,
}

/// A project containing documents and chats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    pub name: String,
    #[serde(default, deserialize_with = "timestamp::optional")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A chat, either standalone or within a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub quality_preset: Option<String>,
    #[serde(default, deserialize_with = "timestamp::optional")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A persisted chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, deserialize_with = "timestamp::optional")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// A document in the global document store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub s3_key: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub size_bytes: u64,
    pub status: DocumentStatus,
    #[serde(default, deserialize_with = "timestamp::optional")]
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// Ingestion status of a single document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentStatusInfo {
    pub document_id: String,
    pub filename: String,
    pub status: DocumentStatus,
    #[serde(default)]
    pub size_bytes: u64,
}

/// Outcome of `/api/upload`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub document: Document,
    /// `uploaded` for new content, `linked` when the checksum matched an existing document
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Outcome of deleting or unlinking a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteOutcome {
    /// `deleted`, `deleting` or `unlinked`
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// A prior conversation turn sent along with a question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Body of `POST /api/chat/{chat_id}/stream`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub history: Vec<ChatTurn>,
    pub top_k: u32,
}

/// Body of `POST /api/events/query`, the non-streaming path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEventRequest {
    pub question: String,
    pub chat_id: String,
    pub scope_type: ScopeType,
    pub scope_id: String,
    pub model: String,
    pub top_k: u32,
    pub history: Vec<ChatTurn>,
}

/// Event ids returned when a job is queued
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventIds {
    pub event_ids: Vec<String>,
}

/// Output of a completed query job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub num_contexts: u32,
    #[serde(default)]
    pub avg_confidence: f64,
    #[serde(default)]
    pub tokens_used: u64,
}

/// Default number of chunks retrieved per question
pub const DEFAULT_TOP_K: u32 = 10;

/// Maximum turns kept in the history window
pub const HISTORY_MAX_MESSAGES: usize = 10;

/// Estimated token budget for the history window
pub const HISTORY_MAX_TOKENS: usize = 4000;

/// Sliding window over prior turns.
///
/// Keeps the last [`HISTORY_MAX_MESSAGES`] turns, then drops the oldest
/// user/assistant pair while the estimated size (chars / 4) exceeds
/// [`HISTORY_MAX_TOKENS`], always leaving at least two turns.
pub fn recent_history(turns: &[ChatTurn]) -> Vec<ChatTurn> {
    let start = turns.len().saturating_sub(HISTORY_MAX_MESSAGES);
    let mut recent = &turns[start..];

    let estimate = |window: &[ChatTurn]| {
        window.iter().map(|t| t.content.chars().count()).sum::<usize>() / 4
    };

    while estimate(recent) > HISTORY_MAX_TOKENS && recent.len() > 2 {
        recent = &recent[2..];
    }

    recent.to_vec()
}

/// Backend timestamps arrive either as RFC 3339 or as naive UTC strings.
mod timestamp {
    use super::*;

    pub fn optional<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.and_then(|s| parse(&s)))
    }

    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}
