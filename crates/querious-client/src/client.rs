//! Querious API client implementation

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use querious_core::{
    Chat, ChatTurn, DeleteOutcome, Document, DocumentStatusInfo, Error, EventIds, LimitReached,
    Message, MessageRole, Project, QueriousApi, QueryEventRequest, QueryRequest, RegisterOutcome,
    Result, Scope, SessionInfo, UploadLimits, UploadResponse, User, UserEnvelope,
};

use crate::config::ClientConfig;
use crate::refresh::RefreshGate;

/// Querious API client
///
/// Holds one cookie jar for the session. Cloning is not supported; share the
/// client behind an `Arc` when several tasks need it.
pub struct QueriousClient {
    config: ClientConfig,
    client: Client,
    refresh: RefreshGate,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    email: &'a str,
    password: &'a str,
    name: &'a str,
}

#[derive(Serialize)]
struct PasswordChangeRequest<'a> {
    current_password: &'a str,
    new_password: &'a str,
}

#[derive(Deserialize)]
struct SessionList {
    #[serde(default)]
    sessions: Vec<SessionInfo>,
}

#[derive(Serialize)]
struct CreateProjectRequest<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct CreateChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<&'a str>,
    title: &'a str,
}

/// Fields accepted by `PATCH /api/chats/{id}`; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_pinned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_preset: Option<String>,
}

#[derive(Serialize)]
struct SaveMessageRequest<'a> {
    chat_id: &'a str,
    role: MessageRole,
    content: &'a str,
    sources: &'a [String],
}

#[derive(Deserialize)]
struct StatusMessage {
    #[serde(default)]
    message: Option<String>,
}

impl QueriousClient {
    /// Create a new client from configuration
    pub fn new(config: ClientConfig) -> Result<Self> {
        Url::parse(&config.api_url).map_err(|e| {
            Error::Configuration(format!("invalid API URL '{}': {}", config.api_url, e))
        })?;
        Url::parse(&config.jobs_url).map_err(|e| {
            Error::Configuration(format!("invalid jobs URL '{}': {}", config.jobs_url, e))
        })?;

        // No client-wide timeout: the streaming endpoint stays open for the
        // whole answer. JSON calls set their own per-request timeout.
        let client = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self {
            config,
            client,
            refresh: RefreshGate::new(),
        })
    }

    /// Create a new client from environment variables
    pub fn from_env() -> Result<Self> {
        let config = ClientConfig::from_env()?;
        Self::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Underlying HTTP client, shared with the job poller
    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/api{}", self.config.api_url, path)
    }

    /// Send a request, refreshing the session and retrying once on 401
    ///
    /// `build` is called again for the retry, so it must produce a fresh
    /// request each time.
    pub(crate) async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> Result<RequestBuilder>,
    {
        let seen_epoch = self.refresh.epoch();
        let response = build(&self.client)?
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return check(response).await;
        }

        debug!(url = %response.url(), "request unauthorized, refreshing session");
        self.refresh
            .refresh(seen_epoch, || self.refresh_session())
            .await
            .map_err(|_| Error::SessionExpired)?;

        let retried = build(&self.client)?
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if retried.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %retried.url(), "still unauthorized after refresh");
            return Err(Error::SessionExpired);
        }
        check(retried).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self.endpoint(path);
        let timeout = self.config.request_timeout;
        let response = self
            .send(|c| Ok(c.get(&url).query(query).timeout(timeout)))
            .await?;
        decode(response).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path);
        let timeout = self.config.request_timeout;
        let response = self
            .send(|c| Ok(c.post(&url).json(body).timeout(timeout)))
            .await?;
        decode(response).await
    }

    async fn delete_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = self.endpoint(path);
        let timeout = self.config.request_timeout;
        let response = self
            .send(|c| Ok(c.delete(&url).query(query).timeout(timeout)))
            .await?;
        decode(response).await
    }

    /// `POST /api/auth/refresh`; rotates the cookie pair
    async fn refresh_session(&self) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint("/auth/refresh"))
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if response.status().is_success() {
            info!("session refreshed");
            Ok(())
        } else {
            warn!(status = %response.status(), "session refresh rejected");
            Err(Error::SessionExpired)
        }
    }

    // Auth

    /// Log in with email and password; the session cookies land in the jar
    pub async fn login(&self, email: &str, password: &str) -> Result<UserEnvelope> {
        let response = self
            .client
            .post(self.endpoint("/auth/login"))
            .json(&LoginRequest { email, password })
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::Authentication(detail_message(&body).unwrap_or_else(|| {
                    "Invalid email or password".to_string()
                })))
            }
            _ => {
                let envelope: UserEnvelope = decode(check(response).await?).await?;
                info!(user = %envelope.user.email, "logged in");
                Ok(envelope)
            }
        }
    }

    /// Log in with the credentials from configuration
    pub async fn login_from_config(&self) -> Result<UserEnvelope> {
        match (&self.config.email, &self.config.password) {
            (Some(email), Some(password)) => self.login(email, password).await,
            _ => Err(Error::Configuration(
                "QUERIOUS_EMAIL and QUERIOUS_PASSWORD must be set".to_string(),
            )),
        }
    }

    pub async fn logout(&self) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint("/auth/logout"))
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        check(response).await?;
        info!("logged out");
        Ok(())
    }

    /// `GET /api/auth/me`
    pub async fn me(&self) -> Result<UserEnvelope> {
        self.get_json("/auth/me", &[]).await
    }

    /// Create an account. New accounts must verify their email before logging in.
    pub async fn register(&self, email: &str, password: &str, name: &str) -> Result<RegisterOutcome> {
        let response = self
            .client
            .post(self.endpoint("/auth/register"))
            .json(&RegisterRequest { email, password, name })
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let outcome: RegisterOutcome = decode(check(response).await?).await?;
        info!(email, restored = outcome.restored, "account registered");
        Ok(outcome)
    }

    /// Ask for a new verification email; the reply does not reveal whether the account exists
    pub async fn resend_verification(&self, email: &str) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint("/auth/resend-verification"))
            .query(&[("email", email)])
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let reply: StatusMessage = decode(check(response).await?).await?;
        Ok(reply.message.unwrap_or_default())
    }

    /// Revoke every session of the account, this one included
    pub async fn logout_all(&self) -> Result<()> {
        let url = self.endpoint("/auth/logout-all");
        let timeout = self.config.request_timeout;
        self.send(|c| Ok(c.post(&url).timeout(timeout))).await?;
        info!("logged out of all sessions");
        Ok(())
    }

    /// Active sessions of the account
    pub async fn sessions(&self) -> Result<Vec<SessionInfo>> {
        let list: SessionList = self.get_json("/auth/sessions", &[]).await?;
        Ok(list.sessions)
    }

    pub async fn revoke_session(&self, session_id: &str) -> Result<()> {
        let _: Value = self
            .delete_json(&format!("/auth/sessions/{}", session_id), &[])
            .await?;
        info!(session_id, "session revoked");
        Ok(())
    }

    /// Change the account password
    ///
    /// The session is confirmed first. The change itself skips the refresh
    /// path, so a 401 from it means the current password was wrong. The
    /// server revokes all refresh tokens afterwards.
    pub async fn change_password(&self, current_password: &str, new_password: &str) -> Result<()> {
        self.me().await?;

        let response = self
            .client
            .patch(self.endpoint("/auth/password"))
            .json(&PasswordChangeRequest {
                current_password,
                new_password,
            })
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Authentication(detail_message(&body).unwrap_or_else(|| {
                "Current password is incorrect".to_string()
            })));
        }
        check(response).await?;
        info!("password changed");
        Ok(())
    }

    // Projects

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        self.get_json("/projects", &[]).await
    }

    pub async fn create_project(&self, name: &str) -> Result<Project> {
        self.post_json("/projects", &CreateProjectRequest { name }).await
    }

    pub async fn delete_project(&self, project_id: &str) -> Result<()> {
        let _: Value = self
            .delete_json(&format!("/projects/{}", project_id), &[])
            .await?;
        Ok(())
    }

    // Chats

    /// Chats of a project, or standalone chats when `project_id` is `None`
    pub async fn list_chats(&self, project_id: Option<&str>) -> Result<Vec<Chat>> {
        match project_id {
            Some(id) => self.get_json("/chats", &[("project_id", id)]).await,
            None => self.get_json("/chats", &[("standalone", "true")]).await,
        }
    }

    pub async fn create_chat(&self, project_id: Option<&str>, title: &str) -> Result<Chat> {
        self.post_json("/chats", &CreateChatRequest { project_id, title })
            .await
    }

    pub async fn get_chat(&self, chat_id: &str) -> Result<Chat> {
        self.get_json(&format!("/chats/{}", chat_id), &[]).await
    }

    pub async fn update_chat(&self, chat_id: &str, update: &ChatUpdate) -> Result<Chat> {
        let url = self.endpoint(&format!("/chats/{}", chat_id));
        let timeout = self.config.request_timeout;
        let response = self
            .send(|c| Ok(c.patch(&url).json(update).timeout(timeout)))
            .await?;
        decode(response).await
    }

    pub async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        let _: Value = self.delete_json(&format!("/chats/{}", chat_id), &[]).await?;
        Ok(())
    }

    // Messages

    pub async fn list_messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        self.get_json(&format!("/chats/{}/messages", chat_id), &[])
            .await
    }

    pub async fn save_message(
        &self,
        chat_id: &str,
        turn: &ChatTurn,
        sources: &[String],
    ) -> Result<Message> {
        let body = SaveMessageRequest {
            chat_id,
            role: turn.role,
            content: &turn.content,
            sources,
        };
        self.post_json("/messages", &body).await
    }

    // Documents

    pub async fn document_status(&self, document_id: &str) -> Result<DocumentStatusInfo> {
        self.get_json(&format!("/documents/{}/status", document_id), &[])
            .await
    }

    // Queries

    /// Open the answer stream for a question; the body is read by the caller
    pub(crate) async fn open_stream(&self, chat_id: &str, request: &QueryRequest) -> Result<Response> {
        let url = self.endpoint(&format!("/chat/{}/stream", chat_id));
        self.send(|c| {
            Ok(c.post(&url)
                .header("Accept", "text/event-stream")
                .json(request))
        })
        .await
    }

    /// Queue a question as a background job; returns the event ids to poll
    pub async fn send_query_event(&self, request: &QueryEventRequest) -> Result<Vec<String>> {
        let ids: EventIds = self.post_json("/events/query", request).await?;
        debug!(count = ids.event_ids.len(), "query event queued");
        Ok(ids.event_ids)
    }
}

#[async_trait]
impl QueriousApi for QueriousClient {
    async fn current_user(&self) -> Result<User> {
        Ok(self.me().await?.user)
    }

    async fn upload_limits(&self, scope: &Scope) -> Result<UploadLimits> {
        self.get_json("/upload-limits", &scope.query()).await
    }

    async fn upload_document(
        &self,
        scope: &Scope,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<UploadResponse> {
        let url = self.endpoint("/upload");
        let query = scope.query();
        let timeout = self.config.request_timeout;

        let response = self
            .send(|c| {
                let part = Part::bytes(content.clone())
                    .file_name(filename.to_string())
                    .mime_str("application/pdf")
                    .map_err(|e| Error::InvalidInput(e.to_string()))?;
                Ok(c.post(&url)
                    .query(&query)
                    .multipart(Form::new().part("file", part))
                    .timeout(timeout))
            })
            .await?;

        let uploaded: UploadResponse = decode(response).await?;
        info!(
            filename,
            status = %uploaded.status,
            document = %uploaded.document.id,
            "document uploaded"
        );
        Ok(uploaded)
    }

    async fn list_documents(&self, scope: &Scope) -> Result<Vec<Document>> {
        self.get_json("/documents", &scope.query()).await
    }

    async fn delete_document(
        &self,
        document_id: &str,
        scope: Option<&Scope>,
    ) -> Result<DeleteOutcome> {
        let path = format!("/documents/{}", document_id);
        match scope {
            Some(scope) => self.delete_json(&path, &scope.query()).await,
            None => self.delete_json(&path, &[]).await,
        }
    }
}

/// Turn a non-success response into the matching error
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_for_status(status, &body))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let text = response
        .text()
        .await
        .map_err(|e| Error::Network(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| Error::Serialization(e.to_string()))
}

/// Map an error status and body to an [`Error`]
pub(crate) fn error_for_status(status: StatusCode, body: &str) -> Error {
    if status == StatusCode::FORBIDDEN {
        let limit = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("detail").and_then(LimitReached::from_value));
        if let Some(limit) = limit {
            return Error::QuotaExceeded(limit);
        }
    }

    let message = detail_message(body).unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        } else {
            trimmed.to_string()
        }
    });

    Error::Api {
        status: status.as_u16(),
        message,
    }
}

/// The FastAPI `detail` of an error body, or a `message` field
fn detail_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail") {
        Some(Value::String(detail)) => Some(detail.clone()),
        Some(Value::Null) | None => serde_json::from_value::<StatusMessage>(value)
            .ok()
            .and_then(|m| m.message),
        Some(other) => Some(other.to_string()),
    }
}
