//! One chat's question/answer loop

use tracing::{debug, warn};

use querious_core::{
    recent_history, ChatTurn, MessageRole, QueryRequest, Result, StreamingConsumer,
    StreamingState, DEFAULT_TOP_K,
};

use crate::client::QueriousClient;

/// A chat session: prior turns plus the state of the current answer
///
/// Single-writer: `send` takes `&mut self`, so one conversation never has two
/// queries in flight.
pub struct Conversation<'a> {
    client: &'a QueriousClient,
    chat_id: String,
    turns: Vec<ChatTurn>,
    top_k: u32,
    persist: bool,
    consumer: StreamingConsumer,
}

impl<'a> Conversation<'a> {
    pub fn new(client: &'a QueriousClient, chat_id: impl Into<String>) -> Self {
        Self {
            client,
            chat_id: chat_id.into(),
            turns: Vec::new(),
            top_k: DEFAULT_TOP_K,
            persist: true,
            consumer: StreamingConsumer::new(),
        }
    }

    /// Continue an existing chat, loading its stored messages as history
    pub async fn resume(client: &'a QueriousClient, chat_id: impl Into<String>) -> Result<Self> {
        let mut conversation = Self::new(client, chat_id);
        let messages = client.list_messages(&conversation.chat_id).await?;
        conversation.turns = messages
            .into_iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| ChatTurn {
                role: m.role,
                content: m.content,
            })
            .collect();
        debug!(chat_id = %conversation.chat_id, turns = conversation.turns.len(), "resumed conversation");
        Ok(conversation)
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = top_k;
        self
    }

    /// Whether answered turns are saved to the chat's message log
    pub fn with_persistence(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn state(&self) -> &StreamingState {
        self.consumer.state()
    }

    /// Back to idle; history is kept
    pub fn reset(&mut self) {
        self.consumer.reset();
    }

    /// Drop history and state
    pub fn clear(&mut self) {
        self.turns.clear();
        self.consumer.reset();
    }

    /// Ask a question, reporting every state change to `observer`
    ///
    /// The exchange is appended to history only when the answer completes.
    pub async fn send<F>(&mut self, question: &str, observer: F) -> Result<StreamingState>
    where
        F: FnMut(&StreamingState),
    {
        let request = QueryRequest {
            question: question.to_string(),
            history: recent_history(&self.turns),
            top_k: self.top_k,
        };

        let state = self
            .client
            .stream_query(&self.chat_id, &request, &mut self.consumer, observer)
            .await?;

        if state.error.is_none() {
            let asked = ChatTurn::user(question);
            let answered = ChatTurn::assistant(state.content.clone());
            if self.persist {
                self.save(&asked, &[]).await;
                self.save(&answered, &state.sources).await;
            }
            self.turns.push(asked);
            self.turns.push(answered);
        }

        Ok(state)
    }

    async fn save(&self, turn: &ChatTurn, sources: &[String]) {
        if let Err(e) = self.client.save_message(&self.chat_id, turn, sources).await {
            warn!(chat_id = %self.chat_id, error = %e, "failed to save message");
        }
    }
}
