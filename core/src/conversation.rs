//! Conversation persistence seam and the per-turn chat flow

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

use crate::manager::{GenerateOptions, ProviderManager};
use crate::message::{Message, Role};
use crate::persona::Persona;
use crate::{ParleyError, Result};

/// Storage for conversation history, owned by the host application
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Messages of a conversation in the order they were added
    async fn get_history(&self, user: &str, conversation_id: &str) -> Result<Vec<Message>>;

    async fn add_message(
        &self,
        user: &str,
        conversation_id: &str,
        role: Role,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    /// Record the assistant's final answer for a turn
    async fn add_response(
        &self,
        user: &str,
        conversation_id: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message: Message,
    timestamp: DateTime<Utc>,
}

/// Process-local store keyed by (user, conversation)
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: DashMap<(String, String), Vec<StoredMessage>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, user: &str, conversation_id: &str, message: Message, timestamp: DateTime<Utc>) {
        self.conversations
            .entry((user.to_string(), conversation_id.to_string()))
            .or_default()
            .push(StoredMessage { message, timestamp });
    }

    /// Timestamp of the most recent message in a conversation
    pub fn last_activity(&self, user: &str, conversation_id: &str) -> Option<DateTime<Utc>> {
        self.conversations
            .get(&(user.to_string(), conversation_id.to_string()))
            .and_then(|c| c.last().map(|m| m.timestamp))
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_history(&self, user: &str, conversation_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .conversations
            .get(&(user.to_string(), conversation_id.to_string()))
            .map(|c| c.iter().map(|m| m.message.clone()).collect())
            .unwrap_or_default())
    }

    async fn add_message(
        &self,
        user: &str,
        conversation_id: &str,
        role: Role,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.push(user, conversation_id, Message::new(role, content), timestamp);
        Ok(())
    }

    async fn add_response(
        &self,
        user: &str,
        conversation_id: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.push(user, conversation_id, Message::assistant(content), timestamp);
        Ok(())
    }
}

/// One persona talking through a shared [`ProviderManager`]
pub struct ChatSession {
    manager: Arc<ProviderManager>,
    store: Arc<dyn ConversationStore>,
    persona: Persona,
}

impl ChatSession {
    pub fn new(manager: Arc<ProviderManager>, store: Arc<dyn ConversationStore>, persona: Persona) -> Self {
        Self {
            manager,
            store,
            persona,
        }
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Run one user turn and return the final answer.
    ///
    /// The user message is stored before any model call; the answer is stored
    /// exactly once. Errors other than configuration errors become a
    /// best-effort apology instead of ending the conversation.
    pub async fn respond(
        &self,
        user: &str,
        conversation_id: &str,
        text: &str,
        options: &GenerateOptions,
    ) -> Result<String> {
        self.store
            .add_message(user, conversation_id, Role::User, text, Utc::now())
            .await?;

        let history = self.store.get_history(user, conversation_id).await?;
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !self.persona.system_prompt.is_empty() {
            messages.push(Message::system(self.persona.system_prompt.clone()));
        }
        messages.extend(history);

        let answer = match self.manager.generate_response(&messages, options).await {
            Ok(response) => response.into_text().await,
            Err(e) => Err(e),
        };
        let reply = match answer {
            Ok(reply) => reply,
            Err(e @ ParleyError::Configuration(_)) => return Err(e),
            Err(e) => {
                warn!(target: "chat_session", persona = %self.persona.name, error = %e, "Turn failed; answering with fallback text");
                fallback_reply(&e)
            }
        };

        self.store
            .add_response(user, conversation_id, &reply, Utc::now())
            .await?;
        info!(target: "chat_session", persona = %self.persona.name, conversation = %conversation_id, chars = reply.len(), "Turn complete");
        Ok(reply)
    }
}

fn fallback_reply(e: &ParleyError) -> String {
    match e {
        ParleyError::ToolLoopLimit(_) => {
            "I got stuck calling tools and stopped. Could you rephrase the request?".to_string()
        }
        ParleyError::NotInitialized => "No language model is selected yet.".to_string(),
        other if other.is_transient() => {
            "The language model is busy right now. Please try again in a moment.".to_string()
        }
        other => format!("Sorry, I could not produce an answer ({}).", other),
    }
}
