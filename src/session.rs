use log::{ info, warn };
use std::sync::Arc;
use uuid::Uuid;

use crate::config::generation::GenerationConfig;
use crate::config::prompt::assemble_prompt;
use crate::error::TurnError;
use crate::llm::dispatcher::dispatch;
use crate::llm::GenerationBackend;
use crate::models::chat::{ ChatMessage, Conversation };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingResponse,
}

/// One interactive chat session, owned by the connection that created it.
pub struct ChatSession {
    id: String,
    conversation: Conversation,
    state: SessionState,
    backend: Arc<dyn GenerationBackend>,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation: Conversation::new(),
            state: SessionState::Idle,
            backend,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs one turn. On success the assistant reply is committed and
    /// returned. A provider failure leaves only the user message behind;
    /// empty input or invalid settings leave the conversation untouched.
    pub async fn submit(
        &mut self,
        text: &str,
        config: &GenerationConfig
    ) -> Result<ChatMessage, TurnError> {
        if text.trim().is_empty() {
            return Err(TurnError::EmptyMessage);
        }
        config.validate()?;

        let prompt = assemble_prompt(self.conversation.messages(), text);
        self.conversation.push(ChatMessage::user(text));
        self.state = SessionState::AwaitingResponse;

        let result = dispatch(self.backend.as_ref(), &prompt, config).await;
        self.state = SessionState::Idle;

        match result {
            Ok(reply) => {
                info!(
                    "Session {}: reply of {} bytes, {} messages in history",
                    self.id,
                    reply.len(),
                    self.conversation.len() + 1
                );
                let message = ChatMessage::assistant(reply);
                self.conversation.push(message.clone());
                Ok(message)
            }
            Err(e) => {
                warn!("Session {}: turn failed: {}", self.id, e);
                Err(e)
            }
        }
    }

    pub fn clear(&mut self) {
        info!("Session {}: clearing {} messages", self.id, self.conversation.len());
        self.conversation.reset();
        self.state = SessionState::Idle;
    }
}
