use serde::{ Deserialize, Serialize };
use std::fmt;

pub const SEED_GREETING: &str = "How may I assist you today?";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Label used when the role is written into a prompt.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    role: Role,
    content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Ordered message history of one chat session, oldest first.
///
/// Always starts from the seed greeting. Messages are only ever appended;
/// the single way to shrink it is [`Conversation::reset`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            messages: vec![ChatMessage::assistant(SEED_GREETING)],
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.messages.push(ChatMessage::assistant(SEED_GREETING));
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_seed_greeting() {
        let conversation = Conversation::new();
        assert_eq!(conversation.messages(), &[ChatMessage::assistant(SEED_GREETING)]);
    }

    #[test]
    fn keeps_insertion_order() {
        let mut conversation = Conversation::new();
        conversation.push(ChatMessage::user("Hi"));
        conversation.push(ChatMessage::assistant("Hello!"));

        let roles: Vec<Role> = conversation
            .messages()
            .iter()
            .map(|m| m.role())
            .collect();
        assert_eq!(roles, vec![Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(conversation.last().map(|m| m.content()), Some("Hello!"));
    }

    #[test]
    fn reset_leaves_only_the_seed() {
        let mut conversation = Conversation::new();
        for i in 0..10 {
            conversation.push(ChatMessage::user(format!("question {}", i)));
            conversation.push(ChatMessage::assistant(format!("answer {}", i)));
        }
        assert_eq!(conversation.len(), 21);

        conversation.reset();
        assert_eq!(conversation, Conversation::new());
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::user("Hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"Hi"}"#);
    }
}
