use crate::models::{Message, MessageRole};

/// In-memory, ordered conversation sent to the model on every turn.
///
/// Insertion order is conversational order. Stored messages are never edited
/// in place; [`Conversation::replace_last_assistant`] swaps the trailing
/// record for a new one instead. The store does no locking of its own, the
/// owning session serializes access.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Creates a conversation, seeded with a `system` message when a prompt is given.
    pub fn new(system_prompt: Option<&str>) -> Self {
        let mut conversation = Self::default();
        conversation.reset(system_prompt.map(|p| Message::new(MessageRole::System, p)));
        conversation
    }

    pub fn append(&mut self, role: MessageRole, content: impl Into<String>) -> Message {
        let message = Message::new(role, content);
        self.messages.push(message.clone());
        message
    }

    /// Replaces the whole sequence with nothing or with a single seed message.
    pub fn reset(&mut self, seed: Option<Message>) {
        self.messages.clear();
        self.messages.extend(seed);
    }

    /// Copy of the conversation as it is right now.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Swaps the trailing assistant message for a fresh one with `content`.
    ///
    /// Returns the new message, or `None` when the conversation does not end
    /// with an assistant reply.
    ///
    /// The session stores each reply once, at the end of its turn, and never
    /// calls this. It is for embedders that own a `Conversation` and correct
    /// the last reply after the fact.
    pub fn replace_last_assistant(&mut self, content: impl Into<String>) -> Option<Message> {
        let last = self.messages.last_mut()?;
        if last.role != MessageRole::Assistant {
            return None;
        }
        *last = Message::new(MessageRole::Assistant, content);
        Some(last.clone())
    }

    /// Messages shown to the user, i.e. everything but the system prompt.
    pub fn transcript(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .cloned()
            .collect()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
