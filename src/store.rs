use crate::types::{Message, Persona};
use std::collections::HashMap;

pub const WELCOME_MESSAGE_ID: &str = "welcome";

/// Append-only, ordered conversation. Messages are replaced in place by id,
/// never removed.
#[derive(Debug, Default)]
pub struct ConversationStore {
    messages: Vec<Message>,
    index: HashMap<String, usize>,
    counter: u64,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the persona's greeting.
    pub fn with_welcome(persona: Persona) -> Self {
        let mut store = Self::new();
        store.push(Message::ai(WELCOME_MESSAGE_ID, persona.greeting()));
        store
    }

    /// Fresh id such as `u-3` or `ai-4`.
    pub fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{prefix}-{}", self.counter)
    }

    /// Appends `message`. Returns `false` (and stores nothing) if the id is taken.
    pub fn push(&mut self, message: Message) -> bool {
        if self.index.contains_key(&message.id) {
            return false;
        }
        self.index.insert(message.id.clone(), self.messages.len());
        self.messages.push(message);
        true
    }

    /// Applies `update` to the message with `id`, keeping its position and id.
    pub fn update(&mut self, id: &str, update: impl FnOnce(&mut Message)) -> Option<&Message> {
        let position = *self.index.get(id)?;
        let message = &mut self.messages[position];
        update(message);
        message.id = id.to_string();
        Some(message)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.index.get(id).map(|&position| &self.messages[position])
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
