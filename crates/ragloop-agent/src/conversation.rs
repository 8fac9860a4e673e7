use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use ragloop_core::types::{ChatMessage, ConversationId, Role};

const CURRENT_QUESTION: &str = "\n\nCurrent question: ";

/// The question itself when `prompt` carries a history prefix.
pub fn current_question(prompt: &str) -> &str {
    match prompt.rfind(CURRENT_QUESTION) {
        Some(i) if prompt.starts_with("Previous conversation:") => &prompt[i + CURRENT_QUESTION.len()..],
        _ => prompt,
    }
}

/// In-memory conversation history, keyed by conversation id.
///
/// History lives for the lifetime of the process only. Nothing is evicted:
/// conversations stay until deleted and each keeps every message, so memory
/// grows with traffic. Only the last `max_messages` are ever replayed into a
/// prompt.
pub struct ConversationStore {
    conversations: Mutex<HashMap<String, Conversation>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub messages: Vec<ChatMessage>,
    pub started_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Conversation>> {
        self.conversations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve the caller's id, or mint a new one.
    pub fn resolve(&self, id: Option<&str>) -> ConversationId {
        match id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => ConversationId::from_str(id),
            None => ConversationId::new(),
        }
    }

    fn push(&self, id: &ConversationId, message: ChatMessage) {
        let now = Utc::now();
        let mut conversations = self.lock();
        let conversation = conversations.entry(id.0.clone()).or_insert_with(|| Conversation {
            messages: Vec::new(),
            started_at: now,
            last_active: now,
        });
        conversation.messages.push(message);
        conversation.last_active = now;
    }

    /// Record the user's question. Done before the run, so it is kept even
    /// when the run fails.
    pub fn record_user(&self, id: &ConversationId, text: &str) {
        self.push(id, ChatMessage::user(text));
    }

    /// Record the answer a run produced.
    pub fn record_answer(&self, id: &ConversationId, text: &str) {
        self.push(id, ChatMessage::assistant_text(text));
    }

    pub fn messages(&self, id: &str) -> Option<Vec<ChatMessage>> {
        self.lock().get(id).map(|c| c.messages.clone())
    }

    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// List conversation ids.
    pub fn list(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// The query to run, prefixed with up to `max_messages` earlier messages.
    pub fn build_context(&self, id: &ConversationId, query: &str, max_messages: usize) -> String {
        let conversations = self.lock();
        let history = match conversations.get(&id.0) {
            Some(c) if max_messages > 0 && !c.messages.is_empty() => &c.messages,
            _ => return query.to_string(),
        };

        let start = history.len().saturating_sub(max_messages);
        let lines: Vec<String> = history[start..]
            .iter()
            .filter_map(|m| match m.role {
                Role::User => Some(format!("User: {}", m.text())),
                Role::Assistant => Some(format!("Assistant: {}", m.text())),
                Role::System => None,
            })
            .collect();

        format!(
            "Previous conversation:\n{}{}{}",
            lines.join("\n"),
            CURRENT_QUESTION,
            query
        )
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}
