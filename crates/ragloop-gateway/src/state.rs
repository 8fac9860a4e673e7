use std::sync::Arc;

use ragloop_agent::{AgenticRag, ConversationStore};

/// Shared application state for axum handlers.
pub struct AppState {
    pub workflow: Arc<AgenticRag>,
    pub conversations: Arc<ConversationStore>,
    /// Earlier messages prepended to each query.
    pub history_messages: usize,
}
