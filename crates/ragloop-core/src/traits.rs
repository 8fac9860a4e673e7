use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// LLM client — multi-provider streaming.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// Text generation — a single prompt in, free text out.
pub trait TextGenerator: Send + Sync + 'static {
    fn generate(&self, prompt: String) -> BoxFuture<'_, Result<String>>;
}

/// Structured rating — a prompt in, one of {approved, rejected} out.
///
/// Implementations return an error for anything outside the enumeration;
/// callers decide the fallback.
pub trait RatingService: Send + Sync + 'static {
    fn rate(&self, prompt: String) -> BoxFuture<'_, Result<Rating>>;
}

/// Document retrieval over the ingested corpus.
pub trait DocumentRetriever: Send + Sync + 'static {
    /// Ordered hits, best first, at most `top_k`.
    fn search(&self, query: String, top_k: usize) -> BoxFuture<'_, Result<Vec<DocumentHit>>>;
}

/// Web search.
pub trait WebSearcher: Send + Sync + 'static {
    /// Provider name (e.g., "serper", "tavily").
    fn name(&self) -> &str;

    fn search(&self, query: String) -> BoxFuture<'_, Result<Vec<WebResult>>>;
}
