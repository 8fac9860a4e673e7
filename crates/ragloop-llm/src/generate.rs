use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use tracing::debug;

use ragloop_core::config::ModelConfig;
use ragloop_core::error::Result;
use ragloop_core::traits::{LlmClient, TextGenerator};
use ragloop_core::types::{ChatMessage, StreamDelta};

/// Text-generation collaborator backed by any [`LlmClient`].
///
/// Sends the prompt as a single user message and concatenates the streamed
/// text deltas. A stream error aborts the call; an empty answer is returned
/// as-is and left to the caller to interpret.
pub struct LlmGenerator {
    llm: Arc<dyn LlmClient>,
    config: ModelConfig,
}

impl LlmGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { llm, config }
    }
}

/// Drain a delta stream into its text content.
pub(crate) async fn collect_text(
    llm: &dyn LlmClient,
    config: &ModelConfig,
    messages: Vec<ChatMessage>,
) -> Result<String> {
    let mut stream = llm.chat_stream(config, messages).await?;

    let mut text = String::new();
    while let Some(delta) = stream.next().await {
        match delta {
            Ok(StreamDelta::TextDelta(chunk)) => text.push_str(&chunk),
            Ok(StreamDelta::Usage {
                input_tokens,
                output_tokens,
            }) => {
                debug!(input_tokens, output_tokens, model = %config.model_id, "LLM usage");
            }
            Ok(StreamDelta::Stop(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(text)
}

impl TextGenerator for LlmGenerator {
    fn generate(&self, prompt: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let messages = vec![ChatMessage::user(prompt)];
            let text = collect_text(self.llm.as_ref(), &self.config, messages).await?;
            Ok(text.trim().to_string())
        })
    }
}
