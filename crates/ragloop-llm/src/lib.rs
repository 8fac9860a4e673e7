pub mod generate;
pub mod providers;
pub mod rater;
pub mod retry;
pub mod streaming;

use ragloop_core::config::ModelConfig;
use ragloop_core::error::{RagloopError, Result};
use ragloop_core::traits::LlmClient;

pub use generate::LlmGenerator;
pub use providers::gemini::GeminiClient;
pub use providers::openai::OpenAiClient;
pub use rater::LlmRater;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "gemini" | "google" => Ok(Box::new(GeminiClient::new())),
        "ollama" => Ok(Box::new(OpenAiClient::ollama())),
        "openai" | "openai-compatible" | "openrouter" | "groq" | "vllm" => {
            Ok(Box::new(OpenAiClient::new()))
        }
        other => Err(RagloopError::UnsupportedProvider(other.to_string())),
    }
}

/// Create a client for `primary` wrapped with retries and the given fallbacks.
pub fn create_retrying_client(
    primary: &ModelConfig,
    fallbacks: &[ModelConfig],
) -> Result<Box<dyn LlmClient>> {
    let fallback_clients = fallbacks
        .iter()
        .map(|fb| Ok((fb.clone(), create_client(fb)?)))
        .collect::<Result<Vec<_>>>()?;

    Ok(Box::new(RetryingClient::new(
        create_client(primary)?,
        fallback_clients,
        primary.retry.clone().unwrap_or_default(),
    )))
}
