use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::warn;

use ragloop_core::config::ModelConfig;
use ragloop_core::error::{RagloopError, Result};
use ragloop_core::traits::{LlmClient, RatingService};
use ragloop_core::types::{ChatMessage, Rating};

use crate::generate::collect_text;

const RATING_INSTRUCTIONS: &str = r#"Answer with ONLY valid JSON of the form {"rating": "approved"} or {"rating": "rejected"}."#;

/// Structured-rating collaborator: asks the model for a JSON verdict and
/// accepts nothing outside {approved, rejected}.
pub struct LlmRater {
    llm: Arc<dyn LlmClient>,
    config: ModelConfig,
}

impl LlmRater {
    pub fn new(llm: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { llm, config }
    }
}

impl RatingService for LlmRater {
    fn rate(&self, prompt: String) -> BoxFuture<'_, Result<Rating>> {
        Box::pin(async move {
            let messages = vec![
                ChatMessage::system(RATING_INSTRUCTIONS),
                ChatMessage::user(prompt),
            ];
            let response = collect_text(self.llm.as_ref(), &self.config, messages).await?;
            parse_rating(&response)
        })
    }
}

#[derive(Deserialize)]
struct RatingResponse {
    rating: String,
}

/// Parse a rating from model output: JSON (optionally fenced) or a bare word.
pub fn parse_rating(response: &str) -> Result<Rating> {
    let json_str = extract_json(response);

    if let Ok(resp) = serde_json::from_str::<RatingResponse>(json_str) {
        return Rating::parse(&resp.rating).ok_or_else(|| {
            warn!(rating = %resp.rating, "Rating outside of {{approved, rejected}}");
            RagloopError::LlmParse(format!("unknown rating '{}'", resp.rating))
        });
    }

    Rating::parse(response).ok_or_else(|| {
        warn!(response = %response, "Failed to parse rating response");
        RagloopError::LlmParse(format!("unparseable rating response: {}", response.trim()))
    })
}

fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            return &trimmed[start..=end];
        }
    }
    trimmed
}
