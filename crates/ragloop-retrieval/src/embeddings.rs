use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use ragloop_core::config::EmbeddingConfig;
use ragloop_core::error::{RagloopError, Result};

const OLLAMA_BASE_URL: &str = "http://localhost:11434";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Trait for embedding providers.
pub trait EmbeddingProvider: Send + Sync + 'static {
    /// Embed a batch of texts into vectors.
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>>;
    /// Number of dimensions in the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Build the provider named in the config.
pub fn create_embedder(config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
    match config.provider.as_str() {
        "ollama" => Arc::new(OllamaEmbeddingProvider::new(
            config.base_url.as_deref().unwrap_or(OLLAMA_BASE_URL),
            &config.model,
            config.dimensions,
        )),
        _ => Arc::new(HttpEmbeddingProvider::new(
            config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL),
            config.api_key.as_deref(),
            &config.model,
            config.dimensions,
        )),
    }
}

/// OpenAI-compatible `/embeddings` provider.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: &str, api_key: Option<&str>, model: &str, dims: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(String::from),
            model: model.to_string(),
            dims,
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        let texts = texts.to_vec();
        Box::pin(async move {
            let url = format!("{}/embeddings", self.base_url);

            let mut req = self.client.post(&url).json(&EmbeddingRequest {
                model: self.model.clone(),
                input: texts,
            });

            if let Some(ref key) = self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| RagloopError::Embedding(format!("request failed: {}", e)))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(RagloopError::Embedding(format!("API error {}: {}", status, body)));
            }

            let body: EmbeddingResponse = resp
                .json()
                .await
                .map_err(|e| RagloopError::Embedding(format!("bad response: {}", e)))?;

            Ok(body.data.into_iter().map(|d| d.embedding).collect())
        })
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Ollama's native `/api/embeddings` endpoint, one prompt per request.
pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbeddingProvider {
    pub fn new(base_url: &str, model: &str, dims: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dims,
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

impl EmbeddingProvider for OllamaEmbeddingProvider {
    fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        let texts = texts.to_vec();
        Box::pin(async move {
            let url = format!("{}/api/embeddings", self.base_url);
            let mut vectors = Vec::with_capacity(texts.len());

            for text in &texts {
                let resp = self
                    .client
                    .post(&url)
                    .json(&OllamaRequest {
                        model: &self.model,
                        prompt: text,
                    })
                    .send()
                    .await
                    .map_err(|e| RagloopError::Embedding(format!("Ollama request failed: {}", e)))?;

                if !resp.status().is_success() {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(RagloopError::Embedding(format!(
                        "Ollama error {}: {}",
                        status, body
                    )));
                }

                let body: OllamaResponse = resp
                    .json()
                    .await
                    .map_err(|e| RagloopError::Embedding(format!("bad Ollama response: {}", e)))?;
                if body.embedding.is_empty() {
                    return Err(RagloopError::Embedding(
                        "Ollama returned an empty embedding".into(),
                    ));
                }
                vectors.push(body.embedding);
            }

            Ok(vectors)
        })
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_embedder_dimensions() {
        let ollama = create_embedder(&EmbeddingConfig::default());
        assert_eq!(ollama.dimensions(), 768);

        let openai = create_embedder(&EmbeddingConfig {
            provider: "openai".into(),
            model: "text-embedding-3-small".into(),
            base_url: None,
            api_key: Some("sk".into()),
            dimensions: 1536,
        });
        assert_eq!(openai.dimensions(), 1536);
    }

    #[test]
    fn test_ollama_request_shape() {
        let body = serde_json::to_value(OllamaRequest {
            model: "nomic-embed-text",
            prompt: "capital of France",
        })
        .unwrap();
        assert_eq!(body["model"], "nomic-embed-text");
        assert_eq!(body["prompt"], "capital of France");
    }

    #[test]
    fn test_openai_response_parse() {
        let body: EmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"embedding":[0.1,0.2]},{"embedding":[0.3,0.4]}]}"#)
                .unwrap();
        assert_eq!(body.data.len(), 2);
        assert_eq!(body.data[1].embedding, vec![0.3, 0.4]);
    }
}
