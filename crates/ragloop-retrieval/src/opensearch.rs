use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use ragloop_core::config::{RetrievalConfig, SearchMode};
use ragloop_core::error::{RagloopError, Result};
use ragloop_core::traits::DocumentRetriever;
use ragloop_core::types::{DocumentHit, HitMetadata};

use crate::embeddings::EmbeddingProvider;

/// Document retriever over an OpenSearch index of ingested chunks.
///
/// Chunks are expected to carry `content`, `content_type`, `filename`,
/// `token_count` and a `knn_vector` field named `embedding`.
pub struct OpenSearchRetriever {
    http: reqwest::Client,
    search_url: String,
    username: Option<String>,
    password: Option<String>,
    mode: SearchMode,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl OpenSearchRetriever {
    pub fn new(
        config: &RetrievalConfig,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<Self> {
        let mode = match (config.mode, embedder.is_some()) {
            (SearchMode::Semantic, false) => {
                return Err(RagloopError::Config(
                    "retrieval.mode = \"semantic\" requires an [embedding] section".into(),
                ));
            }
            (SearchMode::Hybrid, false) => {
                warn!("No embedding provider configured, hybrid retrieval falls back to keyword search");
                SearchMode::Keyword
            }
            (mode, _) => mode,
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagloopError::Config(format!("retrieval HTTP client: {}", e)))?;

        Ok(Self {
            http,
            search_url: format!(
                "{}/{}/_search",
                config.url.trim_end_matches('/'),
                config.index
            ),
            username: config.username.clone(),
            password: config.password.clone(),
            mode,
            embedder,
        })
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| RagloopError::Config("no embedding provider".into()))?;
        embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagloopError::Embedding("no vector returned for query".into()))
    }
}

/// Build the `_search` body for the given mode.
pub fn build_query(mode: SearchMode, query: &str, vector: Option<&[f32]>, top_k: usize) -> Value {
    let keyword = json!({ "match": { "content": { "query": query } } });
    let semantic = vector.map(|v| json!({ "knn": { "embedding": { "vector": v, "k": top_k } } }));

    let clause = match (mode, semantic) {
        (SearchMode::Keyword, _) | (_, None) => keyword,
        (SearchMode::Semantic, Some(knn)) => knn,
        (SearchMode::Hybrid, Some(knn)) => json!({ "bool": { "should": [keyword, knn] } }),
    };

    json!({
        "size": top_k,
        "query": clause,
        "_source": { "excludes": ["embedding"] },
    })
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "_score", default)]
    score: Option<f64>,
    #[serde(rename = "_source", default)]
    source: RawSource,
}

#[derive(Deserialize, Default)]
struct RawSource {
    #[serde(default)]
    content: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default, alias = "tokens")]
    token_count: Option<u64>,
}

/// Map an OpenSearch response body to ordered hits.
pub fn parse_hits(body: &str) -> Result<Vec<DocumentHit>> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| RagloopError::Retrieval(format!("malformed search response: {}", e)))?;

    Ok(response
        .hits
        .hits
        .into_iter()
        .map(|hit| DocumentHit {
            content: hit.source.content,
            metadata: HitMetadata {
                content_type: hit.source.content_type,
                token_count: hit.source.token_count,
                filename: hit.source.filename,
                score: hit.score,
            },
        })
        .collect())
}

impl DocumentRetriever for OpenSearchRetriever {
    fn search(&self, query: String, top_k: usize) -> BoxFuture<'_, Result<Vec<DocumentHit>>> {
        Box::pin(async move {
            let vector = match self.mode {
                SearchMode::Keyword => None,
                SearchMode::Semantic | SearchMode::Hybrid => Some(self.embed_query(&query).await?),
            };
            let body = build_query(self.mode, &query, vector.as_deref(), top_k);

            let mut req = self.http.post(&self.search_url).json(&body);
            if let Some(user) = &self.username {
                req = req.basic_auth(user, self.password.as_deref());
            }

            let resp = req
                .send()
                .await
                .map_err(|e| RagloopError::Retrieval(e.to_string()))?;

            let status = resp.status();
            let text = resp
                .text()
                .await
                .map_err(|e| RagloopError::Retrieval(e.to_string()))?;
            if !status.is_success() {
                return Err(RagloopError::Retrieval(format!("HTTP {}: {}", status, text)));
            }

            let hits = parse_hits(&text)?;
            debug!(hits = hits.len(), mode = ?self.mode, "OpenSearch query complete");
            Ok(hits)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_query_body() {
        let body = build_query(SearchMode::Keyword, "capital of France", None, 5);
        assert_eq!(body["size"], 5);
        assert_eq!(body["query"]["match"]["content"]["query"], "capital of France");
        assert_eq!(body["_source"]["excludes"][0], "embedding");
    }

    #[test]
    fn test_hybrid_query_body() {
        let body = build_query(SearchMode::Hybrid, "q", Some(&[0.5, 0.25]), 3);
        let should = body["query"]["bool"]["should"].as_array().unwrap();
        assert_eq!(should.len(), 2);
        assert_eq!(should[1]["knn"]["embedding"]["k"], 3);
        assert_eq!(should[1]["knn"]["embedding"]["vector"][1], 0.25);
    }

    #[test]
    fn test_semantic_without_vector_degrades_to_keyword() {
        let body = build_query(SearchMode::Semantic, "q", None, 3);
        assert!(body["query"].get("match").is_some());
    }

    #[test]
    fn test_parse_hits() {
        let body = r#"{"took":3,"hits":{"total":{"value":2},"hits":[
            {"_score":2.5,"_source":{"content":"Paris is the capital.","content_type":"text","filename":"geo.pdf","token_count":5}},
            {"_score":1.0,"_source":{"content":"Table row","tokens":3}}
        ]}}"#;
        let hits = parse_hits(body).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.content_type.as_deref(), Some("text"));
        assert_eq!(hits[0].metadata.score, Some(2.5));
        assert_eq!(hits[1].metadata.token_count, Some(3));
    }

    #[test]
    fn test_parse_hits_malformed() {
        assert!(matches!(parse_hits("{}"), Err(RagloopError::Retrieval(_))));
    }

    #[test]
    fn test_semantic_mode_requires_embedder() {
        let config = RetrievalConfig {
            mode: SearchMode::Semantic,
            ..RetrievalConfig::default()
        };
        assert!(OpenSearchRetriever::new(&config, None).is_err());

        let hybrid = OpenSearchRetriever::new(&RetrievalConfig::default(), None).unwrap();
        assert_eq!(hybrid.mode(), SearchMode::Keyword);
    }
}
