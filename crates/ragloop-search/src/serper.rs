use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use ragloop_core::error::{RagloopError, Result};
use ragloop_core::traits::WebSearcher;
use ragloop_core::types::WebResult;

const SERPER_URL: &str = "https://google.serper.dev/search";

/// Google results through the Serper API.
pub struct SerperClient {
    api_key: Option<String>,
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl SerperClient {
    /// A missing key is not an error here; every search reports it instead.
    pub fn new(api_key: Option<String>, timeout_secs: u64) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            http: reqwest::Client::new(),
            endpoint: SERPER_URL.to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn error(message: impl Into<String>) -> RagloopError {
        RagloopError::WebSearch {
            provider: "serper".into(),
            message: message.into(),
        }
    }
}

/// Read `organic[]` from a Serper response.
pub fn parse_organic(body: &Value) -> Vec<WebResult> {
    body["organic"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|r| WebResult {
                    title: r["title"].as_str().unwrap_or_default().to_string(),
                    snippet: r["snippet"].as_str().unwrap_or_default().to_string(),
                    link: r["link"].as_str().unwrap_or_default().to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

impl WebSearcher for SerperClient {
    fn name(&self) -> &str {
        "serper"
    }

    fn search(&self, query: String) -> BoxFuture<'_, Result<Vec<WebResult>>> {
        Box::pin(async move {
            let api_key = self.api_key.as_deref().ok_or_else(|| {
                Self::error("API key missing. Set SERPER_API_KEY to enable web search.")
            })?;

            let resp = self
                .http
                .post(&self.endpoint)
                .header("X-API-KEY", api_key)
                .timeout(self.timeout)
                .json(&json!({ "q": query }))
                .send()
                .await
                .map_err(|e| Self::error(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::error(format!("HTTP {}: {}", status, body)));
            }

            let body: Value = resp.json().await.map_err(|e| Self::error(e.to_string()))?;
            Ok(parse_organic(&body))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_organic() {
        let body = json!({
            "searchParameters": {"q": "capital of France"},
            "organic": [
                {"title": "Paris - Wikipedia", "link": "https://en.wikipedia.org/wiki/Paris",
                 "snippet": "Paris is the capital and largest city of France."},
                {"link": "https://example.com"}
            ]
        });
        let results = parse_organic(&body);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Paris - Wikipedia");
        assert!(results[0].snippet.contains("capital"));
        assert!(results[1].title.is_empty());
    }

    #[test]
    fn test_parse_missing_organic() {
        assert!(parse_organic(&json!({"answerBox": {}})).is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_is_reported_per_search() {
        let client = SerperClient::new(Some("  ".into()), 15);
        let err = client.search("q".into()).await.unwrap_err();
        assert!(err.to_string().contains("SERPER_API_KEY"));
    }
}
