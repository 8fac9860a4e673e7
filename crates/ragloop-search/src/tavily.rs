use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use ragloop_core::error::{RagloopError, Result};
use ragloop_core::traits::WebSearcher;
use ragloop_core::types::WebResult;

const TAVILY_URL: &str = "https://api.tavily.com/search";

pub struct TavilyClient {
    api_key: Option<String>,
    max_results: usize,
    http: reqwest::Client,
    timeout: Duration,
}

impl TavilyClient {
    pub fn new(api_key: Option<String>, max_results: usize, timeout_secs: u64) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            max_results,
            http: reqwest::Client::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn error(message: impl Into<String>) -> RagloopError {
        RagloopError::WebSearch {
            provider: "tavily".into(),
            message: message.into(),
        }
    }
}

fn parse_results(body: &Value) -> Vec<WebResult> {
    body["results"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|r| WebResult {
                    title: r["title"].as_str().unwrap_or_default().to_string(),
                    snippet: r["content"].as_str().unwrap_or_default().to_string(),
                    link: r["url"].as_str().unwrap_or_default().to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

impl WebSearcher for TavilyClient {
    fn name(&self) -> &str {
        "tavily"
    }

    fn search(&self, query: String) -> BoxFuture<'_, Result<Vec<WebResult>>> {
        Box::pin(async move {
            let api_key = self.api_key.as_deref().ok_or_else(|| {
                Self::error("API key missing. Set web_search.api_key to enable web search.")
            })?;

            let resp = self
                .http
                .post(TAVILY_URL)
                .timeout(self.timeout)
                .json(&json!({
                    "api_key": api_key,
                    "query": query,
                    "max_results": self.max_results,
                }))
                .send()
                .await
                .map_err(|e| Self::error(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::error(format!("HTTP {}: {}", status, body)));
            }

            let body: Value = resp.json().await.map_err(|e| Self::error(e.to_string()))?;
            Ok(parse_results(&body))
        })
    }
}
