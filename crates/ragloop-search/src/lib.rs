pub mod serper;
pub mod tavily;

use std::sync::Arc;

use ragloop_core::config::WebSearchConfig;
use ragloop_core::error::{RagloopError, Result};
use ragloop_core::traits::WebSearcher;

pub use serper::SerperClient;
pub use tavily::TavilyClient;

/// Build the web searcher named in the config.
///
/// Without a `[web_search]` section the default Serper client is used with
/// the `SERPER_API_KEY` environment variable, if set.
pub fn create_searcher(
    config: Option<&WebSearchConfig>,
    max_results: usize,
) -> Result<Arc<dyn WebSearcher>> {
    let defaults = WebSearchConfig::default();
    let config = config.unwrap_or(&defaults);
    let api_key = config
        .api_key
        .clone()
        .or_else(|| std::env::var("SERPER_API_KEY").ok().filter(|_| config.provider == "serper"));

    match config.provider.as_str() {
        "serper" => Ok(Arc::new(SerperClient::new(api_key, config.timeout_secs))),
        "tavily" => Ok(Arc::new(TavilyClient::new(
            api_key,
            max_results,
            config.timeout_secs,
        ))),
        other => Err(RagloopError::Config(format!(
            "unknown web_search.provider '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_searcher_by_provider() {
        let tavily = WebSearchConfig {
            provider: "tavily".into(),
            api_key: Some("k".into()),
            timeout_secs: 5,
        };
        assert_eq!(create_searcher(Some(&tavily), 5).unwrap().name(), "tavily");
        assert_eq!(create_searcher(None, 5).unwrap().name(), "serper");
    }

    #[test]
    fn test_unknown_provider() {
        let bing = WebSearchConfig {
            provider: "bing".into(),
            ..WebSearchConfig::default()
        };
        assert!(create_searcher(Some(&bing), 5).is_err());
    }
}
