use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use ragloop_core::traits::WebSearcher;
use ragloop_core::types::WebResult;

use super::{error_detail, WEB_SEARCH};
use crate::graph::{Field, Step, StepOutcome, StateUpdate, WorkflowState};

pub const NO_QUERY: &str = "No query provided for web search.";
pub const NO_RESULTS: &str = "Web search returned no organic results.";

pub struct WebSearch {
    searcher: Arc<dyn WebSearcher>,
    max_results: usize,
}

impl WebSearch {
    pub fn new(searcher: Arc<dyn WebSearcher>, max_results: usize) -> Self {
        Self {
            searcher,
            max_results,
        }
    }
}

pub fn format_results(results: &[WebResult]) -> String {
    let mut out = String::from("Web search results:");
    for r in results {
        let title = if r.title.is_empty() { "Untitled result" } else { r.title.as_str() };
        let snippet = if r.snippet.is_empty() { r.link.as_str() } else { r.snippet.as_str() };
        out.push_str(&format!("\n- {}\n  {}\n  Source: {}", title, snippet, r.link));
    }
    out
}

impl Step for WebSearch {
    fn name(&self) -> &str {
        WEB_SEARCH
    }

    fn writes(&self) -> &[Field] {
        &[Field::WebAnswer]
    }

    fn run<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, StepOutcome> {
        Box::pin(async move {
            let placeholder = |text: &str| StateUpdate::new().with_placeholder(Field::WebAnswer, text);

            if state.is_smalltalk() {
                return StepOutcome::fast_path(placeholder(""));
            }
            let Some(query) = state.query() else {
                return StepOutcome::completed(placeholder(NO_QUERY));
            };

            match self.searcher.search(query.to_string()).await {
                Ok(results) if results.is_empty() => StepOutcome::completed(placeholder(NO_RESULTS)),
                Ok(results) => {
                    let kept = &results[..results.len().min(self.max_results)];
                    debug!(provider = %self.searcher.name(), results = results.len(), kept = kept.len(), "Web search complete");
                    StepOutcome::completed(StateUpdate::new().with_text(Field::WebAnswer, format_results(kept)))
                }
                Err(e) => {
                    let detail = error_detail(&e);
                    StepOutcome::degraded(placeholder(&format!("Web search failed: {}", detail)), detail)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{StepStatus, Value};
    use ragloop_test_utils::{paris_result, web_result, StaticWebSearcher};

    fn web_answer(out: &StepOutcome) -> Value {
        out.update.get(Field::WebAnswer).cloned().unwrap()
    }

    #[tokio::test]
    async fn test_formats_results() {
        let step = WebSearch::new(
            Arc::new(StaticWebSearcher::new(vec![
                paris_result(),
                web_result("", "", "https://example.com"),
            ])),
            5,
        );
        let out = step.run(&WorkflowState::with_query("capital of France")).await;
        assert_eq!(
            web_answer(&out),
            Value::Text(
                "Web search results:\n\
- Paris - Wikipedia\n  Paris is the capital and largest city of France.\n  Source: https://en.wikipedia.org/wiki/Paris\n\
- Untitled result\n  https://example.com\n  Source: https://example.com"
                    .into()
            )
        );
    }

    #[tokio::test]
    async fn test_truncates_to_max_results() {
        let results = (0..8).map(|i| web_result(&format!("r{i}"), "s", "l")).collect();
        let step = WebSearch::new(Arc::new(StaticWebSearcher::new(results)), 3);
        let out = step.run(&WorkflowState::with_query("anything")).await;
        let text = web_answer(&out);
        assert_eq!(text.as_text().unwrap().matches("Source:").count(), 3);
    }

    #[tokio::test]
    async fn test_failure_and_empty() {
        let step = WebSearch::new(Arc::new(StaticWebSearcher::failing("API key missing")), 5);
        let out = step.run(&WorkflowState::with_query("anything")).await;
        assert_eq!(
            web_answer(&out),
            Value::Placeholder("Web search failed: static: API key missing".into())
        );
        assert_eq!(out.status.label(), "degraded");

        let step = WebSearch::new(Arc::new(StaticWebSearcher::empty()), 5);
        let out = step.run(&WorkflowState::with_query("anything")).await;
        assert_eq!(web_answer(&out), Value::Placeholder(NO_RESULTS.into()));
    }

    #[tokio::test]
    async fn test_smalltalk_writes_empty_placeholder() {
        let searcher = Arc::new(StaticWebSearcher::empty());
        let step = WebSearch::new(searcher.clone(), 5);
        let mut state = WorkflowState::with_query("hello");
        state.merge(&StateUpdate::new().with_flag(Field::IsSmalltalk, true));

        let out = step.run(&state).await;
        assert_eq!(out.status, StepStatus::FastPath);
        assert_eq!(web_answer(&out), Value::Placeholder(String::new()));
        assert_eq!(searcher.calls(), 0);
    }
}
