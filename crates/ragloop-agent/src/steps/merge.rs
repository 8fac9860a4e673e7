use std::sync::Arc;

use futures::future::BoxFuture;

use ragloop_core::traits::TextGenerator;

use super::{error_detail, MERGE_SUMMARIES};
use crate::graph::{Field, Step, StepOutcome, StateUpdate, WorkflowState};
use crate::smalltalk::smalltalk_reply;

pub const NO_SUMMARIES: &str = "No summaries available to combine.";

/// Join step: combines whichever branch summaries carry real content.
pub struct MergeSummaries {
    generator: Arc<dyn TextGenerator>,
}

impl MergeSummaries {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

fn prompt(web: &str, retrieval: &str) -> String {
    format!(
        "Combine the two summaries below into one.\n\
1. Web search summary: {}\n\
2. Document summary: {}\n\n\
- Merge overlapping facts; keep unique details only when they fit the question.\n\
- Drop contradictions, speculation and filler.\n\
- No commentary about the sources.\n\
- One coherent summary of at most 250 characters, neutral tone.",
        web, retrieval
    )
}

impl Step for MergeSummaries {
    fn name(&self) -> &str {
        MERGE_SUMMARIES
    }

    fn writes(&self) -> &[Field] {
        &[Field::MergedSummary]
    }

    fn run<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, StepOutcome> {
        Box::pin(async move {
            if state.is_smalltalk() {
                return StepOutcome::fast_path(
                    StateUpdate::new()
                        .with_text(Field::MergedSummary, smalltalk_reply(state.text(Field::Query))),
                );
            }

            let retrieval = state.content(Field::RetrievalSummary);
            let web = state.content(Field::WebSummary);
            let merged = |text: &str| StateUpdate::new().with_text(Field::MergedSummary, text);

            match (web, retrieval) {
                (None, None) => StepOutcome::completed(
                    StateUpdate::new().with_placeholder(Field::MergedSummary, NO_SUMMARIES),
                ),
                (Some(only), None) | (None, Some(only)) => StepOutcome::completed(merged(only)),
                (Some(web), Some(retrieval)) => {
                    match self.generator.generate(prompt(web, retrieval)).await {
                        Ok(text) if !text.trim().is_empty() => {
                            StepOutcome::completed(merged(text.trim()))
                        }
                        Ok(_) => StepOutcome::degraded(
                            merged(&format!("{}\n\n{}", web, retrieval)),
                            "empty merge response",
                        ),
                        Err(e) => StepOutcome::degraded(
                            merged(&format!("{}\n\n{}", web, retrieval)),
                            error_detail(&e),
                        ),
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{StepStatus, Value};
    use ragloop_test_utils::ScriptedGenerator;

    fn state(retrieval: Option<Value>, web: Option<Value>) -> WorkflowState {
        let mut update = StateUpdate::new();
        if let Some(v) = retrieval {
            update.set(Field::RetrievalSummary, v);
        }
        if let Some(v) = web {
            update.set(Field::WebSummary, v);
        }
        let mut state = WorkflowState::with_query("capital of France");
        state.merge(&update);
        state
    }

    fn merged(out: &StepOutcome) -> Value {
        out.update.get(Field::MergedSummary).cloned().unwrap()
    }

    #[tokio::test]
    async fn test_single_real_summary_passes_through() {
        let gen = Arc::new(ScriptedGenerator::new("unused"));
        let step = MergeSummaries::new(gen.clone());
        let out = step
            .run(&state(
                Some(Value::Placeholder("No documents retrieved for summarization.".into())),
                Some(Value::Text("Paris is the capital of France.".into())),
            ))
            .await;

        assert_eq!(merged(&out), Value::Text("Paris is the capital of France.".into()));
        assert_eq!(gen.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_summaries_placeholder() {
        let step = MergeSummaries::new(Arc::new(ScriptedGenerator::new("unused")));
        let out = step
            .run(&state(
                Some(Value::Placeholder("Summarization failed: boom".into())),
                Some(Value::Placeholder(String::new())),
            ))
            .await;
        assert_eq!(merged(&out), Value::Placeholder(NO_SUMMARIES.into()));
    }

    #[tokio::test]
    async fn test_both_summaries_use_llm() {
        let gen = Arc::new(ScriptedGenerator::new("Paris, France's capital."));
        let step = MergeSummaries::new(gen.clone());
        let out = step
            .run(&state(Some(Value::Text("doc".into())), Some(Value::Text("web".into()))))
            .await;

        assert_eq!(merged(&out), Value::Text("Paris, France's capital.".into()));
        assert_eq!(gen.calls_matching("Combine the two summaries"), 1);
    }

    #[tokio::test]
    async fn test_llm_failure_concatenates() {
        let step = MergeSummaries::new(Arc::new(ScriptedGenerator::failing("timeout")));
        let out = step
            .run(&state(Some(Value::Text("doc".into())), Some(Value::Text("web".into()))))
            .await;

        assert_eq!(merged(&out), Value::Text("web\n\ndoc".into()));
        assert_eq!(
            out.status,
            StepStatus::Degraded {
                reason: "timeout".into()
            }
        );
    }
}
