use std::sync::Arc;

use futures::future::BoxFuture;

use ragloop_core::traits::TextGenerator;

use super::{error_detail, SUMMARIZE_RETRIEVAL, SUMMARIZE_WEB};
use crate::graph::{Field, Step, StepOutcome, StateUpdate, WorkflowState};
use crate::smalltalk::smalltalk_reply;

/// Which branch output a [`Summarize`] step condenses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarySource {
    Retrieval,
    Web,
}

impl SummarySource {
    fn input(self) -> Field {
        match self {
            SummarySource::Retrieval => Field::RagAnswer,
            SummarySource::Web => Field::WebAnswer,
        }
    }

    fn output(self) -> Field {
        match self {
            SummarySource::Retrieval => Field::RetrievalSummary,
            SummarySource::Web => Field::WebSummary,
        }
    }

    fn empty_input(self) -> &'static str {
        match self {
            SummarySource::Retrieval => "No documents retrieved for summarization.",
            SummarySource::Web => "No web search results available for summarization.",
        }
    }

    fn prompt(self, input: &str) -> String {
        match self {
            SummarySource::Retrieval => format!(
                "Summarize the retrieved documents below into one compact summary of the \
information relevant to the user's question.\n\
- At most 250 characters.\n\
- Stay factual; no filler, opinions or disclaimers.\n\
- Do not mention the documents or this process.\n\
- Output only the summary.\n\n\
Retrieved documents:\n{}",
                input
            ),
            SummarySource::Web => format!(
                "Summarize the web search results below.\n\
- Keep only factual information relevant to the query.\n\
- Ignore ads, navigation text and promotional filler; merge duplicate facts.\n\
- Do not answer the question and add no commentary.\n\
- At most 250 characters, neutral tone.\n\
- Output only the summary.\n\n\
Web search results:\n{}",
                input
            ),
        }
    }
}

/// Condenses one branch's raw output. Placeholders upstream are never sent
/// to the model.
pub struct Summarize {
    generator: Arc<dyn TextGenerator>,
    source: SummarySource,
}

impl Summarize {
    pub fn new(generator: Arc<dyn TextGenerator>, source: SummarySource) -> Self {
        Self { generator, source }
    }
}

impl Step for Summarize {
    fn name(&self) -> &str {
        match self.source {
            SummarySource::Retrieval => SUMMARIZE_RETRIEVAL,
            SummarySource::Web => SUMMARIZE_WEB,
        }
    }

    fn writes(&self) -> &[Field] {
        match self.source {
            SummarySource::Retrieval => &[Field::RetrievalSummary],
            SummarySource::Web => &[Field::WebSummary],
        }
    }

    fn run<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, StepOutcome> {
        Box::pin(async move {
            let output = self.source.output();

            if state.is_smalltalk() {
                let update = match self.source {
                    SummarySource::Retrieval => {
                        StateUpdate::new().with_text(output, smalltalk_reply(state.text(Field::Query)))
                    }
                    SummarySource::Web => StateUpdate::new().with_placeholder(output, ""),
                };
                return StepOutcome::fast_path(update);
            }

            let Some(input) = state.content(self.source.input()) else {
                return StepOutcome::completed(
                    StateUpdate::new().with_placeholder(output, self.source.empty_input()),
                );
            };

            match self.generator.generate(self.source.prompt(input)).await {
                Ok(summary) if !summary.trim().is_empty() => {
                    StepOutcome::completed(StateUpdate::new().with_text(output, summary.trim()))
                }
                Ok(_) => StepOutcome::degraded(
                    StateUpdate::new()
                        .with_placeholder(output, "Summarization failed: empty response"),
                    "empty summary",
                ),
                Err(e) => {
                    let detail = error_detail(&e);
                    StepOutcome::degraded(
                        StateUpdate::new()
                            .with_placeholder(output, format!("Summarization failed: {}", detail)),
                        detail,
                    )
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

    fn state_with(field: Field, value: Value) -> WorkflowState {
        let mut state = WorkflowState::with_query("capital of France");
        state.merge(&StateUpdate::new().with(field, value));
        state
    }

    #[tokio::test]
    async fn test_summarizes_real_content() {
        let gen = Arc::new(ScriptedGenerator::new(" Paris is the capital. "));
        let step = Summarize::new(gen.clone(), SummarySource::Web);
        let state = state_with(Field::WebAnswer, Value::Text("Web search results:\n- Paris".into()));

        let out = step.run(&state).await;
        assert_eq!(
            out.update.get(Field::WebSummary),
            Some(&Value::Text("Paris is the capital.".into()))
        );
        assert_eq!(gen.calls_matching("Summarize the web search results"), 1);
        assert!(gen.prompts()[0].contains("- Paris"));
    }

    #[tokio::test]
    async fn test_placeholder_input_skips_llm() {
        let gen = Arc::new(ScriptedGenerator::new("should not be used"));
        let step = Summarize::new(gen.clone(), SummarySource::Retrieval);
        let state = state_with(
            Field::RagAnswer,
            Value::Placeholder("No supporting documents were found for the query.".into()),
        );

        let out = step.run(&state).await;
        assert_eq!(
            out.update.get(Field::RetrievalSummary),
            Some(&Value::Placeholder("No documents retrieved for summarization.".into()))
        );
        assert_eq!(gen.calls(), 0);

        let web = Summarize::new(gen.clone(), SummarySource::Web);
        let out = web.run(&WorkflowState::with_query("q")).await;
        assert_eq!(
            out.update.get(Field::WebSummary),
            Some(&Value::Placeholder(
                "No web search results available for summarization.".into()
            ))
        );
        assert_eq!(gen.calls(), 0);
    }

    #[tokio::test]
    async fn test_llm_failure_placeholder() {
        let step = Summarize::new(
            Arc::new(ScriptedGenerator::failing("503 Service Unavailable")),
            SummarySource::Retrieval,
        );
        let state = state_with(Field::RagAnswer, Value::Text("[1]\nsome chunk".into()));
        let out = step.run(&state).await;

        assert_eq!(
            out.update.get(Field::RetrievalSummary),
            Some(&Value::Placeholder(
                "Summarization failed: 503 Service Unavailable".into()
            ))
        );
        assert!(matches!(out.status, StepStatus::Degraded { .. }));
    }

    #[tokio::test]
    async fn test_smalltalk_fast_path() {
        let mut state = WorkflowState::with_query("hi");
        state.merge(&StateUpdate::new().with_flag(Field::IsSmalltalk, true));
        let gen = Arc::new(ScriptedGenerator::new("unused"));

        let out = Summarize::new(gen.clone(), SummarySource::Retrieval).run(&state).await;
        assert_eq!(out.status, StepStatus::FastPath);
        assert_eq!(
            out.update.get(Field::RetrievalSummary),
            Some(&Value::Text(
                "Hey! You said “hi”. I'm here when you want to explore your PDFs.".into()
            ))
        );

        let out = Summarize::new(gen.clone(), SummarySource::Web).run(&state).await;
        assert_eq!(out.update.get(Field::WebSummary), Some(&Value::Placeholder(String::new())));
        assert_eq!(gen.calls(), 0);
    }
}
