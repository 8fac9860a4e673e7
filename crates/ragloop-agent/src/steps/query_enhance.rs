use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use ragloop_core::traits::TextGenerator;

use super::{error_detail, QUERY_ENHANCE};
use crate::graph::{Field, Step, StepOutcome, StateUpdate, WorkflowState};
use crate::smalltalk::is_smalltalk;

/// Classifies the query and rewrites it for retrieval.
///
/// Smalltalk keeps the query as typed and sets the flag every later step
/// checks. A failed or empty rewrite also keeps the original query.
pub struct QueryEnhance {
    generator: Arc<dyn TextGenerator>,
}

impl QueryEnhance {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

fn prompt(query: &str) -> String {
    format!(
        "Rewrite the query below into one expanded, information-rich search query \
for document retrieval.\n\
- Resolve vague references and expand shorthand into explicit terms.\n\
- Add closely related keywords and synonyms.\n\
- Keep the user's intent. Do not answer the question.\n\
- Output only the rewritten query, with no explanation.\n\n\
Query: {}",
        query
    )
}

impl Step for QueryEnhance {
    fn name(&self) -> &str {
        QUERY_ENHANCE
    }

    fn writes(&self) -> &[Field] {
        &[Field::Query, Field::IsSmalltalk]
    }

    fn run<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, StepOutcome> {
        Box::pin(async move {
            let raw = state.text(Field::Query).unwrap_or_default();
            if is_smalltalk(raw) {
                return StepOutcome::fast_path(
                    StateUpdate::new()
                        .with_text(Field::Query, raw)
                        .with_flag(Field::IsSmalltalk, true),
                );
            }

            let not_smalltalk = StateUpdate::new().with_flag(Field::IsSmalltalk, false);
            let Some(query) = state.query() else {
                return StepOutcome::completed(not_smalltalk);
            };

            match self.generator.generate(prompt(query)).await {
                Ok(rewritten) if !rewritten.trim().is_empty() => {
                    debug!(original = %query, enhanced = %rewritten.trim(), "Query enhanced");
                    StepOutcome::completed(not_smalltalk.with_text(Field::Query, rewritten.trim()))
                }
                Ok(_) => StepOutcome::completed(not_smalltalk.with_text(Field::Query, query)),
                Err(e) => StepOutcome::degraded(
                    not_smalltalk.with_text(Field::Query, query),
                    format!("query rewrite failed: {}", error_detail(&e)),
                ),
            }
        })
    }
}
