use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use ragloop_core::traits::DocumentRetriever;
use ragloop_core::types::DocumentHit;

use super::{error_detail, RETRIEVE};
use crate::graph::{Field, Step, StepOutcome, StateUpdate, WorkflowState};

pub const SMALLTALK_SKIPPED: &str = "Smalltalk query detected; skipping retrieval.";
pub const NO_QUERY: &str = "No query provided for retrieval.";
pub const NO_DOCUMENTS: &str = "No supporting documents were found for the query.";
pub const NO_RELATED_DOCUMENTS: &str =
    "No supporting documents in the vector store were clearly related to this query.";

/// Hybrid document search, filtered and formatted for summarization.
pub struct Retrieve {
    retriever: Arc<dyn DocumentRetriever>,
    top_k: usize,
}

impl Retrieve {
    pub fn new(retriever: Arc<dyn DocumentRetriever>, top_k: usize) -> Self {
        Self { retriever, top_k }
    }
}

/// Query words that must show up in a hit for it to count as related.
fn keywords(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| ".,!?;:".contains(c)))
        .filter(|w| w.chars().count() > 3)
        .map(str::to_lowercase)
        .collect()
}

fn is_related(hit: &DocumentHit, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let text = hit.content.to_lowercase();
    keywords.iter().any(|k| text.contains(k.as_str()))
}

/// `[n] (content_type, tokens=N)` followed by the chunk text.
pub fn format_hits(hits: &[&DocumentHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let mut meta = Vec::new();
            if let Some(kind) = hit.metadata.content_type.as_deref().filter(|k| !k.is_empty()) {
                meta.push(kind.to_string());
            }
            if let Some(tokens) = hit.metadata.token_count {
                meta.push(format!("tokens={}", tokens));
            }
            let meta = if meta.is_empty() {
                String::new()
            } else {
                format!(" ({})", meta.join(", "))
            };
            format!("[{}]{}\n{}", i + 1, meta, hit.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl Step for Retrieve {
    fn name(&self) -> &str {
        RETRIEVE
    }

    fn writes(&self) -> &[Field] {
        &[Field::RagAnswer]
    }

    fn run<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, StepOutcome> {
        Box::pin(async move {
            let placeholder = |text: &str| StateUpdate::new().with_placeholder(Field::RagAnswer, text);

            if state.is_smalltalk() {
                return StepOutcome::fast_path(placeholder(SMALLTALK_SKIPPED));
            }
            let Some(query) = state.query() else {
                return StepOutcome::completed(placeholder(NO_QUERY));
            };

            let hits = match self.retriever.search(query.to_string(), self.top_k).await {
                Ok(hits) => hits,
                Err(e) => {
                    let detail = error_detail(&e);
                    return StepOutcome::degraded(
                        placeholder(&format!("Hybrid search failed: {}", detail)),
                        detail,
                    );
                }
            };
            if hits.is_empty() {
                return StepOutcome::completed(placeholder(NO_DOCUMENTS));
            }

            let keywords = keywords(query);
            let related: Vec<&DocumentHit> = hits.iter().filter(|h| is_related(h, &keywords)).collect();
            debug!(hits = hits.len(), related = related.len(), "Documents retrieved");
            if related.is_empty() {
                return StepOutcome::completed(placeholder(NO_RELATED_DOCUMENTS));
            }

            StepOutcome::completed(StateUpdate::new().with_text(Field::RagAnswer, format_hits(&related)))
        })
    }
}
