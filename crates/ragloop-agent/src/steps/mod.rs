//! The agentic RAG steps.
//!
//! Each step honours the smalltalk flag on its own and turns collaborator
//! failures into placeholder values, so a run always reaches a terminal
//! state with a best-effort answer.

pub mod merge;
pub mod query_enhance;
pub mod rate;
pub mod retrieve;
pub mod summarize;
pub mod web_search;

pub use merge::MergeSummaries;
pub use query_enhance::QueryEnhance;
pub use rate::{RateSummary, RatingRouter};
pub use retrieve::Retrieve;
pub use summarize::{Summarize, SummarySource};
pub use web_search::WebSearch;

use ragloop_core::error::RagloopError;

pub const QUERY_ENHANCE: &str = "query_enhance";
pub const RETRIEVE: &str = "retrieve";
pub const SUMMARIZE_RETRIEVAL: &str = "summarize_retrieval";
pub const WEB_SEARCH: &str = "web_search";
pub const SUMMARIZE_WEB: &str = "summarize_web";
pub const MERGE_SUMMARIES: &str = "merge_summaries";
pub const RATE: &str = "rate";

/// Error text without the collaborator-kind prefix the step adds itself.
pub(crate) fn error_detail(err: &RagloopError) -> String {
    match err {
        RagloopError::Retrieval(msg)
        | RagloopError::Embedding(msg)
        | RagloopError::LlmRequest(msg)
        | RagloopError::LlmStream(msg)
        | RagloopError::LlmParse(msg) => msg.clone(),
        RagloopError::WebSearch { provider, message } => format!("{}: {}", provider, message),
        other => other.to_string(),
    }
}
