use std::sync::Arc;

use tracing::info;

use ragloop_core::config::WorkflowConfig;
use ragloop_core::error::Result;
use ragloop_core::traits::{DocumentRetriever, RatingService, TextGenerator, WebSearcher};

use crate::graph::{
    ExecutionResult, Field, Graph, GraphBuilder, GraphError, GraphExecutor, Target, WorkflowState,
};
use crate::steps::{
    MergeSummaries, QueryEnhance, RateSummary, RatingRouter, Retrieve, Summarize, SummarySource,
    WebSearch, MERGE_SUMMARIES, QUERY_ENHANCE, RATE, RETRIEVE, SUMMARIZE_RETRIEVAL, SUMMARIZE_WEB,
    WEB_SEARCH,
};

/// External services the workflow calls.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn TextGenerator>,
    pub rater: Arc<dyn RatingService>,
    pub retriever: Arc<dyn DocumentRetriever>,
    pub searcher: Arc<dyn WebSearcher>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowOptions {
    pub top_k: usize,
    pub max_web_results: usize,
    /// `None` loops until the rater approves.
    pub max_passes: Option<u32>,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self::from(&WorkflowConfig::default())
    }
}

impl From<&WorkflowConfig> for WorkflowOptions {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            top_k: config.top_k,
            max_web_results: config.max_web_results,
            max_passes: config.pass_limit(),
        }
    }
}

/// The agentic RAG topology:
///
/// ```text
/// query_enhance -+-> retrieve ---> summarize_retrieval -+-> merge_summaries -> rate
///                +-> web_search -> summarize_web -------+                      |
///                                                                              |
///            approved -> END, rejected -> retrieve  <--------------------------+
/// ```
pub fn build_graph(c: &Collaborators, options: &WorkflowOptions) -> std::result::Result<Graph, GraphError> {
    GraphBuilder::new()
        .add_step(Arc::new(QueryEnhance::new(c.generator.clone())))
        .add_step(Arc::new(Retrieve::new(c.retriever.clone(), options.top_k)))
        .add_step(Arc::new(Summarize::new(c.generator.clone(), SummarySource::Retrieval)))
        .add_step(Arc::new(WebSearch::new(c.searcher.clone(), options.max_web_results)))
        .add_step(Arc::new(Summarize::new(c.generator.clone(), SummarySource::Web)))
        .add_step(Arc::new(MergeSummaries::new(c.generator.clone())))
        .add_step(Arc::new(RateSummary::new(c.rater.clone())))
        .entry(QUERY_ENHANCE)
        .edge(QUERY_ENHANCE, RETRIEVE)
        .edge(QUERY_ENHANCE, WEB_SEARCH)
        .edge(RETRIEVE, SUMMARIZE_RETRIEVAL)
        .edge(WEB_SEARCH, SUMMARIZE_WEB)
        .join([SUMMARIZE_RETRIEVAL, SUMMARIZE_WEB], MERGE_SUMMARIES)
        .edge(MERGE_SUMMARIES, RATE)
        .routed_edge(
            RATE,
            Arc::new(RatingRouter),
            [("approved", Target::End), ("rejected", Target::step(RETRIEVE))],
            "rejected",
        )
        .build()
}

/// The assembled workflow, ready to run any number of queries.
pub struct AgenticRag {
    executor: GraphExecutor,
}

impl AgenticRag {
    pub fn new(
        collaborators: &Collaborators,
        options: &WorkflowOptions,
    ) -> std::result::Result<Self, GraphError> {
        let graph = build_graph(collaborators, options)?;
        Ok(Self {
            executor: GraphExecutor::new(Arc::new(graph)).with_max_passes(options.max_passes),
        })
    }

    pub fn graph(&self) -> &Graph {
        self.executor.graph()
    }

    pub async fn run(&self, initial: WorkflowState) -> Result<ExecutionResult> {
        info!(query = initial.text(Field::Query).unwrap_or_default(), "Starting workflow run");
        self.executor.run(initial).await
    }

    pub async fn ask(&self, query: &str) -> Result<ExecutionResult> {
        self.run(WorkflowState::with_query(query)).await
    }
}

/// The user-facing answer of a finished run.
pub fn final_answer(state: &WorkflowState) -> &str {
    state.text(Field::MergedSummary).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragloop_test_utils::{ScriptedGenerator, ScriptedRater, StaticRetriever, StaticWebSearcher};

    fn collaborators() -> Collaborators {
        Collaborators {
            generator: Arc::new(ScriptedGenerator::new("summary")),
            rater: Arc::new(ScriptedRater::always(ragloop_core::types::Rating::Approved)),
            retriever: Arc::new(StaticRetriever::empty()),
            searcher: Arc::new(StaticWebSearcher::empty()),
        }
    }

    #[test]
    fn test_graph_shape() {
        let graph = build_graph(&collaborators(), &WorkflowOptions::default()).unwrap();
        assert_eq!(graph.entry(), QUERY_ENHANCE);
        assert_eq!(graph.joins(), vec![MERGE_SUMMARIES]);
        assert_eq!(graph.step_names().len(), 7);

        // The retry pass only waits for the retrieval branch.
        let first = graph.plan(QUERY_ENHANCE).unwrap();
        assert_eq!(first.barrier(MERGE_SUMMARIES).unwrap().len(), 2);
        let retry = graph.plan(RETRIEVE).unwrap();
        assert_eq!(
            retry.barrier(MERGE_SUMMARIES).unwrap().iter().collect::<Vec<_>>(),
            vec![SUMMARIZE_RETRIEVAL]
        );
    }

    #[test]
    fn test_options_from_config() {
        let config = WorkflowConfig {
            max_passes: 0,
            ..WorkflowConfig::default()
        };
        let options = WorkflowOptions::from(&config);
        assert_eq!(options.max_passes, None);
        assert_eq!(WorkflowOptions::default().max_passes, Some(5));
    }

    #[test]
    fn test_describe_mentions_router() {
        let graph = build_graph(&collaborators(), &WorkflowOptions::default()).unwrap();
        let text = graph.describe();
        assert!(text.contains("rate -> [rating] {approved: END, rejected: retrieve} (fallback: rejected)"));
        assert!(text.contains("join merge_summaries <- summarize_retrieval + summarize_web"));
    }
}
