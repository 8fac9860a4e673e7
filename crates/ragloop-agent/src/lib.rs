//! Workflow engine and agentic RAG pipeline.

pub mod conversation;
pub mod graph;
pub mod smalltalk;
pub mod steps;
pub mod workflow;

pub use conversation::ConversationStore;
pub use graph::{
    ExecutionResult, Field, Graph, GraphBuilder, GraphError, GraphExecutor, StepResult,
    Termination, WorkflowState,
};
pub use workflow::{build_graph, final_answer, AgenticRag, Collaborators, WorkflowOptions};
