//! Graph execution engine for cyclic workflows.
//!
//! A workflow is a set of named [`Step`]s wired by plain edges (fan-out when
//! a step has several) and routed edges (a [`Router`] picks one branch,
//! possibly looping back). [`GraphBuilder::build`] rejects malformed graphs
//! before anything runs; [`GraphExecutor`] drives the validated [`Graph`]
//! over a cumulative [`WorkflowState`].

pub mod builder;
pub mod edge;
pub mod executor;
pub mod node;
pub mod state;

pub use builder::{Graph, GraphBuilder, GraphError, PassPlan};
pub use edge::{Edge, RoutedEdge, Router, Target};
pub use executor::{ExecutionResult, GraphExecutor, StepResult, Termination};
pub use node::{Step, StepOutcome, StepStatus};
pub use state::{Field, StateUpdate, Value, WorkflowState, PLACEHOLDERS_KEY};
