use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use ragloop_core::error::{RagloopError, Result};

use super::builder::{Exit, Graph, Outgoing, PassPlan};
use super::edge::Target;
use super::node::{Step, StepOutcome, StepStatus};
use super::state::{StateUpdate, WorkflowState};

/// Result of executing a single step.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step: String,
    /// 1-based pass the step ran in.
    pub pass: u32,
    #[serde(flatten)]
    pub status: StepStatus,
    pub elapsed_ms: u64,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// A routed edge resolved to END, or a step with an END edge finished.
    End,
    /// The configured pass limit was hit before approval.
    PassLimit,
}

/// Result of executing the whole graph.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub state: WorkflowState,
    /// Per-step results. Steps of concurrent branches are grouped per
    /// branch, in branch declaration order.
    pub step_results: Vec<StepResult>,
    pub passes: u32,
    pub termination: Termination,
    pub total_elapsed_ms: u64,
}

impl ExecutionResult {
    /// How many times `step` ran.
    pub fn traversals(&self, step: &str) -> usize {
        self.step_results.iter().filter(|r| r.step == step).count()
    }
}

struct Segment {
    update: StateUpdate,
    results: Vec<StepResult>,
    exit: Exit,
}

/// Runs a validated [`Graph`].
///
/// Steps on a linear path run one after another on the cumulative state.
/// At a fan-out every branch runs concurrently against its own copy of the
/// state as of the fan-out; the branches meet at their join, their updates
/// are merged in branch declaration order, and the join runs once. A routed
/// edge ends the pass; following it to a step starts the next pass with the
/// state carried over unchanged.
pub struct GraphExecutor {
    graph: Arc<Graph>,
    max_passes: Option<u32>,
}

impl GraphExecutor {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self {
            graph,
            max_passes: None,
        }
    }

    /// Cap on the number of passes. `None` loops until a router says END.
    pub fn with_max_passes(mut self, max_passes: Option<u32>) -> Self {
        self.max_passes = max_passes;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub async fn run(&self, initial: WorkflowState) -> Result<ExecutionResult> {
        let start = Instant::now();
        let mut state = initial;
        let mut step_results = Vec::new();
        let mut pass: u32 = 1;
        let mut pass_entry = self.graph.entry().to_string();
        let mut cursor = pass_entry.clone();

        let termination = loop {
            let plan = self.graph.plan(&pass_entry).ok_or_else(|| {
                RagloopError::InvalidState(format!("no pass plan for '{}'", pass_entry))
            })?;

            let segment = self.run_segment(cursor, state.clone(), pass, plan).await?;
            state.merge(&segment.update);
            step_results.extend(segment.results);

            match segment.exit {
                Exit::Join { join, from } => {
                    check_barrier(plan, &join, &BTreeSet::from([from]))?;
                    cursor = join;
                }
                Exit::End => break Termination::End,
                Exit::Routed(step) => {
                    let Some(Outgoing::Routed(edge)) = self.graph.outgoing(&step) else {
                        return Err(RagloopError::InvalidState(format!(
                            "step '{}' has no routed edge",
                            step
                        )));
                    };
                    let (label, target) = edge.resolve(&state);
                    match target {
                        Target::End => {
                            info!(step = %step, label, pass, "Routed to END");
                            break Termination::End;
                        }
                        Target::Step(next) => {
                            if let Some(limit) = self.max_passes {
                                if pass >= limit {
                                    warn!(
                                        step = %step,
                                        label,
                                        passes = pass,
                                        "Pass limit reached, terminating with current state"
                                    );
                                    break Termination::PassLimit;
                                }
                            }
                            pass += 1;
                            info!(step = %step, label, next = %next, pass, "Starting new pass");
                            pass_entry = next.clone();
                            cursor = next.clone();
                        }
                    }
                }
            }
        };

        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        info!(passes = pass, ?termination, total_elapsed_ms, "Graph run complete");

        Ok(ExecutionResult {
            state,
            step_results,
            passes: pass,
            termination,
            total_elapsed_ms,
        })
    }

    /// Runs from `start` until a join, a routed edge or END. `state` is this
    /// segment's private copy; the returned update holds everything it wrote.
    fn run_segment<'a>(
        &'a self,
        start: String,
        mut state: WorkflowState,
        pass: u32,
        plan: &'a PassPlan,
    ) -> BoxFuture<'a, Result<Segment>> {
        async move {
            let mut update = StateUpdate::new();
            let mut results = Vec::new();
            let mut current = start;

            loop {
                let step = self.graph.step(&current).ok_or_else(|| {
                    RagloopError::InvalidState(format!("step '{}' not found in graph", current))
                })?;
                let (written, result) = run_step(step.as_ref(), &state, pass).await;
                state.merge(&written);
                update.merge(written);
                results.push(result);

                let targets = match self.graph.outgoing(&current) {
                    Some(Outgoing::Plain(targets)) => targets,
                    Some(Outgoing::Routed(_)) => {
                        return Ok(Segment {
                            update,
                            results,
                            exit: Exit::Routed(current),
                        });
                    }
                    Some(Outgoing::End) | None => {
                        return Ok(Segment {
                            update,
                            results,
                            exit: Exit::End,
                        });
                    }
                };

                if let [next] = targets.as_slice() {
                    if plan.is_join(next) {
                        return Ok(Segment {
                            update,
                            results,
                            exit: Exit::Join {
                                join: next.clone(),
                                from: current,
                            },
                        });
                    }
                    current = next.clone();
                    continue;
                }

                debug!(step = %current, branches = targets.len(), "Fanning out");
                let branches = targets
                    .iter()
                    .map(|target| self.run_segment(target.clone(), state.clone(), pass, plan));
                let segments = join_all(branches).await;

                let mut join: Option<String> = None;
                let mut arrived = BTreeSet::new();
                for segment in segments {
                    let segment = segment?;
                    state.merge(&segment.update);
                    update.merge(segment.update);
                    results.extend(segment.results);
                    match segment.exit {
                        Exit::Join { join: j, from } => {
                            join = Some(j);
                            arrived.insert(from);
                        }
                        _ => {
                            return Err(RagloopError::InvalidState(format!(
                                "branch after '{}' did not reach a join",
                                current
                            )));
                        }
                    }
                }
                let join = join.ok_or_else(|| {
                    RagloopError::InvalidState(format!("fan-out from '{}' has no join", current))
                })?;
                check_barrier(plan, &join, &arrived)?;
                current = join;
            }
        }
        .boxed()
    }
}

async fn run_step(step: &dyn Step, state: &WorkflowState, pass: u32) -> (StateUpdate, StepResult) {
    let name = step.name();
    info!(step = %name, pass, "Running step");
    let started = Instant::now();

    let StepOutcome { mut update, status } = step.run(state).await;
    let dropped = update.restrict_to(step.writes());
    if !dropped.is_empty() {
        warn!(step = %name, fields = ?dropped, "Dropped writes to undeclared fields");
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &status {
        StepStatus::Degraded { reason } => {
            warn!(step = %name, pass, elapsed_ms, reason = %reason, "Step degraded");
        }
        _ => debug!(step = %name, pass, elapsed_ms, status = status.label(), "Step complete"),
    }

    (
        update,
        StepResult {
            step: name.to_string(),
            pass,
            status,
            elapsed_ms,
        },
    )
}

fn check_barrier(plan: &PassPlan, join: &str, arrived: &BTreeSet<String>) -> Result<()> {
    match plan.barrier(join) {
        Some(expected) if expected == arrived => Ok(()),
        expected => Err(RagloopError::InvalidState(format!(
            "join '{}' expected {:?} but got {:?}",
            join, expected, arrived
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use ragloop_core::types::Rating;

    use super::*;
    use crate::graph::builder::GraphBuilder;
    use crate::graph::edge::Router;
    use crate::graph::state::{Field, Value};

    /// Writes a fixed update after an optional delay and records the state
    /// it was handed.
    struct Emit {
        name: &'static str,
        writes: Vec<Field>,
        update: StateUpdate,
        delay_ms: u64,
        degraded: bool,
        seen: Mutex<Vec<WorkflowState>>,
    }

    impl Emit {
        fn new(name: &'static str, field: Field, text: &str) -> Self {
            Self {
                name,
                writes: vec![field],
                update: StateUpdate::new().with_text(field, text),
                delay_ms: 0,
                degraded: false,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn delayed(mut self, ms: u64) -> Self {
            self.delay_ms = ms;
            self
        }

        fn last_seen(&self) -> WorkflowState {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl Step for Emit {
        fn name(&self) -> &str {
            self.name
        }
        fn writes(&self) -> &[Field] {
            &self.writes
        }
        fn run<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, StepOutcome> {
            Box::pin(async move {
                self.seen.lock().unwrap().push(state.clone());
                if self.delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
                }
                if self.degraded {
                    StepOutcome::degraded(self.update.clone(), "backend down")
                } else {
                    StepOutcome::completed(self.update.clone())
                }
            })
        }
    }

    /// Rejects until it has been called `approve_on` times.
    struct Judge {
        calls: AtomicUsize,
        approve_on: usize,
    }

    impl Step for Judge {
        fn name(&self) -> &str {
            "judge"
        }
        fn writes(&self) -> &[Field] {
            &[Field::Rating]
        }
        fn run<'a>(&'a self, _state: &'a WorkflowState) -> BoxFuture<'a, StepOutcome> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                let rating = if n >= self.approve_on {
                    Rating::Approved
                } else {
                    Rating::Rejected
                };
                StepOutcome::completed(StateUpdate::new().with_rating(rating))
            })
        }
    }

    struct ByRating;

    impl Router for ByRating {
        fn name(&self) -> &str {
            "by_rating"
        }
        fn labels(&self) -> &[&'static str] {
            &["approved", "rejected"]
        }
        fn route(&self, state: &WorkflowState) -> &'static str {
            match state.rating() {
                Some(Rating::Approved) => "approved",
                _ => "rejected",
            }
        }
    }

    struct Diamond {
        left: Arc<Emit>,
        right: Arc<Emit>,
        join: Arc<Emit>,
        judge: Arc<Judge>,
        graph: Arc<Graph>,
    }

    /// start -> {left, right} -> join -> judge, judge rejected -> left.
    fn diamond(approve_on: usize, left_delay: u64, right_delay: u64) -> Diamond {
        let start = Arc::new(Emit::new("start", Field::IsSmalltalk, "x"));
        let left = Arc::new(Emit::new("left", Field::RagAnswer, "L").delayed(left_delay));
        let right = Arc::new(Emit::new("right", Field::WebAnswer, "R").delayed(right_delay));
        let join = Arc::new(Emit::new("join", Field::MergedSummary, "M"));
        let judge = Arc::new(Judge {
            calls: AtomicUsize::new(0),
            approve_on,
        });

        let graph = GraphBuilder::new()
            .add_step(start)
            .add_step(left.clone())
            .add_step(right.clone())
            .add_step(join.clone())
            .add_step(judge.clone())
            .entry("start")
            .edge("start", "left")
            .edge("start", "right")
            .join(["left", "right"], "join")
            .edge("join", "judge")
            .routed_edge(
                "judge",
                Arc::new(ByRating),
                [
                    ("approved", Target::End),
                    ("rejected", Target::step("left")),
                ],
                "rejected",
            )
            .build()
            .unwrap();

        Diamond {
            left,
            right,
            join,
            judge,
            graph: Arc::new(graph),
        }
    }

    #[tokio::test]
    async fn test_single_pass_runs_each_step_once() {
        let d = diamond(1, 0, 0);
        let result = GraphExecutor::new(d.graph.clone())
            .run(WorkflowState::with_query("q"))
            .await
            .unwrap();

        assert_eq!(result.passes, 1);
        assert_eq!(result.termination, Termination::End);
        for step in ["start", "left", "right", "join", "judge"] {
            assert_eq!(result.traversals(step), 1, "{step}");
        }
        assert_eq!(result.state.rating(), Some(Rating::Approved));
        assert_eq!(result.state.text(Field::MergedSummary), Some("M"));
    }

    #[tokio::test]
    async fn test_join_sees_both_branches_regardless_of_finish_order() {
        let d = diamond(1, 30, 0);
        GraphExecutor::new(d.graph.clone())
            .run(WorkflowState::with_query("q"))
            .await
            .unwrap();

        let at_join = d.join.last_seen();
        assert_eq!(at_join.text(Field::RagAnswer), Some("L"));
        assert_eq!(at_join.text(Field::WebAnswer), Some("R"));
    }

    #[tokio::test]
    async fn test_branches_start_from_fan_out_snapshot() {
        let d = diamond(1, 0, 20);
        GraphExecutor::new(d.graph.clone())
            .run(WorkflowState::with_query("q"))
            .await
            .unwrap();

        // left finished first but right never observes its write.
        assert!(d.right.last_seen().get(Field::RagAnswer).is_none());
        assert!(d.left.last_seen().get(Field::WebAnswer).is_none());
    }

    #[tokio::test]
    async fn test_rejection_reruns_only_the_looping_branch() {
        let d = diamond(3, 0, 0);
        let result = GraphExecutor::new(d.graph.clone())
            .run(WorkflowState::with_query("q"))
            .await
            .unwrap();

        assert_eq!(result.passes, 3);
        assert_eq!(result.termination, Termination::End);
        assert_eq!(result.traversals("start"), 1);
        assert_eq!(result.traversals("right"), 1);
        assert_eq!(result.traversals("left"), 3);
        assert_eq!(result.traversals("join"), 3);
        assert_eq!(d.judge.calls.load(Ordering::SeqCst), 3);

        // The retry pass still sees the first pass's web branch output.
        assert_eq!(d.join.last_seen().text(Field::WebAnswer), Some("R"));
        assert!(result.step_results.iter().any(|r| r.step == "left" && r.pass == 3));
    }

    #[tokio::test]
    async fn test_pass_limit_terminates_with_state() {
        let d = diamond(usize::MAX, 0, 0);
        let result = GraphExecutor::new(d.graph.clone())
            .with_max_passes(Some(2))
            .run(WorkflowState::with_query("q"))
            .await
            .unwrap();

        assert_eq!(result.passes, 2);
        assert_eq!(result.termination, Termination::PassLimit);
        assert_eq!(result.traversals("judge"), 2);
        assert_eq!(result.state.rating(), Some(Rating::Rejected));
        assert_eq!(result.state.text(Field::MergedSummary), Some("M"));
    }

    #[tokio::test]
    async fn test_undeclared_writes_are_dropped() {
        let mut sneaky = Emit::new("sneaky", Field::RagAnswer, "ok");
        sneaky.update.set(Field::Query, Value::Text("hijacked".into()));
        let graph = GraphBuilder::new()
            .add_step(Arc::new(sneaky))
            .entry("sneaky")
            .edge_to_end("sneaky")
            .build()
            .unwrap();

        let result = GraphExecutor::new(Arc::new(graph))
            .run(WorkflowState::with_query("original"))
            .await
            .unwrap();
        assert_eq!(result.state.query(), Some("original"));
        assert_eq!(result.state.text(Field::RagAnswer), Some("ok"));
    }

    #[tokio::test]
    async fn test_degraded_branch_still_reaches_join() {
        let start = Arc::new(Emit::new("start", Field::IsSmalltalk, "x"));
        let mut broken = Emit::new("broken", Field::RagAnswer, "placeholder");
        broken.degraded = true;
        let fine = Arc::new(Emit::new("fine", Field::WebAnswer, "web"));
        let join = Arc::new(Emit::new("join", Field::MergedSummary, "M"));

        let graph = GraphBuilder::new()
            .add_step(start)
            .add_step(Arc::new(broken))
            .add_step(fine)
            .add_step(join.clone())
            .entry("start")
            .edge("start", "broken")
            .edge("start", "fine")
            .join(["broken", "fine"], "join")
            .edge_to_end("join")
            .build()
            .unwrap();

        let result = GraphExecutor::new(Arc::new(graph))
            .run(WorkflowState::new())
            .await
            .unwrap();

        assert_eq!(result.traversals("join"), 1);
        let broken = result.step_results.iter().find(|r| r.step == "broken").unwrap();
        assert_eq!(broken.status.label(), "degraded");
        assert_eq!(join.last_seen().text(Field::WebAnswer), Some("web"));
    }

    #[tokio::test]
    async fn test_result_serializes_flat_status() {
        let d = diamond(1, 0, 0);
        let result = GraphExecutor::new(d.graph.clone())
            .run(WorkflowState::with_query("q"))
            .await
            .unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["termination"], "end");
        assert_eq!(json["step_results"][0]["status"], "completed");
        assert_eq!(json["state"]["query"], "q");
    }
}
