use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use thiserror::Error;

use super::edge::{Edge, RoutedEdge, Router, Target};
use super::node::Step;
use super::state::Field;

/// Malformed graph definitions, reported by [`GraphBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("graph has no steps")]
    Empty,

    #[error("no entry step set")]
    MissingEntry,

    #[error("step '{0}' is defined more than once")]
    DuplicateStep(String),

    #[error("edge {from} -> {to} references undefined step '{missing}'")]
    DanglingEdge {
        from: String,
        to: String,
        missing: String,
    },

    #[error("step '{0}' has no outgoing edge")]
    DeadEnd(String),

    #[error("step '{0}' mixes plain, routed and END edges")]
    MixedEdges(String),

    #[error("step '{0}' has more than one routed edge")]
    DuplicateRouter(String),

    #[error("router '{router}' on '{from}' has no branch for label '{label}'")]
    UnmappedLabel {
        from: String,
        router: String,
        label: String,
    },

    #[error("fallback '{label}' of the routed edge on '{from}' is not a declared branch")]
    UnknownFallback { from: String, label: String },

    #[error("plain edges form a cycle through '{0}'; cycles need a routed edge")]
    PlainCycle(String),

    #[error("fan-out from '{0}' does not converge on a single join step")]
    UnjoinedFanOut(String),

    #[error("fan-out from '{from}' targets join step '{join}' directly")]
    FanOutIntoJoin { from: String, join: String },

    #[error("concurrent branches after '{from}' both write '{field}'")]
    OverlappingWrites { from: String, field: Field },

    #[error("join '{join}' waits for {expected:?} but only {arriving:?} can arrive")]
    MissingJoinPredecessor {
        join: String,
        expected: Vec<String>,
        arriving: Vec<String>,
    },

    #[error("step '{0}' is unreachable from the entry step")]
    Unreachable(String),
}

pub(crate) enum Outgoing {
    Plain(Vec<String>),
    Routed(RoutedEdge),
    End,
}

/// The join barriers of one pass, keyed by join step.
///
/// A pass starts at the entry step or at a routed re-entry target and runs
/// until a routed edge or END. A join waits for exactly those of its
/// predecessors that can run in the pass.
#[derive(Debug, Clone, Default)]
pub struct PassPlan {
    barriers: HashMap<String, BTreeSet<String>>,
}

impl PassPlan {
    pub fn is_join(&self, step: &str) -> bool {
        self.barriers.contains_key(step)
    }

    pub fn barrier(&self, join: &str) -> Option<&BTreeSet<String>> {
        self.barriers.get(join)
    }
}

/// A validated, immutable workflow graph.
pub struct Graph {
    steps: HashMap<String, Arc<dyn Step>>,
    order: Vec<String>,
    outgoing: HashMap<String, Outgoing>,
    predecessors: HashMap<String, Vec<String>>,
    entry: String,
    plans: HashMap<String, PassPlan>,
}

impl Graph {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn step(&self, name: &str) -> Option<&Arc<dyn Step>> {
        self.steps.get(name)
    }

    /// Step names in declaration order.
    pub fn step_names(&self) -> &[String] {
        &self.order
    }

    /// Steps with more than one plain predecessor.
    pub fn joins(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|s| self.predecessors.get(*s).is_some_and(|p| p.len() > 1))
            .map(String::as_str)
            .collect()
    }

    pub fn plan(&self, pass_entry: &str) -> Option<&PassPlan> {
        self.plans.get(pass_entry)
    }

    pub(crate) fn outgoing(&self, step: &str) -> Option<&Outgoing> {
        self.outgoing.get(step)
    }

    /// Human-readable topology, one edge per line.
    pub fn describe(&self) -> String {
        let mut lines = vec![format!("entry: {}", self.entry)];
        for name in &self.order {
            match self.outgoing.get(name) {
                Some(Outgoing::Plain(targets)) => {
                    lines.push(format!("{} -> {}", name, targets.join(", ")));
                }
                Some(Outgoing::Routed(edge)) => {
                    let branches = edge
                        .branches
                        .iter()
                        .map(|(label, target)| format!("{}: {}", label, target))
                        .collect::<Vec<_>>()
                        .join(", ");
                    lines.push(format!(
                        "{} -> [{}] {{{}}} (fallback: {})",
                        name,
                        edge.router.name(),
                        branches,
                        edge.fallback
                    ));
                }
                Some(Outgoing::End) => lines.push(format!("{} -> END", name)),
                None => {}
            }
        }
        for join in self.joins() {
            let preds = self.predecessors.get(join).cloned().unwrap_or_default();
            lines.push(format!("join {} <- {}", join, preds.join(" + ")));
        }
        lines.join("\n")
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("entry", &self.entry)
            .field("steps", &self.order)
            .finish()
    }
}

/// Collects steps and edges, then validates them into a [`Graph`].
#[derive(Default)]
pub struct GraphBuilder {
    steps: Vec<Arc<dyn Step>>,
    edges: Vec<Edge>,
    routed: Vec<RoutedEdge>,
    entry: Option<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn entry(mut self, step: impl Into<String>) -> Self {
        self.entry = Some(step.into());
        self
    }

    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge::new(from, to));
        self
    }

    pub fn edge_to_end(mut self, from: impl Into<String>) -> Self {
        self.edges.push(Edge::to_end(from));
        self
    }

    /// Plain edges from every predecessor into `join`.
    pub fn join<I, S>(mut self, predecessors: I, join: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let join = join.into();
        for pred in predecessors {
            self.edges.push(Edge::new(pred, join.clone()));
        }
        self
    }

    pub fn routed_edge<I, L>(
        mut self,
        from: impl Into<String>,
        router: Arc<dyn Router>,
        branches: I,
        fallback: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = (L, Target)>,
        L: Into<String>,
    {
        self.routed.push(RoutedEdge {
            from: from.into(),
            router,
            branches: branches.into_iter().map(|(l, t)| (l.into(), t)).collect(),
            fallback: fallback.into(),
        });
        self
    }

    pub fn build(self) -> Result<Graph, GraphError> {
        if self.steps.is_empty() {
            return Err(GraphError::Empty);
        }
        let entry = self.entry.ok_or(GraphError::MissingEntry)?;

        let mut steps = HashMap::new();
        let mut order = Vec::new();
        for step in self.steps {
            let name = step.name().to_string();
            if steps.insert(name.clone(), step).is_some() {
                return Err(GraphError::DuplicateStep(name));
            }
            order.push(name);
        }
        if !steps.contains_key(&entry) {
            return Err(GraphError::DanglingEdge {
                from: "START".into(),
                to: entry.clone(),
                missing: entry,
            });
        }

        let check = |from: &str, to: &str| -> Result<(), GraphError> {
            for name in [from, to] {
                if !steps.contains_key(name) {
                    return Err(GraphError::DanglingEdge {
                        from: from.to_string(),
                        to: to.to_string(),
                        missing: name.to_string(),
                    });
                }
            }
            Ok(())
        };

        let mut plain: HashMap<String, Vec<String>> = HashMap::new();
        let mut ends: BTreeSet<String> = BTreeSet::new();
        let mut predecessors: HashMap<String, Vec<String>> = HashMap::new();
        for edge in &self.edges {
            match &edge.to {
                Target::Step(to) => {
                    check(&edge.from, to)?;
                    let targets = plain.entry(edge.from.clone()).or_default();
                    if !targets.contains(to) {
                        targets.push(to.clone());
                        predecessors.entry(to.clone()).or_default().push(edge.from.clone());
                    }
                }
                Target::End => {
                    check(&edge.from, &edge.from)?;
                    ends.insert(edge.from.clone());
                }
            }
        }

        let mut routed: HashMap<String, RoutedEdge> = HashMap::new();
        for edge in self.routed {
            for target in edge.branches.values() {
                if let Target::Step(to) = target {
                    check(&edge.from, to)?;
                }
            }
            check(&edge.from, &edge.from)?;
            for label in edge.router.labels() {
                if !edge.branches.contains_key(*label) {
                    return Err(GraphError::UnmappedLabel {
                        from: edge.from.clone(),
                        router: edge.router.name().to_string(),
                        label: label.to_string(),
                    });
                }
            }
            if !edge.branches.contains_key(&edge.fallback) {
                return Err(GraphError::UnknownFallback {
                    from: edge.from.clone(),
                    label: edge.fallback.clone(),
                });
            }
            if routed.contains_key(&edge.from) {
                return Err(GraphError::DuplicateRouter(edge.from));
            }
            routed.insert(edge.from.clone(), edge);
        }

        let mut outgoing = HashMap::new();
        for name in &order {
            let kinds = [plain.contains_key(name), routed.contains_key(name), ends.contains(name)];
            let out = match kinds {
                [true, false, false] => Outgoing::Plain(plain.remove(name).unwrap_or_default()),
                [false, true, false] => match routed.remove(name) {
                    Some(edge) => Outgoing::Routed(edge),
                    None => return Err(GraphError::DeadEnd(name.clone())),
                },
                [false, false, true] => Outgoing::End,
                [false, false, false] => return Err(GraphError::DeadEnd(name.clone())),
                _ => return Err(GraphError::MixedEdges(name.clone())),
            };
            outgoing.insert(name.clone(), out);
        }

        let mut graph = Graph {
            steps,
            order,
            outgoing,
            predecessors,
            entry,
            plans: HashMap::new(),
        };
        check_plain_acyclic(&graph)?;
        graph.plans = plan_passes(&graph)?;
        Ok(graph)
    }
}

fn check_plain_acyclic(graph: &Graph) -> Result<(), GraphError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'g>(
        graph: &'g Graph,
        name: &'g str,
        marks: &mut HashMap<&'g str, Mark>,
    ) -> Result<(), GraphError> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(GraphError::PlainCycle(name.to_string())),
            None => {}
        }
        marks.insert(name, Mark::Visiting);
        if let Some(Outgoing::Plain(targets)) = graph.outgoing.get(name) {
            for next in targets {
                visit(graph, next, marks)?;
            }
        }
        marks.insert(name, Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    for name in &graph.order {
        visit(graph, name, &mut marks)?;
    }
    Ok(())
}

/// Every pass entry reachable from the graph entry, with its join barriers.
/// Walks each pass exactly the way the executor will and rejects any shape
/// the executor could not schedule.
fn plan_passes(graph: &Graph) -> Result<HashMap<String, PassPlan>, GraphError> {
    let mut plans = HashMap::new();
    let mut reached: BTreeSet<String> = BTreeSet::new();
    let mut queue = VecDeque::from([graph.entry.clone()]);

    while let Some(pass_entry) = queue.pop_front() {
        if plans.contains_key(&pass_entry) {
            continue;
        }

        let live = reachable_in_pass(graph, &pass_entry);
        let mut plan = PassPlan::default();
        for name in &live {
            if let Some(preds) = graph.predecessors.get(name).filter(|p| p.len() > 1) {
                let expected = preds.iter().filter(|p| live.contains(*p)).cloned().collect();
                plan.barriers.insert(name.clone(), expected);
            }
        }

        let mut cursor = pass_entry.clone();
        loop {
            let mut visited = Vec::new();
            match walk(graph, &plan, &cursor, &mut visited)? {
                Exit::Join { join, from } => {
                    expect_arrivals(&plan, &join, &BTreeSet::from([from]))?;
                    cursor = join;
                }
                Exit::Routed(step) => {
                    if let Some(Outgoing::Routed(edge)) = graph.outgoing.get(&step) {
                        for next in edge.branches.values().filter_map(Target::as_step) {
                            queue.push_back(next.to_string());
                        }
                    }
                    break;
                }
                Exit::End => break,
            }
        }

        reached.extend(live);
        plans.insert(pass_entry, plan);
    }

    if let Some(orphan) = graph.order.iter().find(|s| !reached.contains(*s)) {
        return Err(GraphError::Unreachable(orphan.clone()));
    }
    Ok(plans)
}

/// Steps reachable from `start` over plain edges.
fn reachable_in_pass(graph: &Graph, start: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::from([start.to_string()]);
    let mut stack = vec![start.to_string()];
    while let Some(name) = stack.pop() {
        if let Some(Outgoing::Plain(targets)) = graph.outgoing.get(&name) {
            for next in targets {
                if seen.insert(next.clone()) {
                    stack.push(next.clone());
                }
            }
        }
    }
    seen
}

pub(crate) enum Exit {
    /// Stopped in front of a join; `from` is the last step that ran.
    Join { join: String, from: String },
    /// Stopped after a step whose outgoing edge is routed.
    Routed(String),
    End,
}

/// Static mirror of the executor's segment walk.
fn walk(
    graph: &Graph,
    plan: &PassPlan,
    start: &str,
    visited: &mut Vec<String>,
) -> Result<Exit, GraphError> {
    let mut current = start.to_string();
    loop {
        visited.push(current.clone());
        match graph.outgoing.get(&current) {
            Some(Outgoing::End) | None => return Ok(Exit::End),
            Some(Outgoing::Routed(_)) => return Ok(Exit::Routed(current)),
            Some(Outgoing::Plain(targets)) if targets.len() == 1 => {
                let next = &targets[0];
                if plan.is_join(next) {
                    return Ok(Exit::Join {
                        join: next.clone(),
                        from: current,
                    });
                }
                current = next.clone();
            }
            Some(Outgoing::Plain(targets)) => {
                let mut join: Option<String> = None;
                let mut arrivals = BTreeSet::new();
                let mut branch_writes: Vec<BTreeSet<Field>> = Vec::new();

                for target in targets {
                    if plan.is_join(target) {
                        return Err(GraphError::FanOutIntoJoin {
                            from: current.clone(),
                            join: target.clone(),
                        });
                    }
                    let mut branch = Vec::new();
                    match walk(graph, plan, target, &mut branch)? {
                        Exit::Join { join: j, from } => {
                            if join.get_or_insert_with(|| j.clone()) != &j {
                                return Err(GraphError::UnjoinedFanOut(current.clone()));
                            }
                            arrivals.insert(from);
                        }
                        _ => return Err(GraphError::UnjoinedFanOut(current.clone())),
                    }

                    let writes: BTreeSet<Field> = branch
                        .iter()
                        .filter_map(|s| graph.steps.get(s))
                        .flat_map(|s| s.writes().iter().copied())
                        .collect();
                    if let Some(field) = branch_writes
                        .iter()
                        .find_map(|other| other.intersection(&writes).next().copied())
                    {
                        return Err(GraphError::OverlappingWrites {
                            from: current.clone(),
                            field,
                        });
                    }
                    branch_writes.push(writes);
                    visited.extend(branch);
                }

                let join = join.ok_or_else(|| GraphError::UnjoinedFanOut(current.clone()))?;
                expect_arrivals(plan, &join, &arrivals)?;
                current = join;
            }
        }
    }
}

fn expect_arrivals(
    plan: &PassPlan,
    join: &str,
    arriving: &BTreeSet<String>,
) -> Result<(), GraphError> {
    let expected = plan.barrier(join).cloned().unwrap_or_default();
    if &expected != arriving {
        return Err(GraphError::MissingJoinPredecessor {
            join: join.to_string(),
            expected: expected.into_iter().collect(),
            arriving: arriving.iter().cloned().collect(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;

    use super::*;
    use crate::graph::node::StepOutcome;
    use crate::graph::state::{StateUpdate, WorkflowState};

    struct Noop {
        name: &'static str,
        writes: Vec<Field>,
    }

    impl Step for Noop {
        fn name(&self) -> &str {
            self.name
        }
        fn writes(&self) -> &[Field] {
            &self.writes
        }
        fn run<'a>(&'a self, _state: &'a WorkflowState) -> BoxFuture<'a, StepOutcome> {
            Box::pin(async { StepOutcome::completed(StateUpdate::new()) })
        }
    }

    fn step(name: &'static str, writes: &[Field]) -> Arc<dyn Step> {
        Arc::new(Noop {
            name,
            writes: writes.to_vec(),
        })
    }

    struct Always(&'static [&'static str]);

    impl Router for Always {
        fn name(&self) -> &str {
            "always"
        }
        fn labels(&self) -> &[&'static str] {
            self.0
        }
        fn route(&self, _state: &crate::graph::state::WorkflowState) -> &'static str {
            self.0[0]
        }
    }

    /// a -> {b, c} -> d, with d's outgoing edge left to the caller.
    fn diamond() -> GraphBuilder {
        GraphBuilder::new()
            .add_step(step("a", &[Field::Query]))
            .add_step(step("b", &[Field::RagAnswer]))
            .add_step(step("c", &[Field::WebAnswer]))
            .add_step(step("d", &[Field::MergedSummary]))
            .entry("a")
            .edge("a", "b")
            .edge("a", "c")
            .join(["b", "c"], "d")
    }

    #[test]
    fn test_valid_diamond_with_loop() {
        let graph = diamond()
            .routed_edge(
                "d",
                Arc::new(Always(&["done", "again"])),
                [("done", Target::End), ("again", Target::step("b"))],
                "again",
            )
            .build()
            .unwrap();

        assert_eq!(graph.joins(), vec!["d"]);
        let first = graph.plan("a").unwrap();
        assert_eq!(first.barrier("d").unwrap().len(), 2);
        let retry = graph.plan("b").unwrap();
        assert_eq!(retry.barrier("d").unwrap().iter().collect::<Vec<_>>(), vec!["b"]);
        assert!(graph.plan("c").is_none());
    }

    #[test]
    fn test_empty_and_missing_entry() {
        assert_eq!(GraphBuilder::new().build().unwrap_err(), GraphError::Empty);
        let err = GraphBuilder::new()
            .add_step(step("a", &[]))
            .edge_to_end("a")
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::MissingEntry);
    }

    #[test]
    fn test_duplicate_step() {
        let err = GraphBuilder::new()
            .add_step(step("a", &[]))
            .add_step(step("a", &[]))
            .entry("a")
            .edge_to_end("a")
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::DuplicateStep("a".into()));
    }

    #[test]
    fn test_dangling_edge() {
        let err = diamond().edge("d", "ghost").build().unwrap_err();
        assert_eq!(
            err,
            GraphError::DanglingEdge {
                from: "d".into(),
                to: "ghost".into(),
                missing: "ghost".into()
            }
        );
    }

    #[test]
    fn test_dead_end_and_mixed_edges() {
        assert_eq!(diamond().build().unwrap_err(), GraphError::DeadEnd("d".into()));

        let err = diamond().edge_to_end("d").edge_to_end("a").build().unwrap_err();
        assert_eq!(err, GraphError::MixedEdges("a".into()));
    }

    #[test]
    fn test_router_labels_must_be_mapped() {
        let err = diamond()
            .routed_edge(
                "d",
                Arc::new(Always(&["done", "again"])),
                [("done", Target::End)],
                "done",
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::UnmappedLabel { label, .. } if label == "again"));

        let err = diamond()
            .routed_edge(
                "d",
                Arc::new(Always(&["done"])),
                [("done", Target::End)],
                "retry",
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownFallback { .. }));
    }

    #[test]
    fn test_plain_cycle_rejected() {
        let err = GraphBuilder::new()
            .add_step(step("a", &[]))
            .add_step(step("b", &[]))
            .entry("a")
            .edge("a", "b")
            .edge("b", "a")
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::PlainCycle(_)));
    }

    #[test]
    fn test_overlapping_branch_writes() {
        let err = GraphBuilder::new()
            .add_step(step("a", &[]))
            .add_step(step("b", &[Field::RagAnswer]))
            .add_step(step("c", &[Field::RagAnswer]))
            .add_step(step("d", &[]))
            .entry("a")
            .edge("a", "b")
            .edge("a", "c")
            .join(["b", "c"], "d")
            .edge_to_end("d")
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::OverlappingWrites {
                from: "a".into(),
                field: Field::RagAnswer
            }
        );
    }

    #[test]
    fn test_fan_out_without_join() {
        let err = GraphBuilder::new()
            .add_step(step("a", &[]))
            .add_step(step("b", &[Field::RagAnswer]))
            .add_step(step("c", &[Field::WebAnswer]))
            .entry("a")
            .edge("a", "b")
            .edge("a", "c")
            .edge_to_end("b")
            .edge_to_end("c")
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::UnjoinedFanOut("a".into()));
    }

    #[test]
    fn test_join_predecessor_that_never_arrives() {
        // x feeds the join but only runs after it, so d would wait forever.
        let err = diamond()
            .add_step(step("x", &[Field::Rating]))
            .edge("d", "x")
            .edge("x", "d")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::PlainCycle(_) | GraphError::MissingJoinPredecessor { .. }
        ));

        // j waits for b, d and e, but d and e meet at j inside c's branch
        // without b.
        let err = GraphBuilder::new()
            .add_step(step("a", &[]))
            .add_step(step("b", &[Field::RagAnswer]))
            .add_step(step("c", &[]))
            .add_step(step("d", &[Field::WebAnswer]))
            .add_step(step("e", &[Field::WebSummary]))
            .add_step(step("j", &[]))
            .entry("a")
            .edge("a", "b")
            .edge("a", "c")
            .edge("c", "d")
            .edge("c", "e")
            .join(["b", "d", "e"], "j")
            .edge_to_end("j")
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::MissingJoinPredecessor {
                join: "j".into(),
                expected: vec!["b".into(), "d".into(), "e".into()],
                arriving: vec!["d".into(), "e".into()],
            }
        );
    }

    #[test]
    fn test_unreachable_step() {
        let err = GraphBuilder::new()
            .add_step(step("a", &[]))
            .add_step(step("island", &[]))
            .entry("a")
            .edge_to_end("a")
            .edge_to_end("island")
            .build()
            .unwrap_err();
        assert_eq!(err, GraphError::Unreachable("island".into()));
    }

    #[test]
    fn test_fan_out_straight_into_join() {
        let err = GraphBuilder::new()
            .add_step(step("a", &[]))
            .add_step(step("b", &[Field::RagAnswer]))
            .add_step(step("j", &[]))
            .entry("a")
            .edge("a", "b")
            .edge("a", "j")
            .edge("b", "j")
            .edge_to_end("j")
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::FanOutIntoJoin {
                from: "a".into(),
                join: "j".into()
            }
        );
    }
}
