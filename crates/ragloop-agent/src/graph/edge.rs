use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use super::state::WorkflowState;

/// Where an edge leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Step(String),
    /// Terminal sentinel: the run is over.
    End,
}

impl Target {
    pub fn step(name: impl Into<String>) -> Self {
        Target::Step(name.into())
    }

    pub fn as_step(&self) -> Option<&str> {
        match self {
            Target::Step(name) => Some(name),
            Target::End => None,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Step(name) => f.write_str(name),
            Target::End => f.write_str("END"),
        }
    }
}

static END: Target = Target::End;

/// An unconditional edge. Several plain edges from one step fan out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub to: Target,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: Target::Step(to.into()),
        }
    }

    pub fn to_end(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: Target::End,
        }
    }
}

/// Picks one label from a fixed set, as a pure function of state.
pub trait Router: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Every label `route` can return.
    fn labels(&self) -> &[&'static str];

    fn route(&self, state: &WorkflowState) -> &'static str;
}

/// A router-selected edge, evaluated after `from` has run and merged.
#[derive(Clone)]
pub struct RoutedEdge {
    pub from: String,
    pub router: Arc<dyn Router>,
    pub branches: BTreeMap<String, Target>,
    /// Label used when the router returns one with no branch.
    pub fallback: String,
}

impl RoutedEdge {
    /// Resolve the next target. Always yields a declared branch.
    pub fn resolve(&self, state: &WorkflowState) -> (&str, &Target) {
        let label = self.router.route(state);
        if let Some((label, target)) = self.branches.get_key_value(label) {
            return (label.as_str(), target);
        }
        warn!(
            router = %self.router.name(),
            label,
            fallback = %self.fallback,
            "Router returned an undeclared label, using fallback"
        );
        match self.branches.get_key_value(self.fallback.as_str()) {
            Some((label, target)) => (label.as_str(), target),
            // Builder guarantees the fallback is a branch.
            None => (self.fallback.as_str(), &END),
        }
    }
}

impl std::fmt::Debug for RoutedEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedEdge")
            .field("from", &self.from)
            .field("router", &self.router.name())
            .field("branches", &self.branches)
            .field("fallback", &self.fallback)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl Router for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn labels(&self) -> &[&'static str] {
            &["yes", "no"]
        }
        fn route(&self, _state: &WorkflowState) -> &'static str {
            self.0
        }
    }

    fn edge(router: Fixed) -> RoutedEdge {
        RoutedEdge {
            from: "check".into(),
            router: Arc::new(router),
            branches: BTreeMap::from([
                ("yes".to_string(), Target::End),
                ("no".to_string(), Target::step("retry")),
            ]),
            fallback: "no".into(),
        }
    }

    #[test]
    fn test_resolve_declared_label() {
        let state = WorkflowState::new();
        assert_eq!(edge(Fixed("yes")).resolve(&state), ("yes", &Target::End));
    }

    #[test]
    fn test_resolve_unknown_label_uses_fallback() {
        let state = WorkflowState::new();
        let edge = edge(Fixed("perhaps"));
        let (label, target) = edge.resolve(&state);
        assert_eq!(label, "no");
        assert_eq!(target, &Target::step("retry"));
    }

    #[test]
    fn test_target_display() {
        assert_eq!(Target::End.to_string(), "END");
        assert_eq!(Edge::new("a", "b").to.as_step(), Some("b"));
        assert!(Edge::to_end("a").to.as_step().is_none());
    }
}
