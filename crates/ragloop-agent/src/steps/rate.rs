use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use ragloop_core::traits::RatingService;
use ragloop_core::types::Rating;

use super::{error_detail, RATE};
use crate::graph::{Field, Router, Step, StepOutcome, StateUpdate, WorkflowState};

/// Quality gate over the merged summary. Anything short of an explicit
/// approval from the rater is a rejection.
pub struct RateSummary {
    rater: Arc<dyn RatingService>,
}

impl RateSummary {
    pub fn new(rater: Arc<dyn RatingService>) -> Self {
        Self { rater }
    }
}

fn prompt(query: Option<&str>, summary: &str) -> String {
    format!(
        "Rate the answer below as approved or rejected.\n\
Approve it only if it is factual, coherent and answers the question.\n\n\
Question: {}\n\
Answer: {}",
        query.unwrap_or("(none)"),
        summary
    )
}

impl Step for RateSummary {
    fn name(&self) -> &str {
        RATE
    }

    fn writes(&self) -> &[Field] {
        &[Field::Rating]
    }

    fn run<'a>(&'a self, state: &'a WorkflowState) -> BoxFuture<'a, StepOutcome> {
        Box::pin(async move {
            let rated = |rating| StateUpdate::new().with_rating(rating);

            if state.is_smalltalk() {
                return StepOutcome::fast_path(rated(Rating::Approved));
            }
            let Some(summary) = state.content(Field::MergedSummary) else {
                debug!("No merged summary to rate, rejecting");
                return StepOutcome::completed(rated(Rating::Rejected));
            };

            match self.rater.rate(prompt(state.query(), summary)).await {
                Ok(rating) => StepOutcome::completed(rated(rating)),
                Err(e) => StepOutcome::degraded(rated(Rating::Rejected), error_detail(&e)),
            }
        })
    }
}

pub const APPROVED: &str = "approved";
pub const REJECTED: &str = "rejected";

/// Routes on the rating tag. Missing or unrecognised values retry.
pub struct RatingRouter;

impl Router for RatingRouter {
    fn name(&self) -> &str {
        "rating"
    }

    fn labels(&self) -> &[&'static str] {
        &[APPROVED, REJECTED]
    }

    fn route(&self, state: &WorkflowState) -> &'static str {
        match state.rating() {
            Some(Rating::Approved) => APPROVED,
            _ => REJECTED,
        }
    }
}
