//! All-or-nothing application of action batches.

use tracing::warn;

use super::actions::ActionProposal;
use crate::config::OptimizerConfig;
use crate::error::{ErrorContext, OptimizerError, OptimizerResult};
use crate::models::{layout_violations, Layout, Problem};

/// Check a single proposal against `layout` without touching it.
pub fn check_proposal(
    problem: &Problem,
    layout: &Layout,
    config: &OptimizerConfig,
    proposal: &ActionProposal,
) -> Result<(), String> {
    let mut scratch = layout.clone();
    proposal.edit.apply_to(&mut scratch)?;
    match layout_violations(problem, &scratch, config).into_iter().next() {
        Some(violation) => Err(violation.to_string()),
        None => Ok(()),
    }
}

/// Apply `batch` to a copy of `layout` and validate the result.
///
/// Either every proposal applies and the resulting layout satisfies every hard
/// constraint, or the batch is rejected and `layout` is left as it was.
pub fn apply_batch(
    problem: &Problem,
    layout: &Layout,
    config: &OptimizerConfig,
    batch: &[ActionProposal],
) -> OptimizerResult<Layout> {
    let mut next = layout.clone();
    for proposal in batch {
        proposal.edit.apply_to(&mut next).map_err(|e| {
            OptimizerError::batch_rejected(
                e,
                ErrorContext::new("apply_batch")
                    .with_entity("course")
                    .with_entity_id(&proposal.course),
            )
        })?;
    }

    let violations = layout_violations(problem, &next, config);
    if let Some(first) = violations.first() {
        warn!(
            "Rejecting batch of {} action(s): {} violation(s), first: {}",
            batch.len(),
            violations.len(),
            first
        );
        return Err(OptimizerError::batch_rejected(
            first.to_string(),
            ErrorContext::new("apply_batch")
                .with_details(format!("{} violation(s)", violations.len())),
        ));
    }
    Ok(next)
}
