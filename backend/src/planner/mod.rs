//! Action planning: from utilization metrics to a batch of structural edits.
//!
//! Courses are visited in id order. Each course contributes at most one edit
//! per iteration, chosen from the candidates its sections (and the course-level
//! add rule) produce. Every candidate is materialized and checked against the
//! hard constraints on a scratch layout that already contains the edits picked
//! for earlier courses; candidates that fail are discarded, never relaxed.

pub mod actions;
pub mod apply;
pub mod placement;
pub mod rules;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

pub use actions::{ActionKind, ActionProposal, Direction, StructuralEdit};
pub use apply::{apply_batch, check_proposal};
pub use placement::{find_placement, Placement};
pub use rules::{course_section_cap, RuleContext, RuleOutcome};

use crate::analysis::UtilizationAnalysis;
use crate::config::OptimizerConfig;
use crate::models::{CourseId, Layout, Problem};

/// What the previous solve told the planner.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanSignal {
    Normal,
    /// The layout was infeasible; only growth is considered.
    Recovery { uncovered: Vec<CourseId> },
}

/// Valid options for one course and the one currently picked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoursePlan {
    pub course: CourseId,
    /// Options in precedence order; each passed the hard-constraint checks.
    pub options: Vec<ActionProposal>,
    pub chosen: usize,
    /// Options point in opposite directions (grow vs shrink).
    pub ambiguous: bool,
}

impl CoursePlan {
    pub fn chosen(&self) -> &ActionProposal {
        &self.options[self.chosen.min(self.options.len() - 1)]
    }

    /// Pick another option. Returns false if `index` is out of range.
    pub fn select(&mut self, index: usize) -> bool {
        if index < self.options.len() {
            self.chosen = index;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscardedProposal {
    pub course: CourseId,
    pub kind: ActionKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub courses: Vec<CoursePlan>,
    pub discarded: Vec<DiscardedProposal>,
}

impl Plan {
    /// True when no course has a non-noop edit.
    pub fn is_noop(&self) -> bool {
        self.courses.is_empty()
    }

    /// The chosen edit of every course, in planning order.
    pub fn batch(&self) -> Vec<ActionProposal> {
        self.courses.iter().map(|c| c.chosen().clone()).collect()
    }

    pub fn ambiguous_count(&self) -> usize {
        self.courses.iter().filter(|c| c.ambiguous).count()
    }
}

/// Build the plan for one iteration.
pub fn plan(
    problem: &Problem,
    layout: &Layout,
    analysis: &UtilizationAnalysis,
    config: &OptimizerConfig,
    signal: &PlanSignal,
) -> Plan {
    let ctx = RuleContext {
        problem,
        config,
        analysis,
    };
    let recovery = matches!(signal, PlanSignal::Recovery { .. });
    let max_changes = config.actions.max_changes_per_iteration;

    let mut courses: BTreeSet<CourseId> = analysis.courses.keys().cloned().collect();
    courses.extend(layout.sections().map(|s| s.course.clone()));
    if let PlanSignal::Recovery { uncovered } = signal {
        courses.extend(uncovered.iter().cloned());
    }

    let mut scratch = layout.clone();
    let mut plan = Plan::default();

    for course in courses {
        if plan.courses.len() >= max_changes {
            debug!(
                "Change cap of {} reached; remaining courses wait for the next iteration",
                max_changes
            );
            break;
        }

        let mut outcomes = Vec::new();
        if !recovery {
            let sections: Vec<_> = scratch.sections_for_course(&course).cloned().collect();
            for section in &sections {
                outcomes.push(ctx.section_candidate(&scratch, section));
            }
        }
        outcomes.push(ctx.add_candidate(&scratch, &course));

        let mut options: Vec<ActionProposal> = Vec::new();
        for outcome in outcomes {
            match outcome {
                RuleOutcome::NoMatch => {}
                RuleOutcome::Discarded { kind, reason } => {
                    debug!("{}: discarded {} candidate: {}", course, kind, reason);
                    plan.discarded.push(DiscardedProposal {
                        course: course.clone(),
                        kind,
                        reason,
                    });
                }
                RuleOutcome::Proposal(proposal) => {
                    if options.contains(&proposal) {
                        continue;
                    }
                    match check_proposal(problem, &scratch, config, &proposal) {
                        Ok(()) => options.push(proposal),
                        Err(reason) => {
                            debug!("{}: {} violates constraints: {}", course, proposal.summary(), reason);
                            plan.discarded.push(DiscardedProposal {
                                course: course.clone(),
                                kind: proposal.kind(),
                                reason,
                            });
                        }
                    }
                }
            }
        }
        if options.is_empty() {
            continue;
        }
        options.sort_by_key(ActionProposal::kind);

        let grows = options
            .iter()
            .any(|p| p.kind().direction() == Direction::Grow);
        let shrinks = options
            .iter()
            .any(|p| p.kind().direction() == Direction::Shrink);

        if let Err(reason) = options[0].edit.apply_to(&mut scratch) {
            plan.discarded.push(DiscardedProposal {
                course: course.clone(),
                kind: options[0].kind(),
                reason,
            });
            continue;
        }
        plan.courses.push(CoursePlan {
            course,
            options,
            chosen: 0,
            ambiguous: grows && shrinks,
        });
    }

    info!(
        "Planned {} edit(s) ({} ambiguous, {} discarded)",
        plan.courses.len(),
        plan.ambiguous_count(),
        plan.discarded.len()
    );
    plan
}
