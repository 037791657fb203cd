//! Append-only record of what each iteration saw and did.

use serde::Serialize;
use std::cmp::Ordering;

use crate::analysis::AggregateUtilization;
use crate::models::{CourseId, SectionId};
use crate::planner::ActionProposal;
use crate::solver::SolveStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConsultationOutcome {
    Selected { option: usize },
    Deferred,
    /// The advisor failed and the default option was kept.
    Fallback { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdvisorConsultation {
    pub course: CourseId,
    pub options: usize,
    pub outcome: ConsultationOutcome,
}

/// Immutable once pushed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    /// Hash of the layout that was solved.
    pub layout_hash: String,
    /// Hash of the layout handed to the next iteration.
    pub resulting_layout_hash: String,
    pub sections: usize,
    pub solver_status: SolveStatus,
    pub objective: f64,
    pub gap: Option<f64>,
    pub solve_millis: u64,
    pub uncovered_courses: Vec<CourseId>,
    /// Sections the solver left empty.
    pub closed_sections: Vec<SectionId>,
    pub aggregate: AggregateUtilization,
    pub actions: Vec<ActionProposal>,
    /// Set when the iteration's batch was rejected as a whole.
    pub batch_rejected: Option<String>,
    pub advisor: Vec<AdvisorConsultation>,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

impl IterationRecord {
    pub fn is_feasible(&self) -> bool {
        self.solver_status != SolveStatus::Infeasible
    }

    pub fn changed_layout(&self) -> bool {
        self.layout_hash != self.resulting_layout_hash
    }
}

/// Ranking used to pick the best snapshot: lower score, then higher weighted
/// utilization, then the earlier iteration. Infeasible records never win.
pub fn compare_records(a: &IterationRecord, b: &IterationRecord) -> Ordering {
    b.is_feasible()
        .cmp(&a.is_feasible())
        .then_with(|| a.aggregate.score.total_cmp(&b.aggregate.score))
        .then_with(|| b.aggregate.weighted.total_cmp(&a.aggregate.weighted))
        .then_with(|| a.iteration.cmp(&b.iteration))
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct IterationHistory {
    records: Vec<IterationRecord>,
}

impl IterationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: IterationRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    /// Best feasible record, if any.
    pub fn best(&self) -> Option<&IterationRecord> {
        self.records
            .iter()
            .filter(|r| r.is_feasible())
            .min_by(|a, b| compare_records(a, b))
    }
}
