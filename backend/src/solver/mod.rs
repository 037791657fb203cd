//! Student-to-section assignment solving.
//!
//! The solver receives read-only views of the problem and the current layout
//! and returns a fresh [`SolveOutcome`]; it never touches shared state, so the
//! controller can run it on a blocking worker.

pub mod milp;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::OptimizerConfig;
use crate::error::OptimizerResult;
use crate::models::{Assignment, CourseId, Layout, Problem, SectionId};

pub use milp::MilpSolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Optimal,
    /// Stopped at the wall-clock limit; feasible but not proven optimal.
    TimeLimitReached,
    Infeasible,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub assignment: Assignment,
    pub status: SolveStatus,
    /// Number of satisfied requests.
    pub objective: f64,
    /// Relative optimality gap, when known.
    pub gap: Option<f64>,
    pub runtime: Duration,
    /// Sections the model left without students.
    pub closed_sections: Vec<SectionId>,
    pub variables: usize,
    pub constraints: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfeasibilityReport {
    /// Required courses that are requested but have no eligible section.
    pub uncovered_courses: Vec<CourseId>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum SolveOutcome {
    Solved(Solution),
    Infeasible(InfeasibilityReport),
}

/// Anything that can turn a layout into an assignment.
pub trait AssignmentSolver: Send + Sync {
    fn solve(
        &self,
        problem: &Problem,
        layout: &Layout,
        config: &OptimizerConfig,
    ) -> OptimizerResult<SolveOutcome>;
}
