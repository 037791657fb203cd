//! Mixed-integer model of the student-to-section assignment.
//!
//! `x[s, j] = 1` if student `s` sits in section `j`, created only for sections
//! of a course the student requested. `o[j] = 1` if section `j` runs at all.
//! Variables are created in (student, course, section) order so repeated runs
//! on the same input build the same model.

use good_lp::solvers::{SolutionStatus, WithMipGap, WithTimeLimit};
use good_lp::{
    constraint, variable, Constraint, Expression, ProblemVariables, ResolutionError,
    Solution as _, SolverModel, Variable,
};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{AssignmentSolver, InfeasibilityReport, Solution, SolveOutcome, SolveStatus};
use crate::config::{OptimizerConfig, SolverSettings};
use crate::error::{ErrorContext, OptimizerError, OptimizerResult};
use crate::models::{
    Assignment, CourseId, Layout, PeriodId, Problem, Section, SectionId, StudentId,
    TeacherId, UnmetRequest,
};

/// Exact assignment solver backed by `good_lp`.
///
/// Uses the bundled `microlp` backend, or HiGHS when the `highs` feature is on.
#[derive(Debug, Clone, Copy, Default)]
pub struct MilpSolver;

impl MilpSolver {
    pub fn new() -> Self {
        Self
    }
}

struct Candidate<'a> {
    student: &'a StudentId,
    course: &'a CourseId,
    section: &'a Section,
    var: Variable,
}

/// Sections that may host each course: inside the allowed periods and with seats.
fn eligible_sections<'a>(
    layout: &'a Layout,
    config: &OptimizerConfig,
) -> BTreeMap<&'a CourseId, Vec<&'a Section>> {
    let mut eligible: BTreeMap<&CourseId, Vec<&Section>> = BTreeMap::new();
    for section in layout.sections() {
        if section.capacity > 0 && config.policy_for(&section.course).allows_period(&section.period)
        {
            eligible.entry(&section.course).or_default().push(section);
        }
    }
    eligible
}

fn sum(vars: &[Variable]) -> Expression {
    vars.iter().copied().sum()
}

/// Raw solver output for the watched variables.
struct ModelRun {
    values: Vec<f64>,
    status: SolutionStatus,
}

#[cfg(not(feature = "highs"))]
fn backend(
    vars: ProblemVariables,
    objective: Expression,
    _settings: &SolverSettings,
) -> impl SolverModel<Error = ResolutionError> + WithTimeLimit + WithMipGap {
    vars.maximise(objective)
        .using(good_lp::solvers::microlp::microlp)
}

#[cfg(feature = "highs")]
fn backend(
    vars: ProblemVariables,
    objective: Expression,
    settings: &SolverSettings,
) -> impl SolverModel<Error = ResolutionError> + WithTimeLimit + WithMipGap {
    let mut model = vars
        .maximise(objective)
        .using(good_lp::solvers::highs::highs)
        .set_option("random_seed", settings.random_seed as i32)
        .set_option("output_flag", false);
    if settings.threads > 0 {
        model = model.set_option("threads", settings.threads as i32);
    }
    model
}

/// Solve under the configured wall-clock limit and relative gap.
fn run_model<M>(
    model: M,
    constraints: Vec<Constraint>,
    watched: &[Variable],
    settings: &SolverSettings,
) -> Result<ModelRun, ResolutionError>
where
    M: SolverModel<Error = ResolutionError> + WithTimeLimit + WithMipGap,
{
    let model = model
        .with_time_limit(settings.time_limit_secs as f64)
        .with_mip_gap(settings.mip_gap as f32)
        .map_err(|e| ResolutionError::Str(e.to_string()))?;
    let solution = constraints
        .into_iter()
        .fold(model, |model, c| model.with(c))
        .solve()?;
    Ok(ModelRun {
        values: watched.iter().map(|v| solution.value(*v)).collect(),
        status: solution.status(),
    })
}

/// The backend ran out of time before it held any feasible incumbent.
fn is_time_limit_error(error: &ResolutionError) -> bool {
    match error {
        ResolutionError::Other(msg) => msg.to_ascii_lowercase().contains("time limit"),
        ResolutionError::Str(msg) => msg.to_ascii_lowercase().contains("time limit"),
        _ => false,
    }
}

impl AssignmentSolver for MilpSolver {
    fn solve(
        &self,
        problem: &Problem,
        layout: &Layout,
        config: &OptimizerConfig,
    ) -> OptimizerResult<SolveOutcome> {
        let start = Instant::now();
        let eligible = eligible_sections(layout, config);
        let full = config.constraints.require_full_assignment;

        // Requests with nowhere to go: fatal for required courses, unmet otherwise.
        let mut uncovered = BTreeSet::new();
        let mut unmet = Vec::new();
        for student in problem.students.values() {
            for course in student.requests() {
                if eligible.get(course).is_some_and(|s| !s.is_empty()) {
                    continue;
                }
                let required = full || problem.courses.get(course).map_or(true, |c| c.required);
                if required {
                    uncovered.insert(course.clone());
                } else {
                    unmet.push(UnmetRequest {
                        student: student.id.clone(),
                        course: course.clone(),
                    });
                }
            }
        }
        if !uncovered.is_empty() {
            let uncovered: Vec<CourseId> = uncovered.into_iter().collect();
            warn!(
                "Layout leaves {} requested course(s) without an eligible section: {:?}",
                uncovered.len(),
                uncovered
            );
            return Ok(SolveOutcome::Infeasible(InfeasibilityReport {
                reason: format!(
                    "no eligible section for requested course(s): {}",
                    uncovered
                        .iter()
                        .map(CourseId::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                uncovered_courses: uncovered,
            }));
        }

        info!(
            "Building assignment model: {} students, {} sections",
            problem.students.len(),
            layout.len()
        );

        let mut vars = ProblemVariables::new();
        let mut candidates = Vec::new();
        for student in problem.students.values() {
            for course in student.requests() {
                if let Some(sections) = eligible.get(course) {
                    for &section in sections {
                        candidates.push(Candidate {
                            student: &student.id,
                            course,
                            section,
                            var: vars.add(variable().binary()),
                        });
                    }
                }
            }
        }
        let open: BTreeMap<&SectionId, Variable> = layout
            .sections()
            .map(|s| (&s.id, vars.add(variable().binary())))
            .collect();

        if candidates.is_empty() {
            debug!("No assignment variables; skipping solver");
            let enrollments = layout
                .sections()
                .map(|s| (s.id.clone(), BTreeSet::new()))
                .collect();
            unmet.sort();
            return Ok(SolveOutcome::Solved(Solution {
                assignment: Assignment { enrollments, unmet },
                status: SolveStatus::Optimal,
                objective: 0.0,
                gap: Some(0.0),
                runtime: start.elapsed(),
                closed_sections: layout.sections().map(|s| s.id.clone()).collect(),
                variables: 0,
                constraints: 0,
            }));
        }

        let mut per_request: BTreeMap<(&StudentId, &CourseId), Vec<Variable>> = BTreeMap::new();
        let mut seats: BTreeMap<&SectionId, Vec<Variable>> = BTreeMap::new();
        let mut sped: BTreeMap<&SectionId, Vec<Variable>> = BTreeMap::new();
        let mut student_periods: BTreeMap<(&StudentId, &PeriodId), Vec<Variable>> =
            BTreeMap::new();
        for c in &candidates {
            per_request.entry((c.student, c.course)).or_default().push(c.var);
            seats.entry(&c.section.id).or_default().push(c.var);
            if problem.students.get(c.student).is_some_and(|s| s.sped) {
                sped.entry(&c.section.id).or_default().push(c.var);
            }
            student_periods
                .entry((c.student, &c.section.period))
                .or_default()
                .push(c.var);
        }

        let mut constraints: Vec<Constraint> = Vec::new();

        for request_vars in per_request.values() {
            let placed = sum(request_vars);
            if full {
                constraints.push(constraint!(placed == 1));
            } else {
                constraints.push(constraint!(placed <= 1));
            }
        }

        for section in layout.sections() {
            let Some(&open_var) = open.get(&section.id) else {
                continue;
            };
            if let Some(section_vars) = seats.get(&section.id) {
                let capacity = f64::from(section.capacity);
                let enrolled = sum(section_vars);
                constraints.push(constraint!(enrolled <= capacity * open_var));
            }
            if let Some(sped_vars) = sped.get(&section.id) {
                let cap = config.constraints.max_sped_per_section as f64;
                let sped_enrolled = sum(sped_vars);
                constraints.push(constraint!(sped_enrolled <= cap));
            }
        }

        for period_vars in student_periods.values().filter(|v| v.len() > 1) {
            let busy = sum(period_vars);
            constraints.push(constraint!(busy <= 1));
        }

        let mut teacher_open: BTreeMap<&TeacherId, Vec<Variable>> = BTreeMap::new();
        let mut course_period_open: BTreeMap<(&CourseId, &PeriodId), Vec<Variable>> =
            BTreeMap::new();
        for section in layout.sections() {
            if let Some(&o) = open.get(&section.id) {
                teacher_open.entry(&section.teacher).or_default().push(o);
                course_period_open
                    .entry((&section.course, &section.period))
                    .or_default()
                    .push(o);
            }
        }
        for (teacher_id, open_vars) in &teacher_open {
            let cap = problem
                .teachers
                .get(*teacher_id)
                .map_or(config.constraints.max_teacher_sections, |t| {
                    t.section_cap(config.constraints.max_teacher_sections)
                }) as f64;
            let running = sum(open_vars);
            constraints.push(constraint!(running <= cap));
        }
        for ((course, _), open_vars) in &course_period_open {
            if let Some(cap) = config.policy_for(course).max_sections_per_period() {
                let cap = cap as f64;
                let running = sum(open_vars);
                constraints.push(constraint!(running <= cap));
            }
        }

        // Closing an unused section is worth less than any single placement.
        let close_bonus = 1.0 / (2.0 * (open.len() as f64 + 1.0));
        let satisfied: Expression = candidates.iter().map(|c| c.var).sum();
        let open_penalty: Expression = open.values().map(|o| close_bonus * *o).sum();
        let objective = satisfied - open_penalty;

        let variable_count = candidates.len() + open.len();
        let constraint_count = constraints.len();
        debug!(
            "Model has {} variables and {} constraints (threads={}, memory_percentage={:.2})",
            variable_count, constraint_count, config.solver.threads, config.solver.memory_percentage
        );

        let watched: Vec<Variable> = candidates.iter().map(|c| c.var).collect();

        let model = backend(vars, objective, &config.solver);
        let run = match run_model(model, constraints, &watched, &config.solver) {
            Ok(run) => run,
            Err(ResolutionError::Infeasible) => {
                warn!("Solver proved the layout infeasible");
                return Ok(SolveOutcome::Infeasible(InfeasibilityReport {
                    uncovered_courses: Vec::new(),
                    reason: "no assignment satisfies the hard constraints".to_string(),
                }));
            }
            Err(e) if is_time_limit_error(&e) && !full => {
                // Leaving every request unplaced is always feasible here.
                warn!(
                    "Solver hit its {}s time limit before any incumbent; placing nobody",
                    config.solver.time_limit_secs
                );
                ModelRun {
                    values: vec![0.0; watched.len()],
                    status: SolutionStatus::TimeLimit,
                }
            }
            Err(e) if is_time_limit_error(&e) => {
                return Err(OptimizerError::time_limit(
                    format!(
                        "no full assignment found within {}s",
                        config.solver.time_limit_secs
                    ),
                    ErrorContext::new("solve").with_details(format!(
                        "variables={}, constraints={}",
                        variable_count, constraint_count
                    )),
                ));
            }
            Err(e) => {
                return Err(OptimizerError::internal_with_context(
                    format!("solver backend failed: {}", e),
                    ErrorContext::new("solve").with_details(format!(
                        "variables={}, constraints={}",
                        variable_count, constraint_count
                    )),
                ));
            }
        };
        let values = run.values;
        let runtime = start.elapsed();

        let mut enrollments: BTreeMap<SectionId, BTreeSet<StudentId>> = layout
            .sections()
            .map(|s| (s.id.clone(), BTreeSet::new()))
            .collect();
        let mut placed: BTreeSet<(&StudentId, &CourseId)> = BTreeSet::new();
        for (c, value) in candidates.iter().zip(&values) {
            if *value > 0.5 {
                if let Some(students) = enrollments.get_mut(&c.section.id) {
                    students.insert(c.student.clone());
                }
                placed.insert((c.student, c.course));
            }
        }
        for (student, course) in per_request.keys() {
            if !placed.contains(&(*student, *course)) {
                unmet.push(UnmetRequest {
                    student: (*student).clone(),
                    course: (*course).clone(),
                });
            }
        }
        unmet.sort();

        // Within the gap tolerance an empty section may stay nominally open.
        let closed_sections = enrollments
            .iter()
            .filter(|(_, students)| students.is_empty())
            .map(|(id, _)| id.clone())
            .collect();

        let objective = placed.len() as f64;
        let (status, gap) = match run.status {
            SolutionStatus::Optimal => (SolveStatus::Optimal, Some(0.0)),
            SolutionStatus::GapLimit => (SolveStatus::Optimal, Some(config.solver.mip_gap)),
            SolutionStatus::TimeLimit => {
                warn!(
                    "Solver hit its {}s time limit; keeping the best feasible assignment",
                    config.solver.time_limit_secs
                );
                (SolveStatus::TimeLimitReached, None)
            }
        };

        info!(
            "Assignment solved in {:.2?}: {} placed, {} unmet",
            runtime,
            placed.len(),
            unmet.len()
        );

        Ok(SolveOutcome::Solved(Solution {
            assignment: Assignment { enrollments, unmet },
            status,
            objective,
            gap,
            runtime,
            closed_sections,
            variables: variable_count,
            constraints: constraint_count,
        }))
    }
}

#[cfg(test)]
#[path = "milp_tests.rs"]
mod milp_tests;
