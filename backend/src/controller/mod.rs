//! The iterative optimization loop.
//!
//! One run walks `Initializing -> Iterating -> terminal`. Each iteration solves
//! the current layout, analyzes utilization, plans structural edits, lets the
//! advisor arbitrate ambiguous courses and applies the batch all-or-nothing.
//! Iterations are strictly sequential; the layout is an immutable snapshot
//! replaced as a whole between iterations.

pub mod history;
pub mod progress;

use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use history::{
    compare_records, AdvisorConsultation, ConsultationOutcome, IterationHistory, IterationRecord,
};
pub use progress::{NoopReporter, ProgressReporter, ProgressUpdate};

use crate::advisor::{build_request, consult, Advisor, AdvisorDecision, AdvisorError};
use crate::analysis::{analyze, UtilizationAnalysis};
use crate::config::OptimizerConfig;
use crate::error::{ErrorContext, OptimizerError, OptimizerResult};
use crate::models::{validate_layout, Assignment, CourseId, Layout, Problem};
use crate::planner::{apply_batch, check_proposal, plan, ActionProposal, Plan, PlanSignal};
use crate::services::report;
use crate::solver::{AssignmentSolver, MilpSolver, SolveOutcome, SolveStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Initializing,
    Iterating,
    Converged,
    ExhaustedIterations,
    Infeasible,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Initializing | RunState::Iterating)
    }

    /// Terminal states that still hand back a usable layout.
    pub fn is_success(self) -> bool {
        matches!(self, RunState::Converged | RunState::ExhaustedIterations)
    }
}

fn serialize_error<S: Serializer>(
    error: &Option<OptimizerError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    error.as_ref().map(OptimizerError::report).serialize(serializer)
}

/// Everything a run produces, including on failure.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub state: RunState,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<OptimizerError>,
    pub iterations: usize,
    pub best_iteration: Option<usize>,
    pub history: IterationHistory,
    /// Final layout: the converged one, the best snapshot when the budget ran
    /// out, otherwise the last layout the run held.
    pub layout: Layout,
    pub assignment: Option<Assignment>,
    pub analysis: Option<UtilizationAnalysis>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub report: String,
}

/// A solved layout together with its assignment and analysis.
#[derive(Clone)]
struct Snapshot {
    layout: Arc<Layout>,
    assignment: Assignment,
    analysis: UtilizationAnalysis,
}

struct IterationResult {
    record: IterationRecord,
    snapshot: Option<Snapshot>,
    next_layout: Arc<Layout>,
    converged: bool,
    stalled: bool,
}

pub struct OptimizationController {
    problem: Arc<Problem>,
    config: Arc<OptimizerConfig>,
    solver: Arc<dyn AssignmentSolver>,
    advisor: Option<Arc<dyn Advisor>>,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
}

impl OptimizationController {
    pub fn new(problem: Arc<Problem>, config: Arc<OptimizerConfig>) -> Self {
        Self {
            problem,
            config,
            solver: Arc::new(MilpSolver::new()),
            advisor: None,
            reporter: Arc::new(NoopReporter),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_solver(mut self, solver: Arc<dyn AssignmentSolver>) -> Self {
        self.solver = solver;
        self
    }

    /// Only consulted when `advisor.enabled` is set.
    pub fn with_advisor(mut self, advisor: Arc<dyn Advisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the loop to a terminal state starting from `initial`.
    pub async fn run(&self, initial: Layout) -> RunOutcome {
        let started_at = chrono::Utc::now();
        let max_iterations = self.config.pipeline.max_iterations;
        let mut history = IterationHistory::new();
        let mut layout = Arc::new(initial);
        let mut best: Option<(usize, Snapshot)> = None;
        let mut last: Option<Snapshot> = None;
        let mut signal = PlanSignal::Normal;

        info!(
            "Initializing run: {} students, {} sections, budget {} iteration(s)",
            self.problem.students.len(),
            layout.len(),
            max_iterations
        );
        if let Err(e) = self.initialize(&layout) {
            warn!("Run failed during initialization: {}", e);
            return self.finish(RunState::Failed, Some(e), history, None, layout, started_at);
        }

        for iteration in 0..max_iterations {
            if self.cancel.is_cancelled() {
                info!("Run cancelled before iteration {}", iteration);
                let e = OptimizerError::cancelled("run cancelled").with_iteration(iteration);
                return self.finish(RunState::Cancelled, Some(e), history, last, layout, started_at);
            }

            let result = match self.iterate(iteration, &layout, &mut signal).await {
                Ok(result) => result,
                Err(e) => {
                    let state = match &e {
                        OptimizerError::Cancelled { .. } => RunState::Cancelled,
                        OptimizerError::InfeasibleBaseline { .. } => RunState::Infeasible,
                        _ => RunState::Failed,
                    };
                    warn!("Iteration {} ended the run as {:?}: {}", iteration, state, e);
                    return self.finish(state, Some(e), history, last, layout, started_at);
                }
            };

            let record = result.record;
            if let Some(snapshot) = result.snapshot {
                let improves = match &best {
                    None => true,
                    Some((index, _)) => history.records().get(*index).map_or(true, |incumbent| {
                        compare_records(&record, incumbent).is_lt()
                    }),
                };
                if improves {
                    best = Some((history.len(), snapshot.clone()));
                }
                last = Some(snapshot);
            }
            self.report_progress(iteration + 1, RunState::Iterating, &record, false);
            history.push(record);
            layout = result.next_layout;

            if result.converged {
                info!("Converged after {} iteration(s)", iteration + 1);
                return self.finish(RunState::Converged, None, history, last, layout, started_at);
            }
            if result.stalled {
                let e = OptimizerError::IterationBudgetExhausted {
                    message: "no edit can restore feasibility".to_string(),
                    context: ErrorContext::new("iterate").with_iteration(iteration),
                };
                let best = best.map(|(_, snapshot)| snapshot);
                return self.finish(
                    RunState::ExhaustedIterations,
                    Some(e),
                    history,
                    best,
                    layout,
                    started_at,
                );
            }
        }

        info!("Iteration budget of {} exhausted", max_iterations);
        let best = best.map(|(_, snapshot)| snapshot);
        self.finish(
            RunState::ExhaustedIterations,
            Some(OptimizerError::budget_exhausted(max_iterations)),
            history,
            best,
            layout,
            started_at,
        )
    }

    fn initialize(&self, layout: &Layout) -> OptimizerResult<()> {
        self.config.validate()?;
        self.problem.check_references()?;
        for (course, rule) in &self.config.special_courses {
            if let Some(period) = rule
                .allowed_periods
                .iter()
                .find(|p| !self.problem.periods.contains_key(*p))
            {
                return Err(OptimizerError::configuration_with_context(
                    format!("special rule allows unknown period '{}'", period),
                    ErrorContext::new("initialize")
                        .with_entity("course")
                        .with_entity_id(course),
                ));
            }
        }
        validate_layout(&self.problem, layout, &self.config).map_err(|violation| {
            OptimizerError::configuration_with_context(
                violation.to_string(),
                ErrorContext::new("initialize").with_entity("layout"),
            )
        })
    }

    async fn iterate(
        &self,
        iteration: usize,
        layout: &Arc<Layout>,
        signal: &mut PlanSignal,
    ) -> OptimizerResult<IterationResult> {
        let problem = self.problem.as_ref();
        let config = self.config.as_ref();
        let is_last = iteration + 1 >= config.pipeline.max_iterations;
        let layout_hash = layout.hash();
        debug!("Iteration {}: solving layout {}", iteration, layout_hash);

        let (assignment, status, objective, gap, runtime, uncovered, closed) =
            match self.solve(Arc::clone(layout), iteration).await? {
                SolveOutcome::Solved(solution) => {
                    let violations = solution.assignment.violations(problem, layout, config);
                    if let Some(first) = violations.first() {
                        return Err(OptimizerError::internal_with_context(
                            format!("solver returned an invalid assignment: {}", first),
                            ErrorContext::new("verify_assignment").with_iteration(iteration),
                        ));
                    }
                    if solution.status == SolveStatus::TimeLimitReached {
                        let notice = OptimizerError::time_limit(
                            format!(
                                "stopped after {:.1}s, result may be suboptimal",
                                solution.runtime.as_secs_f64()
                            ),
                            ErrorContext::new("solve").with_iteration(iteration),
                        );
                        warn!("{}", notice);
                    }
                    *signal = PlanSignal::Normal;
                    (
                        solution.assignment,
                        solution.status,
                        solution.objective,
                        solution.gap,
                        solution.runtime,
                        Vec::new(),
                        solution.closed_sections,
                    )
                }
                SolveOutcome::Infeasible(report) => {
                    if iteration == 0 {
                        return Err(OptimizerError::infeasible_baseline(format!(
                            "{} (uncovered: {})",
                            report.reason,
                            join_courses(&report.uncovered_courses)
                        )));
                    }
                    warn!(
                        "Iteration {}: layout infeasible ({}), planning recovery",
                        iteration, report.reason
                    );
                    *signal = PlanSignal::Recovery {
                        uncovered: report.uncovered_courses.clone(),
                    };
                    (
                        Assignment::unplaced(problem, layout),
                        SolveStatus::Infeasible,
                        0.0,
                        None,
                        Duration::ZERO,
                        report.uncovered_courses,
                        Vec::new(),
                    )
                }
            };
        let feasible = status != SolveStatus::Infeasible;

        let analysis = analyze(problem, layout, &assignment, &config.utilization);
        info!(
            "Iteration {}: weighted utilization {:.1}%, {} unmet, score {:.1}",
            iteration,
            analysis.aggregate.weighted * 100.0,
            analysis.aggregate.unmet_requests,
            analysis.aggregate.score
        );

        let mut planned = if feasible && analysis.all_optimal() {
            Plan::default()
        } else {
            plan(problem, layout, &analysis, config, signal)
        };
        let converged = feasible && planned.is_noop();
        let stalled = !feasible && planned.is_noop();

        let mut consultations = Vec::new();
        let mut actions: Vec<ActionProposal> = Vec::new();
        let mut batch_rejected = None;
        let mut next_layout = Arc::clone(layout);
        if !planned.is_noop() && !is_last {
            consultations = self
                .resolve_ambiguities(&mut planned, layout, &analysis, iteration)
                .await?;
            let batch = planned.batch();
            match apply_batch(problem, layout, config, &batch) {
                Ok(next) => {
                    for proposal in &batch {
                        info!("Iteration {}: {} ({})", iteration, proposal.summary(), proposal.reason);
                    }
                    actions = batch;
                    next_layout = Arc::new(next);
                }
                Err(e) => {
                    warn!("Iteration {}: {}", iteration, e);
                    batch_rejected = Some(e.to_string());
                }
            }
        } else if is_last && !planned.is_noop() {
            debug!(
                "Iteration {}: final iteration, {} planned edit(s) not applied",
                iteration,
                planned.courses.len()
            );
        }

        let record = IterationRecord {
            iteration,
            layout_hash,
            resulting_layout_hash: next_layout.hash(),
            sections: layout.len(),
            solver_status: status,
            objective,
            gap,
            solve_millis: runtime.as_millis() as u64,
            uncovered_courses: uncovered,
            closed_sections: closed,
            aggregate: analysis.aggregate.clone(),
            actions,
            batch_rejected,
            advisor: consultations,
            recorded_at: chrono::Utc::now(),
        };
        let snapshot = feasible.then(|| Snapshot {
            layout: Arc::clone(layout),
            assignment,
            analysis,
        });
        Ok(IterationResult {
            record,
            snapshot,
            next_layout,
            converged,
            stalled,
        })
    }

    /// Run the solver on a blocking worker, racing the cancellation token.
    async fn solve(&self, layout: Arc<Layout>, iteration: usize) -> OptimizerResult<SolveOutcome> {
        let solver = Arc::clone(&self.solver);
        let problem = Arc::clone(&self.problem);
        let config = Arc::clone(&self.config);
        let task = tokio::task::spawn_blocking(move || solver.solve(&problem, &layout, &config));

        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(OptimizerError::cancelled("run cancelled during solve").with_iteration(iteration))
            }
            joined = task => match joined {
                Ok(result) => result.map_err(|e| e.with_iteration(iteration)),
                Err(e) => Err(OptimizerError::internal_with_context(
                    format!("Solve task panic: {}", e),
                    ErrorContext::new("solve").with_iteration(iteration),
                )),
            },
        }
    }

    /// Consult the advisor for every ambiguous course.
    ///
    /// Failures fall back to the default option when allowed, otherwise they
    /// end the run with `AdvisorUnavailable`.
    async fn resolve_ambiguities(
        &self,
        plan: &mut Plan,
        layout: &Layout,
        analysis: &UtilizationAnalysis,
        iteration: usize,
    ) -> OptimizerResult<Vec<AdvisorConsultation>> {
        let settings = &self.config.advisor;
        if !settings.enabled {
            return Ok(Vec::new());
        }
        let advisor = self.advisor.as_ref();
        let timeout = Duration::from_secs(settings.timeout_secs);
        let mut consultations = Vec::new();

        for course_plan in plan.courses.iter_mut().filter(|c| c.ambiguous) {
            let request = build_request(
                course_plan,
                analysis.courses.get(&course_plan.course),
                layout,
                settings,
            );
            let mut result = match advisor {
                Some(advisor) => consult(advisor.as_ref(), &request, timeout).await,
                None => Err(AdvisorError::Unreachable(
                    "advisor enabled but none is configured".to_string(),
                )),
            };
            if let Ok(AdvisorDecision::Select { option }) = result {
                if let Err(reason) =
                    check_proposal(&self.problem, layout, &self.config, &course_plan.options[option])
                {
                    result = Err(AdvisorError::InvalidResponse(format!(
                        "option {} violates constraints: {}",
                        option, reason
                    )));
                }
            }

            let outcome = match result {
                Ok(AdvisorDecision::Select { option }) => {
                    course_plan.select(option);
                    info!(
                        "Advisor chose option {} for {}: {}",
                        option,
                        course_plan.course,
                        course_plan.chosen().summary()
                    );
                    ConsultationOutcome::Selected { option }
                }
                Ok(AdvisorDecision::Defer) => {
                    debug!("Advisor deferred on {}", course_plan.course);
                    ConsultationOutcome::Deferred
                }
                Err(e) if self.config.pipeline.allow_heuristic_fallback => {
                    warn!(
                        "Advisor failed for {} ({}); using default option",
                        course_plan.course, e
                    );
                    ConsultationOutcome::Fallback {
                        reason: e.to_string(),
                    }
                }
                Err(e) => {
                    return Err(OptimizerError::advisor_unavailable(
                        e.to_string(),
                        ErrorContext::new("advise")
                            .with_iteration(iteration)
                            .with_entity("course")
                            .with_entity_id(&course_plan.course),
                    ));
                }
            };
            consultations.push(AdvisorConsultation {
                course: course_plan.course.clone(),
                options: course_plan.options.len(),
                outcome,
            });
        }
        Ok(consultations)
    }

    fn report_progress(
        &self,
        completed: usize,
        state: RunState,
        record: &IterationRecord,
        terminal: bool,
    ) {
        let max_iterations = self.config.pipeline.max_iterations;
        self.reporter.report(&ProgressUpdate {
            iteration: record.iteration,
            max_iterations,
            progress: if terminal {
                1.0
            } else {
                ProgressUpdate::fraction(completed, max_iterations)
            },
            state,
            weighted_utilization: record.aggregate.weighted,
            score: record.aggregate.score,
            unmet_requests: record.aggregate.unmet_requests,
            last_action: record.actions.last().map(ActionProposal::summary),
            terminal,
        });
    }

    fn finish(
        &self,
        state: RunState,
        error: Option<OptimizerError>,
        history: IterationHistory,
        snapshot: Option<Snapshot>,
        current: Arc<Layout>,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> RunOutcome {
        let best_iteration = history.best().map(|r| r.iteration);
        let (layout, assignment, analysis) = match snapshot {
            Some(snapshot) => (
                Layout::clone(&snapshot.layout),
                Some(snapshot.assignment),
                Some(snapshot.analysis),
            ),
            None => (Layout::clone(&current), None, None),
        };

        if let Some(record) = history.last() {
            self.report_progress(history.len(), state, record, true);
        } else {
            self.reporter.report(&ProgressUpdate {
                iteration: 0,
                max_iterations: self.config.pipeline.max_iterations,
                progress: 1.0,
                state,
                weighted_utilization: 0.0,
                score: 0.0,
                unmet_requests: 0,
                last_action: None,
                terminal: true,
            });
        }

        let mut outcome = RunOutcome {
            state,
            error,
            iterations: history.len(),
            best_iteration,
            history,
            layout,
            assignment,
            analysis,
            started_at,
            finished_at: chrono::Utc::now(),
            report: String::new(),
        };
        outcome.report = report::render(&self.problem, &outcome);
        info!(
            "Run finished as {:?} after {} iteration(s)",
            outcome.state, outcome.iterations
        );
        outcome
    }
}

fn join_courses(courses: &[CourseId]) -> String {
    courses
        .iter()
        .map(CourseId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
