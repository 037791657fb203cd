//! Async optimization run service.
//!
//! Parses the problem, drives one controller run and mirrors its lifecycle into
//! the job tracker, emitting progress logs along the way.

use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::advisor::Advisor;
use crate::config::OptimizerConfig;
use crate::controller::{OptimizationController, RunOutcome, RunState};
use crate::models;
use crate::services::job_tracker::{JobReporter, JobTracker, LogLevel};

/// Compact job result stored in the tracker.
pub fn outcome_summary(outcome: &RunOutcome) -> serde_json::Value {
    let aggregate = outcome.analysis.as_ref().map(|a| &a.aggregate);
    json!({
        "state": outcome.state,
        "iterations": outcome.iterations,
        "best_iteration": outcome.best_iteration,
        "sections": outcome.layout.len(),
        "layout_hash": outcome.layout.hash(),
        "weighted_utilization": aggregate.map(|a| a.weighted),
        "unmet_requests": aggregate.map(|a| a.unmet_requests),
        "error": outcome.error.as_ref().map(|e| e.report()),
    })
}

/// Run one optimization job: parse, iterate, and record the outcome.
///
/// This function is designed to be spawned as a background task. It logs
/// progress to the job tracker so callers can follow the run.
///
/// # Arguments
/// * `job_id` - The job ID for tracking progress
/// * `tracker` - Job tracker for logging
/// * `problem_json` - JSON string of the problem and its initial sections
/// * `config` - Optimizer configuration bundle
/// * `advisor` - Optional advisor used for ambiguous courses
///
/// # Returns
/// * The run outcome (whatever its terminal state), or an error message when
///   the problem could not be loaded
pub async fn process_run_async(
    job_id: String,
    tracker: JobTracker,
    problem_json: String,
    config: OptimizerConfig,
    advisor: Option<Arc<dyn Advisor>>,
) -> Result<RunOutcome, String> {
    tracker.log(&job_id, LogLevel::Info, "Starting optimization run...");

    // Step 1: Parse problem JSON
    tracker.log(&job_id, LogLevel::Info, "Parsing problem JSON...");
    let (problem, layout) = match tokio::task::spawn_blocking(move || {
        models::parse_problem_json_str(&problem_json).and_then(models::build_problem)
    })
    .await
    {
        Ok(Ok(parsed)) => parsed,
        Ok(Err(e)) => {
            let msg = format!("Failed to load problem: {:#}", e);
            tracker.fail_job(&job_id, &msg);
            return Err(msg);
        }
        Err(e) => {
            let msg = format!("Parse task panic: {}", e);
            tracker.fail_job(&job_id, &msg);
            return Err(msg);
        }
    };
    tracker.log(
        &job_id,
        LogLevel::Success,
        format!(
            "✓ Loaded {} students, {} courses, {} sections",
            problem.students.len(),
            problem.courses.len(),
            layout.len()
        ),
    );

    // Step 2: Iterate
    let token = CancellationToken::new();
    tracker.register_cancellation(&job_id, token.clone());
    let mut controller = OptimizationController::new(Arc::new(problem), Arc::new(config))
        .with_reporter(Arc::new(JobReporter::new(tracker.clone(), &job_id)))
        .with_cancellation(token);
    if let Some(advisor) = advisor {
        controller = controller.with_advisor(advisor);
    }
    let outcome = controller.run(layout).await;

    // Step 3: Record the terminal state
    let summary = outcome_summary(&outcome);
    match outcome.state {
        RunState::Converged | RunState::ExhaustedIterations => {
            tracker.log(
                &job_id,
                LogLevel::Success,
                format!(
                    "✅ Run finished ({:?}) after {} iteration(s), {} sections",
                    outcome.state,
                    outcome.iterations,
                    outcome.layout.len()
                ),
            );
            tracker.complete_job(&job_id, Some(summary));
        }
        RunState::Cancelled => tracker.mark_cancelled(&job_id, Some(summary)),
        _ => {
            let msg = outcome
                .error
                .as_ref()
                .map_or_else(|| format!("Run ended as {:?}", outcome.state), |e| e.to_string());
            tracker.fail_job(&job_id, msg);
        }
    }

    Ok(outcome)
}
