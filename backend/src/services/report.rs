//! Human-readable summary of a finished run.

use std::fmt::Write as _;

use crate::controller::{ConsultationOutcome, RunOutcome};
use crate::models::Problem;

/// Render the plain-text run report.
pub fn render(problem: &Problem, outcome: &RunOutcome) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_report(&mut out, problem, outcome);
    out
}

fn write_report(out: &mut String, problem: &Problem, outcome: &RunOutcome) -> std::fmt::Result {
    let state = serde_json::to_value(outcome.state)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();

    writeln!(out, "Section Layout Optimization Report")?;
    writeln!(out, "  State: {}", state)?;
    write!(out, "  Iterations: {}", outcome.iterations)?;
    match outcome.best_iteration {
        Some(best) => writeln!(out, " (best: {})", best)?,
        None => writeln!(out)?,
    }
    if let Some(error) = &outcome.error {
        writeln!(out, "  Note: {}", error)?;
    }
    writeln!(
        out,
        "  Duration (secs): {:.3}",
        (outcome.finished_at - outcome.started_at).num_milliseconds() as f64 / 1000.0
    )?;

    writeln!(out, "Summary:")?;
    writeln!(
        out,
        "  Students: {}  Requests: {}",
        problem.students.len(),
        problem.total_requests()
    )?;
    writeln!(
        out,
        "  Sections: {}  Capacity: {}",
        outcome.layout.len(),
        outcome.layout.total_capacity()
    )?;

    let Some(analysis) = &outcome.analysis else {
        writeln!(out, "  No feasible assignment was produced.")?;
        return Ok(());
    };
    let aggregate = &analysis.aggregate;
    writeln!(
        out,
        "  Placed: {}  Unmet: {}",
        aggregate.total_enrolled, aggregate.unmet_requests
    )?;
    writeln!(
        out,
        "  Utilization: weighted {:.1}%, mean {:.1}%",
        aggregate.weighted * 100.0,
        aggregate.mean * 100.0
    )?;
    writeln!(
        out,
        "  Bands: {} optimal, {} below target, {} above target, {} zero capacity",
        aggregate.within_optimal,
        aggregate.below_target,
        aggregate.above_target,
        aggregate.zero_capacity
    )?;

    writeln!(out, "Courses:")?;
    for summary in analysis.courses.values() {
        writeln!(
            out,
            "  {:<12} sections={} capacity={} enrolled={} requested={} unmet={}",
            summary.course.as_str(),
            summary.sections,
            summary.capacity,
            summary.enrolled,
            summary.requested,
            summary.unmet
        )?;
    }

    writeln!(out, "Iterations:")?;
    for record in outcome.history.records() {
        let status = serde_json::to_value(record.solver_status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        writeln!(
            out,
            "  #{} {} objective={} utilization={:.1}% score={:.1}",
            record.iteration,
            status,
            record.objective,
            record.aggregate.weighted * 100.0,
            record.aggregate.score
        )?;
        if !record.closed_sections.is_empty() {
            let closed: Vec<&str> = record.closed_sections.iter().map(|s| s.as_str()).collect();
            writeln!(out, "      empty: {}", closed.join(", "))?;
        }
        for action in &record.actions {
            writeln!(out, "      {}", action.summary())?;
        }
        if let Some(reason) = &record.batch_rejected {
            writeln!(out, "      batch rejected: {}", reason)?;
        }
        for consultation in &record.advisor {
            let outcome = match &consultation.outcome {
                ConsultationOutcome::Selected { option } => format!("selected option {}", option),
                ConsultationOutcome::Deferred => "deferred".to_string(),
                ConsultationOutcome::Fallback { reason } => format!("fallback ({})", reason),
            };
            writeln!(out, "      advisor on {}: {}", consultation.course, outcome)?;
        }
    }
    Ok(())
}
