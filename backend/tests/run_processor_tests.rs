mod support;

use optimo_rust::config::OptimizerConfig;
use optimo_rust::services::{process_run_async, JobStatus, JobTracker, LogLevel};
use optimo_rust::RunState;
use support::{overloaded_course, ProblemBuilder};

#[tokio::test]
async fn test_processor_completes_job_with_summary() {
    let tracker = JobTracker::new();
    let job_id = tracker.create_job();

    let outcome = process_run_async(
        job_id.clone(),
        tracker.clone(),
        overloaded_course().json(),
        OptimizerConfig::default(),
        None,
    )
    .await
    .expect("problem loads");
    assert_eq!(outcome.state, RunState::Converged);

    let job = tracker.get_job(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 1.0);
    assert!(job.completed_at.is_some());
    let result = job.result.expect("completed jobs carry a summary");
    assert_eq!(result["state"], "converged");
    assert_eq!(result["sections"], 2);
    assert_eq!(result["unmet_requests"], 0);

    let logs = tracker.get_logs(&job_id);
    assert!(logs.iter().any(|l| l.message.contains("Iteration 1/")));
    assert!(logs.iter().any(|l| l.level == LogLevel::Success));
}

#[tokio::test]
async fn test_processor_fails_job_on_invalid_json() {
    let tracker = JobTracker::new();
    let job_id = tracker.create_job();

    let result = process_run_async(
        job_id.clone(),
        tracker.clone(),
        "{\"students\": [".to_string(),
        OptimizerConfig::default(),
        None,
    )
    .await;
    let message = result.unwrap_err();
    assert!(message.contains("Failed to load problem"));

    let job = tracker.get_job(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some(message.as_str()));
    assert!(tracker
        .get_logs(&job_id)
        .iter()
        .any(|l| l.level == LogLevel::Error));
}

#[tokio::test]
async fn test_processor_fails_job_on_infeasible_problem() {
    let tracker = JobTracker::new();
    let job_id = tracker.create_job();
    let json = ProblemBuilder::new()
        .periods(&["P1"])
        .room("r1", 30)
        .teacher("t1")
        .course("BIO")
        .students("s", 4, &["BIO"])
        .json();

    let outcome = process_run_async(
        job_id.clone(),
        tracker.clone(),
        json,
        OptimizerConfig::default(),
        None,
    )
    .await
    .expect("problem loads");
    assert_eq!(outcome.state, RunState::Infeasible);

    let job = tracker.get_job(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("BIO"));
}

#[tokio::test]
async fn test_cancel_only_applies_to_running_jobs() {
    let tracker = JobTracker::new();
    let job_id = tracker.create_job();
    assert!(!tracker.cancel_job(&job_id));
    assert!(!tracker.cancel_job("missing"));
}
