//! Job tracking for background optimization runs.
//!
//! This module provides a simple in-memory job tracker that stores status,
//! progress and logs for runs started through the run processor.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::controller::{ProgressReporter, ProgressUpdate, RunState};

/// A single log entry with timestamp and message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Job status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Job metadata and logs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    /// Fraction of the iteration budget consumed.
    pub progress: f64,
    pub current_iteration: Option<usize>,
    /// Controller state name, e.g. "iterating" or "converged".
    pub state: Option<String>,
    pub error: Option<String>,
    pub logs: Vec<LogEntry>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Result of the job (run summary on completion)
    pub result: Option<serde_json::Value>,
}

/// In-memory job tracker.
#[derive(Clone)]
pub struct JobTracker {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
    cancellations: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl JobTracker {
    /// Create a new job tracker.
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            cancellations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a new job and return its ID.
    pub fn create_job(&self) -> String {
        let job_id = Uuid::new_v4().to_string();
        let job = Job {
            job_id: job_id.clone(),
            status: JobStatus::Running,
            progress: 0.0,
            current_iteration: None,
            state: None,
            error: None,
            logs: vec![],
            created_at: chrono::Utc::now(),
            completed_at: None,
            result: None,
        };
        self.jobs.write().insert(job_id.clone(), job);
        job_id
    }

    /// Add a log entry to a job.
    pub fn log(&self, job_id: &str, level: LogLevel, message: impl Into<String>) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            job.logs.push(LogEntry {
                timestamp: chrono::Utc::now(),
                level,
                message: message.into(),
            });
        }
    }

    /// Record loop progress for a running job.
    pub fn update_progress(&self, job_id: &str, progress: f64, iteration: usize, state: RunState) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            job.progress = progress.clamp(0.0, 1.0);
            job.current_iteration = Some(iteration);
            job.state = Some(state_name(state));
        }
    }

    /// Attach the token that cancels the job's run.
    pub fn register_cancellation(&self, job_id: &str, token: CancellationToken) {
        self.cancellations.write().insert(job_id.to_string(), token);
    }

    /// Request cancellation. Returns false if the job is unknown or already finished.
    ///
    /// The status check and the token lookup share one `jobs` read guard, so a
    /// job cannot finish in between. Lock order is always `jobs` then
    /// `cancellations`.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        let jobs = self.jobs.read();
        let running = jobs
            .get(job_id)
            .is_some_and(|job| job.status == JobStatus::Running);
        if !running {
            return false;
        }
        match self.cancellations.read().get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Mark a job as completed with optional result.
    pub fn complete_job(&self, job_id: &str, result: Option<serde_json::Value>) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = JobStatus::Completed;
            job.progress = 1.0;
            job.completed_at = Some(chrono::Utc::now());
            job.result = result;
        }
        self.cancellations.write().remove(job_id);
    }

    /// Mark a job as cancelled.
    pub fn mark_cancelled(&self, job_id: &str, result: Option<serde_json::Value>) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(chrono::Utc::now());
            job.result = result;
            job.logs.push(LogEntry {
                timestamp: chrono::Utc::now(),
                level: LogLevel::Warning,
                message: "Job cancelled".to_string(),
            });
        }
        self.cancellations.write().remove(job_id);
    }

    /// Mark a job as failed.
    pub fn fail_job(&self, job_id: &str, error_message: impl Into<String>) {
        let error_message = error_message.into();
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = JobStatus::Failed;
            job.completed_at = Some(chrono::Utc::now());
            job.error = Some(error_message.clone());
            job.logs.push(LogEntry {
                timestamp: chrono::Utc::now(),
                level: LogLevel::Error,
                message: error_message,
            });
        }
        self.cancellations.write().remove(job_id);
    }

    /// Get a job by ID.
    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().get(job_id).cloned()
    }

    /// Get all logs for a job.
    pub fn get_logs(&self, job_id: &str) -> Vec<LogEntry> {
        self.jobs
            .read()
            .get(job_id)
            .map(|job| job.logs.clone())
            .unwrap_or_default()
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn state_name(state: RunState) -> String {
    serde_json::to_value(state)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", state))
}

/// Forwards controller progress into a tracked job.
pub struct JobReporter {
    tracker: JobTracker,
    job_id: String,
}

impl JobReporter {
    pub fn new(tracker: JobTracker, job_id: impl Into<String>) -> Self {
        Self {
            tracker,
            job_id: job_id.into(),
        }
    }
}

impl ProgressReporter for JobReporter {
    fn report(&self, update: &ProgressUpdate) {
        self.tracker
            .update_progress(&self.job_id, update.progress, update.iteration, update.state);
        if update.terminal {
            return;
        }
        let mut message = format!(
            "Iteration {}/{}: utilization {:.1}%, {} unmet, score {:.1}",
            update.iteration + 1,
            update.max_iterations,
            update.weighted_utilization * 100.0,
            update.unmet_requests,
            update.score
        );
        if let Some(action) = &update.last_action {
            message.push_str(&format!(", last action: {}", action));
        }
        self.tracker.log(&self.job_id, LogLevel::Info, message);
    }
}
