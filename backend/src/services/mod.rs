//! Service layer around the optimization loop.
//!
//! Job tracking, the background run processor and the text report live here;
//! they wrap the controller without adding optimization logic of their own.

pub mod job_tracker;
pub mod report;
pub mod run_processor;

pub use job_tracker::{Job, JobReporter, JobStatus, JobTracker, LogEntry, LogLevel};
pub use run_processor::{outcome_summary, process_run_async};
