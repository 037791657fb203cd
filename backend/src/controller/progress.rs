//! Progress reporting out of a running optimization.

use serde::Serialize;

use super::RunState;

/// Emitted after each completed iteration and once at termination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub iteration: usize,
    pub max_iterations: usize,
    /// Fraction of the iteration budget consumed, in `0.0..=1.0`.
    pub progress: f64,
    pub state: RunState,
    pub weighted_utilization: f64,
    pub score: f64,
    pub unmet_requests: usize,
    pub last_action: Option<String>,
    pub terminal: bool,
}

impl ProgressUpdate {
    pub fn fraction(iteration: usize, max_iterations: usize) -> f64 {
        if max_iterations == 0 {
            1.0
        } else {
            (iteration as f64 / max_iterations as f64).clamp(0.0, 1.0)
        }
    }
}

/// Sink for progress updates. Called from the controller task; must not block.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: &ProgressUpdate);
}

/// Discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _update: &ProgressUpdate) {}
}
