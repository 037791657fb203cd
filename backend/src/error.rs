//! Error types for optimization runs.
//!
//! Every failure carries an [`ErrorContext`] describing where it happened so the
//! run report and the job log can point at the offending iteration or entity.

use serde::Serialize;
use std::fmt;

/// Result type for optimizer operations
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Structured context for optimizer errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorContext {
    /// The operation being performed (e.g., "solve", "apply_batch")
    pub operation: Option<String>,
    /// Iteration index when the error happened inside the loop
    pub iteration: Option<usize>,
    /// The entity type involved (e.g., "section", "course")
    pub entity: Option<String>,
    /// The entity ID if applicable
    pub entity_id: Option<String>,
    /// Additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with an operation name.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            ..Default::default()
        }
    }

    /// Set the iteration index.
    pub fn with_iteration(mut self, iteration: usize) -> Self {
        self.iteration = Some(iteration);
        self
    }

    /// Set the entity type.
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// Set the entity ID.
    pub fn with_entity_id(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    /// Set additional details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    fn is_empty(&self) -> bool {
        self == &ErrorContext::default()
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        let mut parts = Vec::new();
        if let Some(ref op) = self.operation {
            parts.push(format!("operation={}", op));
        }
        if let Some(iteration) = self.iteration {
            parts.push(format!("iteration={}", iteration));
        }
        if let Some(ref entity) = self.entity {
            parts.push(format!("entity={}", entity));
        }
        if let Some(ref id) = self.entity_id {
            parts.push(format!("id={}", id));
        }
        if let Some(ref details) = self.details {
            parts.push(format!("details={}", details));
        }
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Error taxonomy of an optimization run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OptimizerError {
    /// Malformed or contradictory input or configuration. Fatal, raised before the loop.
    #[error("Configuration error: {message} {context}")]
    ConfigurationError {
        message: String,
        context: ErrorContext,
    },

    /// The initial layout admits no feasible assignment.
    #[error("Infeasible baseline: {message} {context}")]
    InfeasibleBaseline {
        message: String,
        context: ErrorContext,
    },

    /// The solver stopped at its wall-clock limit with a feasible, possibly suboptimal result.
    #[error("Solve time limit reached: {message} {context}")]
    SolveTimeLimitReached {
        message: String,
        context: ErrorContext,
    },

    /// The advisor could not be reached or gave an unusable answer.
    #[error("Advisor unavailable: {message} {context}")]
    AdvisorUnavailable {
        message: String,
        context: ErrorContext,
    },

    /// The iteration budget ran out before convergence.
    #[error("Iteration budget exhausted: {message} {context}")]
    IterationBudgetExhausted {
        message: String,
        context: ErrorContext,
    },

    /// An iteration's action batch broke a hard constraint and was discarded as a whole.
    #[error("Action batch rejected: {message} {context}")]
    ActionBatchRejected {
        message: String,
        context: ErrorContext,
    },

    /// The run was cancelled cooperatively.
    #[error("Cancelled: {message} {context}")]
    Cancelled {
        message: String,
        context: ErrorContext,
    },

    /// Internal/unexpected errors.
    #[error("Internal error: {message} {context}")]
    Internal {
        message: String,
        context: ErrorContext,
    },
}

impl OptimizerError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a configuration error with context.
    pub fn configuration_with_context(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            context,
        }
    }

    /// Create an infeasible-baseline error.
    pub fn infeasible_baseline(message: impl Into<String>) -> Self {
        Self::InfeasibleBaseline {
            message: message.into(),
            context: ErrorContext::new("solve").with_iteration(0),
        }
    }

    /// Create a time-limit notice.
    pub fn time_limit(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::SolveTimeLimitReached {
            message: message.into(),
            context,
        }
    }

    /// Create an advisor-unavailable error.
    pub fn advisor_unavailable(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::AdvisorUnavailable {
            message: message.into(),
            context,
        }
    }

    /// Create a budget-exhausted notice.
    pub fn budget_exhausted(max_iterations: usize) -> Self {
        Self::IterationBudgetExhausted {
            message: format!("no convergence within {} iterations", max_iterations),
            context: ErrorContext::new("iterate"),
        }
    }

    /// Create a batch-rejected error.
    pub fn batch_rejected(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::ActionBatchRejected {
            message: message.into(),
            context,
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create an internal error with context.
    pub fn internal_with_context(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Internal {
            message: message.into(),
            context,
        }
    }

    /// Whether this error terminates the run.
    ///
    /// Time-limit notices, budget exhaustion and rejected batches are absorbed by
    /// the loop. Advisor errors only reach the caller when heuristic fallback is
    /// disabled, so they count as fatal here.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::SolveTimeLimitReached { .. }
                | Self::IterationBudgetExhausted { .. }
                | Self::ActionBatchRejected { .. }
        )
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigurationError { .. } => "configuration_error",
            Self::InfeasibleBaseline { .. } => "infeasible_baseline",
            Self::SolveTimeLimitReached { .. } => "solve_time_limit_reached",
            Self::AdvisorUnavailable { .. } => "advisor_unavailable",
            Self::IterationBudgetExhausted { .. } => "iteration_budget_exhausted",
            Self::ActionBatchRejected { .. } => "action_batch_rejected",
            Self::Cancelled { .. } => "cancelled",
            Self::Internal { .. } => "internal",
        }
    }

    /// Get the error context.
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::ConfigurationError { context, .. }
            | Self::InfeasibleBaseline { context, .. }
            | Self::SolveTimeLimitReached { context, .. }
            | Self::AdvisorUnavailable { context, .. }
            | Self::IterationBudgetExhausted { context, .. }
            | Self::ActionBatchRejected { context, .. }
            | Self::Cancelled { context, .. }
            | Self::Internal { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::ConfigurationError { context, .. }
            | Self::InfeasibleBaseline { context, .. }
            | Self::SolveTimeLimitReached { context, .. }
            | Self::AdvisorUnavailable { context, .. }
            | Self::IterationBudgetExhausted { context, .. }
            | Self::ActionBatchRejected { context, .. }
            | Self::Cancelled { context, .. }
            | Self::Internal { context, .. } => context,
        }
    }

    /// Add or update the operation in the error context.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    /// Add or update the iteration in the error context.
    pub fn with_iteration(mut self, iteration: usize) -> Self {
        self.context_mut().iteration = Some(iteration);
        self
    }

    /// Serializable view of the error for run outcomes and job results.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind().to_string(),
            message: self.to_string(),
            context: self.context().clone(),
        }
    }
}

/// Flat, serializable form of an [`OptimizerError`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
    pub context: ErrorContext,
}
