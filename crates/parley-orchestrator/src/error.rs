//! Orchestrator error types

/// Errors raised while planning, validating or aggregating a task plan
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestratorError {
    /// The plan has no tasks
    #[error("plan has no tasks")]
    EmptyPlan,

    /// Two tasks share an id
    #[error("duplicate task id: {0}")]
    DuplicateTask(String),

    /// A task depends on an id that is not in the plan
    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    /// Dependencies form a cycle
    #[error("dependency cycle involving task {0}")]
    CycleDetected(String),

    /// A task names an expert that is not registered
    #[error("task {task} names unknown expert {expert}")]
    UnknownExpert { task: String, expert: String },

    /// A plan reply could not be parsed
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// The planning service failed
    #[error("planner failed: {0}")]
    Planner(String),

    /// The synthesis service failed
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// A `{{tN.result}}` reference could not be resolved
    #[error("unresolved reference to task {0}")]
    UnresolvedReference(String),

    /// No task produced a result
    #[error("no task completed: {0}")]
    NothingCompleted(String),

    /// Cancelled
    #[error("orchestration cancelled")]
    Cancelled,
}

impl OrchestratorError {
    /// Check if error is worth retrying
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Planner(_) | Self::Synthesis(_))
    }

    /// Whether the plan itself is malformed
    #[inline]
    #[must_use]
    pub fn is_invalid_plan(&self) -> bool {
        matches!(
            self,
            Self::EmptyPlan
                | Self::DuplicateTask(_)
                | Self::UnknownDependency { .. }
                | Self::CycleDetected(_)
                | Self::UnknownExpert { .. }
                | Self::InvalidPlan(_)
        )
    }
}

impl From<OrchestratorError> for parley_core::HandlerError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::Cancelled => Self::Cancelled,
            other => Self::Failed(other.to_string()),
        }
    }
}
