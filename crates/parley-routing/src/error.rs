//! Error types for Parley Routing

/// Routing layer failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoutingError {
    /// The semantic classifier failed
    #[error("semantic classification failed: {0}")]
    Classifier(String),

    /// The semantic classifier answered with something unusable
    #[error("invalid classifier response: {0}")]
    InvalidVerdict(String),

    /// Weight persistence failed
    #[error("weight store error: {0}")]
    WeightStore(String),

    /// Timeout
    #[error("classification timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Cancelled
    #[error("routing cancelled")]
    Cancelled,
}

impl RoutingError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Classifier(_) | Self::Timeout { .. } | Self::WeightStore(_)
        )
    }
}
