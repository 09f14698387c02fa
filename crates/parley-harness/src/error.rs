//! Error types for Parley Harness

use parley_core::{EmitError, HandlerError};

/// Failure of one chat round
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HarnessError {
    /// Elevated mode requested but nothing serves it
    #[error("no handler registered for elevated mode '{0}'")]
    NoElevatedHandler(&'static str),

    /// The handler failed; the round was still closed and summarized
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// The client stream rejected the terminal event
    #[error("client stream failed: {0}")]
    Transport(#[from] EmitError),
}

impl HarnessError {
    /// Check if the round may succeed when retried
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Handler(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether the client went away
    #[inline]
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
