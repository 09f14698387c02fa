//! Lifecycle bus error types

use crate::event::LifecycleEventKind;
use parley_core::StoreError;

/// Failure of one listener, or of the bus itself
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BusError {
    /// Listener exceeded its deadline; its output was discarded
    #[error("listener {index} for {kind} timed out after {timeout_ms}ms")]
    ListenerTimeout {
        kind: LifecycleEventKind,
        index: usize,
        timeout_ms: u64,
    },

    /// Listener panicked
    #[error("listener {index} for {kind} panicked: {message}")]
    ListenerPanicked {
        kind: LifecycleEventKind,
        index: usize,
        message: String,
    },

    /// Listener returned an error
    #[error("listener failed: {0}")]
    ListenerFailed(String),

    /// Publisher cancelled the event
    #[error("publish of {0} cancelled")]
    Cancelled(LifecycleEventKind),

    /// Store error inside a listener
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl BusError {
    /// Check if error is worth retrying
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ListenerTimeout { .. } => true,
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_backend_errors_are_retryable() {
        assert!(BusError::ListenerTimeout {
            kind: LifecycleEventKind::ConversationStart,
            index: 0,
            timeout_ms: 5000
        }
        .is_retryable());
        assert!(BusError::Store(StoreError::Backend("down".into())).is_retryable());
        assert!(!BusError::ListenerFailed("nope".into()).is_retryable());
    }
}
