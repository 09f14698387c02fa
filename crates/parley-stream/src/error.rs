//! Error types for Parley Stream

use parley_core::{BlockId, StoreError};

/// Event serialization and block lifecycle errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    /// The block's serializer no longer accepts events
    #[error("serializer stopped for block {0}")]
    Stopped(BlockId),

    /// The worker did not drain in time
    #[error("serializer for block {block} did not stop within {timeout_ms}ms")]
    StopTimeout { block: BlockId, timeout_ms: u64 },

    /// Worker task panicked
    #[error("serializer worker for block {0} panicked")]
    WorkerPanicked(BlockId),

    /// Persistence failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StreamError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_retryable(),
            _ => false,
        }
    }
}
