//! Error types for Parley Core
//!
//! Provides the shared error taxonomy for:
//! - Persistence failures (blocks and conversations)
//! - Handler execution failures
//! - Event emission failures
//! - Configuration loading and validation

use crate::types::{BlockId, BlockStatus, ConversationId};

/// Persistence errors raised by [`BlockStore`](crate::store::BlockStore)
/// and [`ConversationStore`](crate::store::ConversationStore)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Block does not exist
    #[error("block not found: {0}")]
    BlockNotFound(BlockId),

    /// Conversation does not exist
    #[error("conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    /// Status update would leave a terminal state or move backwards
    #[error("invalid status transition for block {block}: {from} -> {to}")]
    InvalidTransition {
        block: BlockId,
        from: BlockStatus,
        to: BlockStatus,
    },

    /// Block is terminal and accepts no more events
    #[error("block {0} is closed")]
    BlockClosed(BlockId),

    /// Underlying storage failed
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

/// Failure to deliver a handler event to its sink
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    /// The client side of the stream went away
    #[error("client disconnected: {0}")]
    Disconnected(String),

    /// The sink no longer accepts events
    #[error("event sink closed")]
    Closed,
}

/// Handler execution errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HandlerError {
    /// Permanent failure
    #[error("handler failed: {0}")]
    Failed(String),

    /// Failure that may succeed on retry (rate limits, flaky upstream)
    #[error("transient failure: {0}")]
    Transient(String),

    /// The handler lacks a capability the request needs
    #[error("unable to handle request: missing capability '{capability}'")]
    Inability {
        /// Capability another handler might provide
        capability: String,
        /// Partial explanation from the handler
        reason: String,
    },

    /// No handler registered under the requested name
    #[error("unknown handler: {0}")]
    UnknownHandler(String),

    /// Event delivery failed
    #[error("emit failed: {0}")]
    Emit(#[from] EmitError),

    /// Timeout
    #[error("operation timed out after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Cancelled
    #[error("operation cancelled")]
    Cancelled,
}

impl HandlerError {
    /// Check if error is worth retrying
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout { .. })
    }

    /// Capability this error asks to hand off to, if any
    #[inline]
    #[must_use]
    pub fn missing_capability(&self) -> Option<&str> {
        match self {
            Self::Inability { capability, .. } => Some(capability),
            _ => None,
        }
    }

    /// Create an inability error
    #[inline]
    pub fn inability(capability: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Inability {
            capability: capability.into(),
            reason: reason.into(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML did not parse
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config value '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(HandlerError::Transient("429".into()).is_transient());
        assert!(HandlerError::Timeout { duration_secs: 3 }.is_transient());
        assert!(!HandlerError::Failed("bad input".into()).is_transient());
        assert!(!HandlerError::Cancelled.is_transient());
    }

    #[test]
    fn inability_exposes_capability() {
        let err = HandlerError::inability("calendar", "no schedule access");
        assert_eq!(err.missing_capability(), Some("calendar"));
        assert_eq!(HandlerError::Failed("x".into()).missing_capability(), None);
    }

    #[test]
    fn transition_error_message() {
        let err = StoreError::InvalidTransition {
            block: BlockId(7),
            from: BlockStatus::Completed,
            to: BlockStatus::Streaming,
        };
        assert_eq!(
            err.to_string(),
            "invalid status transition for block 7: completed -> streaming"
        );
        assert!(!err.is_retryable());
    }
}
