//! Lifecycle events

use parley_core::{now_millis, BlockId, ConversationId, UserId};
use serde::{Deserialize, Serialize};

/// What happened in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    ConversationStart,
    UserMessage,
    AssistantResponse,
    Separator,
    BlockCompleted,
}

impl LifecycleEventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConversationStart => "conversation_start",
            Self::UserMessage => "user_message",
            Self::AssistantResponse => "assistant_response",
            Self::Separator => "separator",
            Self::BlockCompleted => "block_completed",
        }
    }
}

impl std::fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub user_id: UserId,
    /// `ConversationId::NEW` until the conversation exists
    pub conversation_id: ConversationId,
    pub temporary: bool,
    /// Handler the round runs on
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<BlockId>,
    #[serde(default)]
    pub content: String,
    pub timestamp: i64,
}

impl LifecycleEvent {
    /// Event stamped now
    #[must_use]
    pub fn new(kind: LifecycleEventKind, user_id: UserId, conversation_id: ConversationId) -> Self {
        Self {
            kind,
            user_id,
            conversation_id,
            temporary: false,
            handler: String::new(),
            block_id: None,
            content: String::new(),
            timestamp: now_millis(),
        }
    }

    /// Start of a round
    #[must_use]
    pub fn conversation_start(
        user_id: UserId,
        conversation_id: ConversationId,
        handler: impl Into<String>,
        temporary: bool,
    ) -> Self {
        Self {
            temporary,
            handler: handler.into(),
            ..Self::new(LifecycleEventKind::ConversationStart, user_id, conversation_id)
        }
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    #[must_use]
    pub fn with_block(mut self, block_id: BlockId) -> Self {
        self.block_id = Some(block_id);
        self
    }
}
