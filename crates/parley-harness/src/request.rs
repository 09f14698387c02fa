//! Client-facing request, response and stream contracts

use async_trait::async_trait;
use parley_core::{
    BlockId, BlockMode, ConversationId, EmitError, EventKind, EventMeta, HandlerEvent,
    SessionStats, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which handler a round should run on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerChoice {
    /// Let the router decide
    #[default]
    Auto,
    Named(String),
}

impl HandlerChoice {
    /// `auto` (or empty) selects routing, anything else names a handler
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
            Self::Auto
        } else {
            Self::Named(raw.to_string())
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Auto => "auto",
            Self::Named(name) => name,
        }
    }
}

/// One chat round as submitted by a client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Prior turns, oldest first
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(default)]
    pub handler: HandlerChoice,
    /// `ConversationId::NEW` asks for a new conversation
    #[serde(default)]
    pub conversation_id: ConversationId,
    /// Nothing is persisted for temporary conversations
    #[serde(default)]
    pub temporary: bool,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub mode: BlockMode,
    pub user_id: UserId,
    #[serde(default)]
    pub device_context: BTreeMap<String, String>,
}

impl ChatRequest {
    /// Auto-routed request in a new conversation
    #[must_use]
    pub fn new(user_id: UserId, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            user_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_handler(mut self, name: &str) -> Self {
        self.handler = HandlerChoice::parse(name);
        self
    }

    #[must_use]
    pub fn in_conversation(mut self, id: ConversationId) -> Self {
        self.conversation_id = id;
        self
    }

    #[must_use]
    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: BlockMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    #[must_use]
    pub fn with_device_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.device_context.insert(key.into(), value.into());
        self
    }
}

/// One message on the client stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub kind: EventKind,
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<EventMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<BlockId>,
    /// Set only on the terminal message
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionStats>,
}

impl ChatResponse {
    #[must_use]
    pub fn event(kind: EventKind, data: impl Into<String>, block_id: Option<BlockId>) -> Self {
        Self {
            kind,
            data: data.into(),
            meta: None,
            block_id,
            done: false,
            summary: None,
        }
    }

    /// Forwarded handler event
    #[must_use]
    pub fn from_handler(event: HandlerEvent, block_id: Option<BlockId>) -> Self {
        Self {
            meta: event.meta,
            ..Self::event(event.kind, event.content, block_id)
        }
    }

    /// Structured payload
    #[must_use]
    pub fn json(kind: EventKind, payload: &serde_json::Value, block_id: Option<BlockId>) -> Self {
        Self::event(kind, payload.to_string(), block_id)
    }

    /// Keep-alive
    #[must_use]
    pub fn ping(block_id: Option<BlockId>) -> Self {
        Self::event(EventKind::Ping, ".", block_id)
    }

    /// Terminal message carrying the round summary
    #[must_use]
    pub fn done(summary: SessionStats, block_id: Option<BlockId>) -> Self {
        Self {
            done: true,
            summary: Some(summary),
            ..Self::event(EventKind::Done, "", block_id)
        }
    }
}

/// Long-lived connection to the client
#[async_trait]
pub trait ChatStream: Send + Sync {
    async fn send(&self, response: ChatResponse) -> Result<(), EmitError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_choice_parsing() {
        assert_eq!(HandlerChoice::parse(""), HandlerChoice::Auto);
        assert_eq!(HandlerChoice::parse(" AUTO "), HandlerChoice::Auto);
        assert_eq!(
            HandlerChoice::parse("schedule"),
            HandlerChoice::Named("schedule".into())
        );
        assert_eq!(HandlerChoice::Named("memo".into()).as_str(), "memo");
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let request: ChatRequest =
            serde_json::from_str(r#"{"message":"hi","user_id":3}"#).unwrap();
        assert_eq!(request.handler, HandlerChoice::Auto);
        assert_eq!(request.conversation_id, ConversationId::NEW);
        assert_eq!(request.mode, BlockMode::Normal);
        assert!(!request.temporary);
    }

    #[test]
    fn done_carries_summary() {
        let done = ChatResponse::done(SessionStats::default(), Some(BlockId(9)));
        assert!(done.done);
        assert_eq!(done.kind, EventKind::Done);
        assert_eq!(done.block_id, Some(BlockId(9)));
        assert!(done.summary.is_some());
    }
}
