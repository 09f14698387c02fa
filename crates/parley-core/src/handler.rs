//! Handler contracts
//!
//! - [`ChatHandler`]: anything that answers a message (domain experts,
//!   the orchestrator, elevated executors)
//! - [`EventEmitter`]: where a handler pushes its events
//! - [`HandlerRegistry`]: named handlers plus their expert profiles

use crate::error::{EmitError, HandlerError};
use crate::types::{EventKind, EventMeta, UsageStats, UserId};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One event produced by a handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerEvent {
    pub kind: EventKind,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<EventMeta>,
}

impl HandlerEvent {
    /// Create an event
    #[must_use]
    pub fn new(kind: EventKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            meta: None,
        }
    }

    /// Answer fragment
    #[must_use]
    pub fn answer(content: impl Into<String>) -> Self {
        Self::new(EventKind::Answer, content)
    }

    /// Reasoning step
    #[must_use]
    pub fn thinking(content: impl Into<String>) -> Self {
        Self::new(EventKind::Thinking, content)
    }

    /// Tool invocation
    #[must_use]
    pub fn tool_use(tool: impl Into<String>, input: impl Into<String>) -> Self {
        Self::new(EventKind::ToolUse, input).with_meta(EventMeta::tool(tool))
    }

    /// Tool output
    #[must_use]
    pub fn tool_result(tool: impl Into<String>, output: impl Into<String>) -> Self {
        Self::new(EventKind::ToolResult, output).with_meta(EventMeta::tool(tool))
    }

    /// Usage report, consumed by the harness and never forwarded
    #[must_use]
    pub fn session_stats(usage: &UsageStats) -> Self {
        Self::new(
            EventKind::SessionStats,
            serde_json::to_string(usage).unwrap_or_default(),
        )
    }

    /// Structured JSON payload
    #[must_use]
    pub fn json(kind: EventKind, payload: &serde_json::Value) -> Self {
        Self::new(kind, payload.to_string())
    }

    /// With metadata
    #[inline]
    #[must_use]
    pub fn with_meta(mut self, meta: EventMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Tool name carried in the metadata
    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|m| m.tool_name.as_deref())
    }
}

/// Sink for handler events
#[async_trait]
pub trait EventEmitter: Send + Sync {
    /// Deliver one event
    async fn emit(&self, event: HandlerEvent) -> Result<(), EmitError>;
}

/// Shared emitter handle
pub type EventSink = Arc<dyn EventEmitter>;

/// Input of one handler execution
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    pub message: String,
    /// Prior turns, oldest first
    pub history: Vec<String>,
    pub user_id: UserId,
    pub timezone: Option<String>,
    pub cancel: CancellationToken,
}

impl HandlerRequest {
    /// Request with no history
    #[must_use]
    pub fn new(message: impl Into<String>, user_id: UserId) -> Self {
        Self {
            message: message.into(),
            history: Vec::new(),
            user_id,
            timezone: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Same context, different message
    #[must_use]
    pub fn with_message(&self, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..self.clone()
        }
    }

    /// With cancellation token
    #[inline]
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// With history
    #[inline]
    #[must_use]
    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.history = history;
        self
    }
}

/// A component that answers messages
#[async_trait]
pub trait ChatHandler: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Run to completion, streaming events into `sink`
    async fn execute(
        &self,
        request: HandlerRequest,
        sink: EventSink,
    ) -> Result<UsageStats, HandlerError>;
}

/// What an expert handler can do, used for planning and handoff
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpertProfile {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Lower-cased words that point a clause at this expert
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl ExpertProfile {
    /// Profile with a name and description
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// With capabilities
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// With keywords
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords
            .into_iter()
            .map(|k| k.into().to_lowercase())
            .collect();
        self
    }

    /// Whether the expert advertises `capability`
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.eq_ignore_ascii_case(capability))
    }
}

struct Registered {
    handler: Arc<dyn ChatHandler>,
    profile: Option<ExpertProfile>,
}

/// Named handlers, in registration order
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: IndexMap<String, Registered>,
}

impl HandlerRegistry {
    /// Create empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own name
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn ChatHandler>) -> Self {
        self.insert(handler, None);
        self
    }

    /// Register a handler that also acts as an orchestration expert
    #[must_use]
    pub fn with_expert(mut self, handler: Arc<dyn ChatHandler>, profile: ExpertProfile) -> Self {
        self.insert(handler, Some(profile));
        self
    }

    fn insert(&mut self, handler: Arc<dyn ChatHandler>, profile: Option<ExpertProfile>) {
        let name = handler.name().to_string();
        if self.handlers.contains_key(&name) {
            tracing::warn!(handler = %name, "replacing registered handler");
        }
        self.handlers.insert(name, Registered { handler, profile });
    }

    /// Look up a handler
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ChatHandler>> {
        self.handlers.get(name).map(|r| Arc::clone(&r.handler))
    }

    /// Look up a handler or fail with [`HandlerError::UnknownHandler`]
    pub fn require(&self, name: &str) -> Result<Arc<dyn ChatHandler>, HandlerError> {
        self.get(name)
            .ok_or_else(|| HandlerError::UnknownHandler(name.to_string()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Profiles of handlers registered as experts
    pub fn experts(&self) -> impl Iterator<Item = &ExpertProfile> {
        self.handlers.values().filter_map(|r| r.profile.as_ref())
    }

    /// Profile of one expert
    #[must_use]
    pub fn profile(&self, name: &str) -> Option<&ExpertProfile> {
        self.handlers.get(name).and_then(|r| r.profile.as_ref())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
