//! Core data model
//!
//! Defines the persisted records of the execution core:
//! - Conversations and their title provenance
//! - Blocks (one conversational round) and their status machine
//! - Block events and their metadata
//! - Usage and session statistics

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use ulid::Ulid;

/// Current wall-clock time as Unix milliseconds
#[inline]
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Conversation identifier. `0` means "not yet created".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

impl ConversationId {
    /// Placeholder id used by requests that want a new conversation
    pub const NEW: Self = Self(0);

    /// Whether this id refers to a persisted conversation
    #[inline]
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub i64);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated user identifier
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trace identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TraceId(pub Ulid);

impl TraceId {
    /// Generate new trace ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "trace-{}", self.0)
    }
}

/// How a conversation title was produced.
///
/// Governs whether auto-titling may overwrite the current title.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleSource {
    /// Placeholder title assigned at creation
    #[default]
    Default,
    /// Generated from the conversation content
    Auto,
    /// Edited by the user
    User,
}

impl TitleSource {
    /// Whether a generated title may replace a title of this source
    #[inline]
    #[must_use]
    pub fn allows_auto_title(&self) -> bool {
        !matches!(self, Self::User)
    }
}

/// Durable conversation container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub uid: String,
    pub creator: UserId,
    pub title: String,
    pub title_source: TitleSource,
    /// Handler the conversation was started with
    pub handler: String,
    pub created_ts: i64,
    pub updated_ts: i64,
}

/// Execution mode of a round, chosen once at round start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockMode {
    /// Routed through the router and orchestrator
    #[default]
    Normal,
    /// Elevated: direct local execution
    LocalExecution,
    /// Elevated: self-modification
    SelfModification,
}

impl BlockMode {
    /// Whether this mode bypasses routing
    #[inline]
    #[must_use]
    pub fn is_elevated(&self) -> bool {
        !matches!(self, Self::Normal)
    }

    /// Stable name used in logs and storage
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::LocalExecution => "local_execution",
            Self::SelfModification => "self_modification",
        }
    }
}

/// Kind of block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Ordinary chat round
    #[default]
    Message,
    /// Synthetic block produced by summarization
    ContextSeparator,
}

/// Block status.
///
/// Moves only forward: `pending → streaming → {completed, error}`.
/// Terminal states are final.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    #[default]
    Pending,
    Streaming,
    Completed,
    Error,
}

impl BlockStatus {
    /// Whether no transition may leave this status
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Re-asserting a non-terminal status is allowed (no-op).
    #[must_use]
    pub fn can_transition_to(&self, next: BlockStatus) -> bool {
        match (self, next) {
            (Self::Completed | Self::Error, _) => false,
            (Self::Pending, _) => true,
            (Self::Streaming, Self::Pending) => false,
            (Self::Streaming, _) => true,
        }
    }

    /// Stable name used in logs and storage
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed event tag shared by block events and the client stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Received,
    RoutingStart,
    RoutingEnd,
    Thinking,
    ToolUse,
    ToolResult,
    Answer,
    Error,
    Ping,
    /// Server-internal usage report, never forwarded to the client
    SessionStats,
    DecomposeStart,
    DecomposeEnd,
    Plan,
    TaskStart,
    TaskEnd,
    Aggregation,
    AggregationFallback,
    HandoffStart,
    HandoffEnd,
    HandoffFail,
    Done,
}

impl EventKind {
    /// Stable wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::RoutingStart => "routing_start",
            Self::RoutingEnd => "routing_end",
            Self::Thinking => "thinking",
            Self::ToolUse => "tool_use",
            Self::ToolResult => "tool_result",
            Self::Answer => "answer",
            Self::Error => "error",
            Self::Ping => "ping",
            Self::SessionStats => "session_stats",
            Self::DecomposeStart => "decompose_start",
            Self::DecomposeEnd => "decompose_end",
            Self::Plan => "plan",
            Self::TaskStart => "task_start",
            Self::TaskEnd => "task_end",
            Self::Aggregation => "aggregation",
            Self::AggregationFallback => "aggregation_fallback",
            Self::HandoffStart => "handoff_start",
            Self::HandoffEnd => "handoff_end",
            Self::HandoffFail => "handoff_fail",
            Self::Done => "done",
        }
    }

    /// Whether the event carries incremental answer text
    #[inline]
    #[must_use]
    pub fn is_answer(&self) -> bool {
        matches!(self, Self::Answer)
    }

    /// Whether the event is tool activity
    #[inline]
    #[must_use]
    pub fn is_tool(&self) -> bool {
        matches!(self, Self::ToolUse | Self::ToolResult)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional structured metadata attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_count: Option<u32>,
    #[serde(default)]
    pub is_error: bool,
}

impl EventMeta {
    /// Metadata describing a tool invocation
    #[must_use]
    pub fn tool(name: impl Into<String>) -> Self {
        Self {
            tool_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// With duration
    #[inline]
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// With touched file
    #[inline]
    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Mark as failed with message
    #[inline]
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.is_error = true;
        self.status = Some("error".to_string());
        self.error_msg = Some(message.into());
        self
    }
}

/// A typed, timestamped unit belonging to exactly one block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockEvent {
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    /// Unix ms; `0` means "stamp on persistence"
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<EventMeta>,
}

impl BlockEvent {
    /// Create an event stamped now
    #[must_use]
    pub fn new(kind: EventKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            timestamp: now_millis(),
            meta: None,
        }
    }

    /// With metadata
    #[inline]
    #[must_use]
    pub fn with_meta(mut self, meta: EventMeta) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// One user message within a block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInput {
    pub content: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl UserInput {
    /// Create input stamped now
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            timestamp: now_millis(),
            metadata: None,
        }
    }
}

/// Resource counters reported by handlers and summed across tasks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub thinking_duration_ms: u64,
    pub tool_duration_ms: u64,
    pub generation_duration_ms: u64,
    pub cost_usd: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_used: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub file_paths: BTreeSet<String>,
}

impl UsageStats {
    /// Sum counters and union lists from `other`
    pub fn merge(&mut self, other: &UsageStats) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
        self.thinking_duration_ms += other.thinking_duration_ms;
        self.tool_duration_ms += other.tool_duration_ms;
        self.generation_duration_ms += other.generation_duration_ms;
        self.cost_usd += other.cost_usd;
        self.tools_used.extend(other.tools_used.iter().cloned());
        self.file_paths.extend(other.file_paths.iter().cloned());
    }

    /// Total token count
    #[inline]
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Outcome flag of a round summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    #[default]
    Success,
    Error,
}

/// Final statistics of one round, persisted on the block and sent with `done`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,
    pub user_id: UserId,
    pub handler: String,
    pub total_duration_ms: u64,
    pub thinking_duration_ms: u64,
    pub tool_duration_ms: u64,
    pub generation_duration_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub total_cost_usd: f64,
    pub tool_call_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_used: Vec<String>,
    pub files_modified: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_paths: Vec<String>,
    pub status: SummaryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SessionStats {
    /// Total token count
    #[inline]
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One persisted conversational round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub uid: String,
    pub conversation_id: ConversationId,
    /// Strictly increasing within a conversation, starting at 1
    pub round_number: u32,
    pub kind: BlockKind,
    pub mode: BlockMode,
    pub user_inputs: Vec<UserInput>,
    pub assistant_content: String,
    /// Append-only, in arrival order
    pub events: Vec<BlockEvent>,
    pub session_stats: Option<SessionStats>,
    pub status: BlockStatus,
    pub error_message: Option<String>,
    pub created_ts: i64,
    pub updated_ts: i64,
}
