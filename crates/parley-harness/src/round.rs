//! Request-scoped state of one chat round
//!
//! [`RoundState`] collects what the summary needs while events flow,
//! [`StreamGate`] serializes writes to the client stream, and
//! [`RoundEmitter`] is the sink handed to the handler.

use crate::request::{ChatResponse, ChatStream};
use async_trait::async_trait;
use parking_lot::Mutex;
use parley_core::{
    BlockEvent, BlockId, EmitError, EventEmitter, EventKind, HandlerEvent, UsageStats,
};
use parley_stream::BlockManager;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Counters of one round, updated by every handler event
#[derive(Debug)]
pub struct RoundState {
    started: Instant,
    last_activity: Mutex<Instant>,
    counts: Mutex<HashMap<EventKind, usize>>,
    tools: Mutex<Vec<String>>,
    files: Mutex<BTreeSet<String>>,
    content: Mutex<String>,
    reported: Mutex<UsageStats>,
}

impl RoundState {
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_activity: Mutex::new(now),
            counts: Mutex::new(HashMap::new()),
            tools: Mutex::new(Vec::new()),
            files: Mutex::new(BTreeSet::new()),
            content: Mutex::new(String::new()),
            reported: Mutex::new(UsageStats::default()),
        }
    }

    /// Time since the round began
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time since the last real event
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Account for one handler event
    pub fn record(&self, event: &HandlerEvent) {
        *self.counts.lock().entry(event.kind).or_default() += 1;

        if event.kind == EventKind::ToolUse {
            if let Some(tool) = event.tool_name() {
                self.tools.lock().push(tool.to_string());
            }
        }
        if let Some(path) = event.meta.as_ref().and_then(|m| m.file_path.as_deref()) {
            self.files.lock().insert(path.to_string());
        }
        if event.kind.is_answer() {
            self.content.lock().push_str(&event.content);
        }
    }

    /// Fold in a `session_stats` report
    pub fn absorb_usage(&self, usage: &UsageStats) {
        self.reported.lock().merge(usage);
    }

    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.counts.lock().get(&kind).copied().unwrap_or_default()
    }

    /// Tool names in call order
    #[must_use]
    pub fn tools(&self) -> Vec<String> {
        self.tools.lock().clone()
    }

    #[must_use]
    pub fn files(&self) -> BTreeSet<String> {
        self.files.lock().clone()
    }

    /// Concatenated answer fragments
    #[must_use]
    pub fn content(&self) -> String {
        self.content.lock().clone()
    }

    /// Usage from `session_stats` events
    #[must_use]
    pub fn reported_usage(&self) -> UsageStats {
        self.reported.lock().clone()
    }
}

impl Default for RoundState {
    fn default() -> Self {
        Self::new()
    }
}

/// Client stream guarded so concurrent writers never interleave
pub struct StreamGate {
    stream: Arc<dyn ChatStream>,
    lock: tokio::sync::Mutex<()>,
}

impl StreamGate {
    #[must_use]
    pub fn new(stream: Arc<dyn ChatStream>) -> Self {
        Self {
            stream,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn send(&self, response: ChatResponse) -> Result<(), EmitError> {
        let _guard = self.lock.lock().await;
        self.stream.send(response).await
    }

    /// Send and only log a failure
    pub async fn send_best_effort(&self, response: ChatResponse) {
        let kind = response.kind;
        if let Err(e) = self.send(response).await {
            debug!(%kind, error = %e, "client send failed");
        }
    }
}

impl std::fmt::Debug for StreamGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamGate").finish_non_exhaustive()
    }
}

/// Where a round persists its events
#[derive(Debug, Clone)]
pub struct BlockTarget {
    pub manager: BlockManager,
    pub block_id: BlockId,
}

/// Sink given to the handler of a round
#[derive(Debug)]
pub struct RoundEmitter {
    gate: Arc<StreamGate>,
    state: Arc<RoundState>,
    block: Option<BlockTarget>,
}

impl RoundEmitter {
    #[must_use]
    pub fn new(gate: Arc<StreamGate>, state: Arc<RoundState>, block: Option<BlockTarget>) -> Self {
        Self { gate, state, block }
    }

    #[must_use]
    pub fn block_id(&self) -> Option<BlockId> {
        self.block.as_ref().map(|b| b.block_id)
    }

    /// Enqueue on the block's serializer; failures are counted, not raised
    pub async fn persist(&self, event: &HandlerEvent) {
        let Some(target) = &self.block else {
            return;
        };
        let mut record = BlockEvent::new(event.kind, event.content.clone());
        record.meta = event.meta.clone();
        if let Err(e) = target.manager.append_event(target.block_id, record).await {
            warn!(block_id = %target.block_id, kind = %event.kind, error = %e, "event not persisted");
            metrics::counter!("parley.event_persistence_failure").increment(1);
        }
    }
}

#[async_trait]
impl EventEmitter for RoundEmitter {
    async fn emit(&self, event: HandlerEvent) -> Result<(), EmitError> {
        self.state.touch();

        if event.kind == EventKind::SessionStats {
            match serde_json::from_str::<UsageStats>(&event.content) {
                Ok(usage) => self.state.absorb_usage(&usage),
                Err(e) => warn!(error = %e, "unreadable session_stats payload"),
            }
            return Ok(());
        }

        self.state.record(&event);
        self.persist(&event).await;
        self.gate
            .send(ChatResponse::from_handler(event, self.block_id()))
            .await
    }
}
