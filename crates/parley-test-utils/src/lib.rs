//! Testing utilities for the Parley workspace
//!
//! Shared fakes: scripted handlers, recording sinks, a concurrency probe and
//! a store whose writes can be made to fail.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_core::{
    Block, BlockEvent, BlockId, BlockStore, ChatHandler, Conversation, ConversationId,
    ConversationStore, EmitError, EventEmitter, EventKind, EventSink, HandlerError, HandlerEvent,
    HandlerRequest, InMemoryStore, NewBlock, NewConversation, StoreError, UpdateBlock,
    UpdateConversation, UsageStats, UserId, UserInput,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One step of a [`ScriptedHandler`]
#[derive(Debug, Clone)]
pub enum Step {
    Emit(HandlerEvent),
    Sleep(Duration),
    Fail(HandlerError),
    Panic(String),
    /// Block until the request is cancelled
    AwaitCancel,
}

/// Tracks how many handlers run at once
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enter(self: &Arc<Self>) -> ProbeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        ProbeGuard(Arc::clone(self))
    }

    /// Highest concurrency observed
    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

pub struct ProbeGuard(Arc<ConcurrencyProbe>);

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handler that replays a fixed script
pub struct ScriptedHandler {
    name: String,
    steps: Vec<Step>,
    usage: UsageStats,
    echo: bool,
    failures_left: AtomicU32,
    failure: Option<HandlerError>,
    probe: Option<Arc<ConcurrencyProbe>>,
    calls: AtomicUsize,
    inputs: Mutex<Vec<String>>,
}

impl ScriptedHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            usage: UsageStats::default(),
            echo: false,
            failures_left: AtomicU32::new(0),
            failure: None,
            probe: None,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn emit(self, event: HandlerEvent) -> Self {
        self.step(Step::Emit(event))
    }

    pub fn answer(self, text: impl Into<String>) -> Self {
        self.emit(HandlerEvent::answer(text))
    }

    pub fn thinking(self, text: impl Into<String>) -> Self {
        self.emit(HandlerEvent::thinking(text))
    }

    /// A tool call followed by its result
    pub fn tool(self, tool: &str, input: &str, output: &str) -> Self {
        self.emit(HandlerEvent::tool_use(tool, input))
            .emit(HandlerEvent::tool_result(tool, output))
    }

    pub fn sleep(self, duration: Duration) -> Self {
        self.step(Step::Sleep(duration))
    }

    pub fn fail(self, error: HandlerError) -> Self {
        self.step(Step::Fail(error))
    }

    pub fn panic(self, message: impl Into<String>) -> Self {
        self.step(Step::Panic(message.into()))
    }

    pub fn await_cancel(self) -> Self {
        self.step(Step::AwaitCancel)
    }

    /// Finish by answering `"<name>: <message>"`
    pub fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Usage returned on success
    pub fn usage(mut self, usage: UsageStats) -> Self {
        self.usage = usage;
        self
    }

    /// Fail the first `times` calls with `error` before running the script
    pub fn fail_first(mut self, times: u32, error: HandlerError) -> Self {
        self.failures_left = AtomicU32::new(times);
        self.failure = Some(error);
        self
    }

    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages received, in call order
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl ChatHandler for ScriptedHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        request: HandlerRequest,
        sink: EventSink,
    ) -> Result<UsageStats, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().push(request.message.clone());
        let _guard = self.probe.as_ref().map(ConcurrencyProbe::enter);

        if let Some(failure) = &self.failure {
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(failure.clone());
            }
        }

        for step in &self.steps {
            match step {
                Step::Emit(event) => sink.emit(event.clone()).await?,
                Step::Sleep(duration) => {
                    tokio::select! {
                        () = request.cancel.cancelled() => return Err(HandlerError::Cancelled),
                        () = tokio::time::sleep(*duration) => {}
                    }
                }
                Step::Fail(error) => return Err(error.clone()),
                Step::Panic(message) => panic!("{message}"),
                Step::AwaitCancel => {
                    request.cancel.cancelled().await;
                    return Err(HandlerError::Cancelled);
                }
            }
        }

        if self.echo {
            sink.emit(HandlerEvent::answer(format!("{}: {}", self.name, request.message)))
                .await?;
        }
        Ok(self.usage.clone())
    }
}

/// Event sink that records everything, optionally failing after `n` events
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<HandlerEvent>>,
    fail_after: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Accept `n` events, then report a disconnected client
    pub fn failing_after(n: usize) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            fail_after: Some(n),
        })
    }

    pub fn events(&self) -> Vec<HandlerEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    /// Contents of events of one kind, in order
    pub fn contents(&self, kind: EventKind) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.content.clone())
            .collect()
    }

    /// Parsed JSON payloads of events of one kind
    pub fn payloads(&self, kind: EventKind) -> Vec<serde_json::Value> {
        self.contents(kind)
            .iter()
            .filter_map(|c| serde_json::from_str(c).ok())
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }
}

#[async_trait]
impl EventEmitter for RecordingSink {
    async fn emit(&self, event: HandlerEvent) -> Result<(), EmitError> {
        let mut events = self.events.lock();
        if self.fail_after.is_some_and(|n| events.len() >= n) {
            return Err(EmitError::Disconnected("recording sink closed".into()));
        }
        events.push(event);
        Ok(())
    }
}

/// [`InMemoryStore`] whose writes can be switched to fail
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    fail_appends: AtomicBool,
    fail_creates: AtomicBool,
    fail_updates: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Backend("injected failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BlockStore for FlakyStore {
    async fn create_block(&self, new: NewBlock) -> Result<Block, StoreError> {
        Self::check(&self.fail_creates)?;
        self.inner.create_block(new).await
    }

    async fn get_block(&self, id: BlockId) -> Result<Block, StoreError> {
        self.inner.get_block(id).await
    }

    async fn append_event(&self, id: BlockId, event: BlockEvent) -> Result<(), StoreError> {
        Self::check(&self.fail_appends)?;
        self.inner.append_event(id, event).await
    }

    async fn append_events_batch(
        &self,
        id: BlockId,
        events: Vec<BlockEvent>,
    ) -> Result<(), StoreError> {
        Self::check(&self.fail_appends)?;
        self.inner.append_events_batch(id, events).await
    }

    async fn append_user_input(&self, id: BlockId, input: UserInput) -> Result<(), StoreError> {
        self.inner.append_user_input(id, input).await
    }

    async fn update_block(&self, id: BlockId, update: UpdateBlock) -> Result<Block, StoreError> {
        Self::check(&self.fail_updates)?;
        self.inner.update_block(id, update).await
    }

    async fn latest_block(
        &self,
        conversation: ConversationId,
    ) -> Result<Option<Block>, StoreError> {
        self.inner.latest_block(conversation).await
    }

    async fn list_blocks(&self, conversation: ConversationId) -> Result<Vec<Block>, StoreError> {
        self.inner.list_blocks(conversation).await
    }

    async fn unfinished_blocks(&self) -> Result<Vec<Block>, StoreError> {
        self.inner.unfinished_blocks().await
    }
}

#[async_trait]
impl ConversationStore for FlakyStore {
    async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<Conversation, StoreError> {
        Self::check(&self.fail_creates)?;
        self.inner.create_conversation(new).await
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation, StoreError> {
        self.inner.get_conversation(id).await
    }

    async fn update_conversation(
        &self,
        id: ConversationId,
        update: UpdateConversation,
    ) -> Result<Conversation, StoreError> {
        Self::check(&self.fail_updates)?;
        self.inner.update_conversation(id, update).await
    }

    async fn list_conversations(&self, creator: UserId) -> Result<Vec<Conversation>, StoreError> {
        self.inner.list_conversations(creator).await
    }
}

/// Usage with the given token counts
pub fn usage(input_tokens: u64, output_tokens: u64) -> UsageStats {
    UsageStats {
        input_tokens,
        output_tokens,
        ..UsageStats::default()
    }
}
