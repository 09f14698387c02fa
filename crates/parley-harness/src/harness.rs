//! Streaming execution of one chat round
//!
//! `ChatHarness::handle` picks a handler (elevated bypass, explicit name, or
//! the router with the orchestrator behind it), opens the round's block,
//! streams handler events to the client and the block, keeps the connection
//! alive, and closes the block before the terminal `done` is sent.

use crate::error::HarnessError;
use crate::heartbeat;
use crate::request::{ChatRequest, ChatResponse, ChatStream, HandlerChoice};
use crate::round::{BlockTarget, RoundEmitter, RoundState, StreamGate};
use crate::summary::{self, SummaryContext};
use parley_core::{
    BlockId, BlockMode, ChatHandler, ConversationId, EventKind, EventSink, HandlerError,
    HandlerEvent, HandlerRegistry, HandlerRequest, HarnessConfig, RouterConfig, SessionStats,
    UsageStats,
};
use parley_lifecycle::{LifecycleBus, LifecycleEvent, LifecycleEventKind};
use parley_orchestrator::Orchestrator;
use parley_routing::{LastRoutes, RouteRequest, Router};
use parley_stream::BlockManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs chat rounds end to end
#[derive(Clone)]
pub struct ChatHarness {
    registry: Arc<HandlerRegistry>,
    config: HarnessConfig,
    router: Option<Arc<Router>>,
    last_routes: Arc<LastRoutes>,
    orchestrator: Option<Arc<Orchestrator>>,
    blocks: Option<BlockManager>,
    bus: Option<Arc<LifecycleBus>>,
    elevated: HashMap<BlockMode, Arc<dyn ChatHandler>>,
}

impl ChatHarness {
    /// Harness over `registry` with no router, orchestrator, store or bus
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>, config: HarnessConfig) -> Self {
        Self {
            registry,
            config,
            router: None,
            last_routes: Arc::new(LastRoutes::new(RouterConfig::default().last_route_ttl())),
            orchestrator: None,
            blocks: None,
            bus: None,
            elevated: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_router(mut self, router: Arc<Router>) -> Self {
        self.last_routes = Arc::new(LastRoutes::new(router.config().last_route_ttl()));
        self.router = Some(router);
        self
    }

    #[must_use]
    pub fn with_orchestrator(mut self, orchestrator: Orchestrator) -> Self {
        self.orchestrator = Some(Arc::new(orchestrator));
        self
    }

    /// Persist rounds as blocks
    #[must_use]
    pub fn with_block_manager(mut self, blocks: BlockManager) -> Self {
        self.blocks = Some(blocks);
        self
    }

    #[must_use]
    pub fn with_bus(mut self, bus: Arc<LifecycleBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Serve an elevated mode with `handler`, bypassing routing
    #[must_use]
    pub fn with_elevated(mut self, mode: BlockMode, handler: Arc<dyn ChatHandler>) -> Self {
        self.elevated.insert(mode, handler);
        self
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run one round, streaming to `stream`.
    ///
    /// Returns the round summary. A handler failure still closes the block
    /// and sends `done`; it is returned even when `done` could not be sent.
    pub async fn handle(
        &self,
        request: ChatRequest,
        stream: Arc<dyn ChatStream>,
        cancel: CancellationToken,
    ) -> Result<SessionStats, HarnessError> {
        let gate = Arc::new(StreamGate::new(stream));
        let state = Arc::new(RoundState::new());

        let (conversation_id, handler) = if request.mode.is_elevated() {
            let handler = self
                .elevated
                .get(&request.mode)
                .cloned()
                .ok_or(HarnessError::NoElevatedHandler(request.mode.as_str()))?;
            debug!(mode = request.mode.as_str(), handler = handler.name(), "elevated bypass");
            (self.resolve_conversation(&request, &cancel).await, handler)
        } else {
            gate.send_best_effort(ChatResponse::event(EventKind::Received, "", None))
                .await;
            let conversation_id = self.resolve_conversation(&request, &cancel).await;
            let handler = self
                .select_handler(&request, conversation_id, &gate, &cancel)
                .await?;
            (conversation_id, handler)
        };

        self.run_round(&request, conversation_id, handler, gate, state, cancel)
            .await
    }

    /// Conversation the round belongs to; may create it through the bus
    async fn resolve_conversation(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> ConversationId {
        if request.temporary {
            return request.conversation_id;
        }
        let Some(bus) = &self.bus else {
            return request.conversation_id;
        };

        let event = LifecycleEvent::conversation_start(
            request.user_id,
            request.conversation_id,
            request.handler.as_str(),
            request.temporary,
        );
        let outcome = bus.publish(event, cancel).await;
        if let Some(e) = &outcome.first_error {
            warn!(user_id = %request.user_id, error = %e, "conversation_start listener failed");
        }

        if request.conversation_id.is_persisted() {
            return request.conversation_id;
        }
        outcome
            .results
            .values()
            .find_map(serde_json::Value::as_i64)
            .map(ConversationId)
            .filter(ConversationId::is_persisted)
            .unwrap_or(request.conversation_id)
    }

    async fn select_handler(
        &self,
        request: &ChatRequest,
        conversation_id: ConversationId,
        gate: &StreamGate,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn ChatHandler>, HarnessError> {
        match &request.handler {
            HandlerChoice::Named(name) => Ok(self.registry.require(name)?),
            HandlerChoice::Auto => self.route(request, conversation_id, gate, cancel).await,
        }
    }

    async fn route(
        &self,
        request: &ChatRequest,
        conversation_id: ConversationId,
        gate: &StreamGate,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn ChatHandler>, HarnessError> {
        let started = Instant::now();
        gate.send_best_effort(ChatResponse::event(EventKind::RoutingStart, "", None))
            .await;

        let routed = match &self.router {
            Some(router) => {
                let mut route_request = RouteRequest::new(request.user_id, request.message.clone())
                    .with_history(request.history.clone());
                if let Some(last) = self.last_routes.get(conversation_id) {
                    route_request = route_request.with_last_route(last);
                }
                match router.route(&route_request, cancel).await {
                    Ok(result) if result.is_resolved() => {
                        let handler = result
                            .target
                            .as_deref()
                            .and_then(|target| self.registry.get(target));
                        if handler.is_some() {
                            self.last_routes.set(conversation_id, &result);
                        }
                        handler
                    }
                    Ok(_) => None,
                    Err(e) => {
                        warn!(user_id = %request.user_id, error = %e, "routing failed, decomposing");
                        None
                    }
                }
            }
            None => None,
        };

        let needs_orchestration = routed.is_none();
        let handler = match routed {
            Some(handler) => handler,
            None => self.decomposition_handler()?,
        };

        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            user_id = %request.user_id,
            handler = handler.name(),
            needs_orchestration,
            duration_ms = elapsed,
            "routed"
        );
        gate.send_best_effort(ChatResponse::json(
            EventKind::RoutingEnd,
            &serde_json::json!({
                "handler": handler.name(),
                "needs_orchestration": needs_orchestration,
                "duration_ms": elapsed,
            }),
            None,
        ))
        .await;
        Ok(handler)
    }

    fn decomposition_handler(&self) -> Result<Arc<dyn ChatHandler>, HandlerError> {
        match &self.orchestrator {
            Some(orchestrator) => Ok(Arc::clone(orchestrator) as Arc<dyn ChatHandler>),
            None => self.registry.require(&self.config.default_handler),
        }
    }

    async fn open_block(&self, request: &ChatRequest, conversation_id: ConversationId) -> Option<BlockTarget> {
        let manager = self.blocks.as_ref()?;
        if request.temporary || !conversation_id.is_persisted() {
            return None;
        }

        let block = match manager
            .create_block_for_chat(conversation_id, &request.message, request.mode)
            .await
        {
            Ok(block) => block,
            Err(e) => {
                warn!(conversation = %conversation_id, error = %e, "block creation failed, continuing without persistence");
                return None;
            }
        };
        if let Err(e) = manager.mark_streaming(block.id).await {
            warn!(block_id = %block.id, error = %e, "failed to mark block streaming");
        }
        Some(BlockTarget {
            manager: manager.clone(),
            block_id: block.id,
        })
    }

    async fn run_round(
        &self,
        request: &ChatRequest,
        conversation_id: ConversationId,
        handler: Arc<dyn ChatHandler>,
        gate: Arc<StreamGate>,
        state: Arc<RoundState>,
        cancel: CancellationToken,
    ) -> Result<SessionStats, HarnessError> {
        let block = self.open_block(request, conversation_id).await;
        let block_id = block.as_ref().map(|b| b.block_id);
        let emitter = Arc::new(RoundEmitter::new(gate.clone(), state.clone(), block.clone()));

        let stop = cancel.child_token();
        let pings = heartbeat::spawn(
            gate.clone(),
            state.clone(),
            block_id,
            self.config.heartbeat_interval(),
            stop.clone(),
        );

        let mut handler_request = HandlerRequest::new(request.message.clone(), request.user_id)
            .with_history(request.history.clone())
            .with_cancel(cancel.clone());
        handler_request.timezone.clone_from(&request.timezone);

        let handler_name = handler.name().to_string();
        let result = execute(handler, handler_request, emitter.clone(), &cancel).await;

        stop.cancel();
        match pings.await {
            Ok(sent) => debug!(pings = sent, "heartbeat stopped"),
            Err(e) => warn!(error = %e, "heartbeat task failed"),
        }

        let usage = match &result {
            Ok(usage) if !usage.is_empty() => usage.clone(),
            _ => state.reported_usage(),
        };
        let error = result.as_ref().err();
        let summary = summary::build(
            &state,
            &SummaryContext {
                conversation_id,
                user_id: request.user_id,
                handler: &handler_name,
                usage: &usage,
                error,
            },
        );

        if let Some(e) = error {
            warn!(handler = %handler_name, error = %e, "handler failed");
            let event = HandlerEvent::new(EventKind::Error, e.to_string());
            emitter.persist(&event).await;
            gate.send_best_effort(ChatResponse::from_handler(event, block_id))
                .await;
        }

        if let Some(target) = &block {
            self.close_block(target, &state, &summary, error).await;
        }

        let done = gate.send(ChatResponse::done(summary.clone(), block_id)).await;
        if let Err(e) = &done {
            warn!(error = %e, "failed to send done");
        }

        if result.is_ok() {
            if let (Some(bus), Some(id)) = (&self.bus, block_id) {
                publish_completed(bus, request, conversation_id, &handler_name, id, state.content());
            }
        }

        info!(
            handler = %handler_name,
            conversation = %conversation_id,
            duration_ms = summary.total_duration_ms,
            tokens = summary.total_tokens(),
            tool_calls = summary.tool_call_count,
            status = ?summary.status,
            "round finished"
        );

        match (result, done) {
            (Err(e), _) => Err(HarnessError::Handler(e)),
            (Ok(_), Err(e)) => Err(HarnessError::Transport(e)),
            (Ok(_), Ok(())) => Ok(summary),
        }
    }

    async fn close_block(
        &self,
        target: &BlockTarget,
        state: &RoundState,
        summary: &SessionStats,
        error: Option<&HandlerError>,
    ) {
        let closed = match error {
            None => {
                target
                    .manager
                    .complete(target.block_id, state.content(), Some(summary.clone()))
                    .await
            }
            Some(e) => {
                target
                    .manager
                    .mark_error(target.block_id, &e.to_string(), Some(summary.clone()))
                    .await
            }
        };
        if let Err(e) = closed {
            warn!(block_id = %target.block_id, error = %e, "failed to close block");
        }
    }
}

/// Run the handler in its own task so a panic still ends the round cleanly
async fn execute(
    handler: Arc<dyn ChatHandler>,
    request: HandlerRequest,
    sink: Arc<RoundEmitter>,
    cancel: &CancellationToken,
) -> Result<UsageStats, HandlerError> {
    let sink: EventSink = sink;
    let mut task = tokio::spawn(async move { handler.execute(request, sink).await });

    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            task.abort();
            Err(HandlerError::Cancelled)
        }
        joined = &mut task => match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(HandlerError::Failed(format!("handler panicked: {e}"))),
            Err(_) => Err(HandlerError::Cancelled),
        },
    }
}

fn publish_completed(
    bus: &Arc<LifecycleBus>,
    request: &ChatRequest,
    conversation_id: ConversationId,
    handler: &str,
    block_id: BlockId,
    content: String,
) {
    if bus.listener_count(LifecycleEventKind::BlockCompleted) == 0 {
        return;
    }
    let mut event = LifecycleEvent::new(LifecycleEventKind::BlockCompleted, request.user_id, conversation_id)
        .with_block(block_id)
        .with_content(content);
    event.handler = handler.to_string();

    let bus = Arc::clone(bus);
    tokio::spawn(async move {
        let outcome = bus.publish(event, &CancellationToken::new()).await;
        if let Some(e) = outcome.first_error {
            warn!(block_id = %block_id, error = %e, "block_completed listener failed");
        }
    });
}

impl std::fmt::Debug for ChatHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let elevated: Vec<&str> = self.elevated.keys().map(BlockMode::as_str).collect();
        f.debug_struct("ChatHarness")
            .field("handlers", &self.registry.names().collect::<Vec<_>>())
            .field("router", &self.router.is_some())
            .field("sticky_routes", &self.last_routes.len())
            .field("orchestrator", &self.orchestrator.is_some())
            .field("blocks", &self.blocks.is_some())
            .field("bus", &self.bus.is_some())
            .field("elevated", &elevated)
            .field("config", &self.config)
            .finish()
    }
}
