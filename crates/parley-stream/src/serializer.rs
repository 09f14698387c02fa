//! Per-block event serialization
//!
//! Every block gets one ordering worker that is the sole writer of that
//! block's events:
//! - Producers enqueue into a bounded queue; enqueue awaits capacity
//! - The worker persists commands in arrival order
//! - A batch is one command and one store write
//! - Stop closes the queue, drains what was enqueued, then exits
//!
//! [`SerializerRegistry`] owns the workers, keyed by block id, and reclaims
//! idle ones. A released block is remembered as closed until the next sweep
//! past the stale threshold, so late producers cannot revive its worker.

use crate::error::StreamError;
use dashmap::DashMap;
use parking_lot::Mutex;
use parley_core::{BlockEvent, BlockId, BlockStore, SerializerConfig, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Commands processed by a block's worker
#[derive(Debug)]
enum Command {
    Append(BlockEvent),
    AppendBatch(Vec<BlockEvent>),
    /// Acknowledged once every earlier command was persisted
    Flush(oneshot::Sender<()>),
}

/// Ordering worker handle for one block
#[derive(Debug)]
pub struct EventSerializer {
    block_id: BlockId,
    sender: mpsc::Sender<Command>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    last_activity: Mutex<Instant>,
    stopped: AtomicBool,
    stop_timeout: Duration,
}

impl EventSerializer {
    /// Spawn a worker for `block_id` writing into `store`
    #[must_use]
    pub fn spawn(block_id: BlockId, store: Arc<dyn BlockStore>, config: &SerializerConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(serializer_task(
            block_id,
            store,
            receiver,
            shutdown.clone(),
        ));

        Self {
            block_id,
            sender,
            shutdown,
            worker: Mutex::new(Some(worker)),
            last_activity: Mutex::new(Instant::now()),
            stopped: AtomicBool::new(false),
            stop_timeout: config.stop_timeout(),
        }
    }

    #[inline]
    #[must_use]
    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    /// Enqueue one event, waiting for queue capacity
    pub async fn append(&self, event: BlockEvent) -> Result<(), StreamError> {
        self.enqueue(Command::Append(event)).await
    }

    /// Enqueue events that are persisted together, in order
    pub async fn append_batch(&self, events: Vec<BlockEvent>) -> Result<(), StreamError> {
        if events.is_empty() {
            return Ok(());
        }
        self.enqueue(Command::AppendBatch(events)).await
    }

    /// Wait until everything enqueued so far has been written
    pub async fn flush(&self) -> Result<(), StreamError> {
        let (ack, done) = oneshot::channel();
        self.enqueue(Command::Flush(ack)).await?;
        done.await.map_err(|_| StreamError::Stopped(self.block_id))
    }

    async fn enqueue(&self, command: Command) -> Result<(), StreamError> {
        if self.is_stopped() {
            return Err(StreamError::Stopped(self.block_id));
        }
        self.touch();
        self.sender
            .send(command)
            .await
            .map_err(|_| StreamError::Stopped(self.block_id))
    }

    /// Stop accepting events, drain the queue and wait for the worker
    pub async fn stop(&self) -> Result<(), StreamError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.cancel();

        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.stop_timeout, worker).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) if err.is_panic() => Err(StreamError::WorkerPanicked(self.block_id)),
            Ok(Err(_)) => Ok(()),
            Err(_) => {
                tracing::warn!(
                    block_id = %self.block_id,
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "serializer did not drain before timeout"
                );
                Err(StreamError::StopTimeout {
                    block: self.block_id,
                    timeout_ms: self.stop_timeout.as_millis() as u64,
                })
            }
        }
    }

    #[inline]
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Time since the last enqueue
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }
}

/// Worker loop: the only writer of `block_id`'s events
async fn serializer_task(
    block_id: BlockId,
    store: Arc<dyn BlockStore>,
    mut receiver: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
) {
    tracing::debug!(%block_id, "serializer started");

    loop {
        tokio::select! {
            biased;
            command = receiver.recv() => match command {
                Some(command) => process(block_id, store.as_ref(), command).await,
                None => break,
            },
            () = shutdown.cancelled() => {
                receiver.close();
                while let Some(command) = receiver.recv().await {
                    process(block_id, store.as_ref(), command).await;
                }
                break;
            }
        }
    }

    tracing::debug!(%block_id, "serializer stopped");
}

async fn process(block_id: BlockId, store: &dyn BlockStore, command: Command) {
    let result = match command {
        Command::Append(event) => store.append_event(block_id, event).await,
        Command::AppendBatch(events) => store.append_events_batch(block_id, events).await,
        Command::Flush(ack) => {
            let _ = ack.send(());
            return;
        }
    };
    if let Err(err) = result {
        record_persistence_failure(block_id, &err);
    }
}

fn record_persistence_failure(block_id: BlockId, err: &StoreError) {
    tracing::warn!(%block_id, error = %err, "failed to persist block event");
    metrics::counter!("parley.event_persistence_failure").increment(1);
}

/// Process-wide map of live serializers
pub struct SerializerRegistry {
    store: Arc<dyn BlockStore>,
    config: SerializerConfig,
    serializers: DashMap<BlockId, Arc<EventSerializer>>,
    /// Released blocks and when they were released
    closed: DashMap<BlockId, Instant>,
}

impl SerializerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(store: Arc<dyn BlockStore>, config: SerializerConfig) -> Self {
        Self {
            store,
            config,
            serializers: DashMap::new(),
            closed: DashMap::new(),
        }
    }

    /// The block's serializer, spawned on first use; fails once the block
    /// was released
    pub fn get_or_create(&self, block_id: BlockId) -> Result<Arc<EventSerializer>, StreamError> {
        let entry = self.serializers.entry(block_id);
        // checked under the shard lock: release marks closed before removing
        if self.closed.contains_key(&block_id) {
            return Err(StoreError::BlockClosed(block_id).into());
        }
        let serializer = entry.or_insert_with(|| {
            Arc::new(EventSerializer::spawn(
                block_id,
                Arc::clone(&self.store),
                &self.config,
            ))
        });
        Ok(Arc::clone(serializer.value()))
    }

    /// Enqueue one event for `block_id`
    pub async fn append(&self, block_id: BlockId, event: BlockEvent) -> Result<(), StreamError> {
        self.get_or_create(block_id)?.append(event).await
    }

    /// Enqueue a batch for `block_id`
    pub async fn append_batch(
        &self,
        block_id: BlockId,
        events: Vec<BlockEvent>,
    ) -> Result<(), StreamError> {
        self.get_or_create(block_id)?.append_batch(events).await
    }

    /// Wait for a block's pending events, if it has a worker
    pub async fn flush(&self, block_id: BlockId) -> Result<(), StreamError> {
        let serializer = self.serializers.get(&block_id).map(|s| Arc::clone(s.value()));
        match serializer {
            Some(serializer) => serializer.flush().await,
            None => Ok(()),
        }
    }

    /// Close a block: stop its serializer after draining pending events and
    /// refuse further appends
    pub async fn release(&self, block_id: BlockId) -> Result<(), StreamError> {
        self.closed.insert(block_id, Instant::now());
        self.stop_worker(block_id).await
    }

    /// Whether the block was released
    #[must_use]
    pub fn is_closed(&self, block_id: BlockId) -> bool {
        self.closed.contains_key(&block_id)
    }

    async fn stop_worker(&self, block_id: BlockId) -> Result<(), StreamError> {
        match self.serializers.remove(&block_id) {
            Some((_, serializer)) => serializer.stop().await,
            None => Ok(()),
        }
    }

    /// Whether the block has a live worker
    #[must_use]
    pub fn is_active(&self, block_id: BlockId) -> bool {
        self.serializers.contains_key(&block_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.serializers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.serializers.is_empty()
    }

    /// Reclaim workers idle longer than the stale threshold
    pub async fn sweep_stale(&self) -> usize {
        let stale_after = self.config.stale_after();
        let stale: Vec<BlockId> = self
            .serializers
            .iter()
            .filter(|entry| entry.value().idle_for() >= stale_after)
            .map(|entry| *entry.key())
            .collect();

        let mut reclaimed = 0;
        for block_id in stale {
            let removed = self
                .serializers
                .remove_if(&block_id, |_, s| s.idle_for() >= stale_after);
            if let Some((_, serializer)) = removed {
                if let Err(err) = serializer.stop().await {
                    tracing::warn!(%block_id, error = %err, "stale serializer stop failed");
                }
                reclaimed += 1;
            }
        }

        self.closed.retain(|_, released| released.elapsed() < stale_after);

        if reclaimed > 0 {
            tracing::info!(reclaimed, remaining = self.len(), "swept stale serializers");
        }
        reclaimed
    }

    /// Run [`sweep_stale`](Self::sweep_stale) periodically until `shutdown` fires
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.sweep_stale().await;
                    }
                }
            }
            tracing::debug!("serializer sweeper stopped");
        })
    }

    /// Stop every worker
    pub async fn shutdown(&self) {
        let ids: Vec<BlockId> = self.serializers.iter().map(|e| *e.key()).collect();
        for block_id in ids {
            if let Err(err) = self.stop_worker(block_id).await {
                tracing::warn!(%block_id, error = %err, "serializer shutdown failed");
            }
        }
    }
}

impl std::fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializerRegistry")
            .field("active", &self.serializers.len())
            .field("closed", &self.closed.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{EventKind, InMemoryStore, NewBlock};
    use pretty_assertions::assert_eq;

    async fn setup() -> (Arc<InMemoryStore>, SerializerRegistry, BlockId) {
        let store = Arc::new(InMemoryStore::new());
        let block = store.create_block(NewBlock::default()).await.unwrap();
        let registry = SerializerRegistry::new(store.clone(), SerializerConfig::default());
        (store, registry, block.id)
    }

    fn event(content: String) -> BlockEvent {
        BlockEvent::new(EventKind::Answer, content)
    }

    #[tokio::test]
    async fn get_or_create_reuses_worker() {
        let (_store, registry, block) = setup().await;
        let a = registry.get_or_create(block).unwrap();
        let b = registry.get_or_create(block).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn batch_matches_sequential_order() {
        let (store, registry, block) = setup().await;

        registry.append(block, event("a".into())).await.unwrap();
        registry
            .append_batch(block, vec![event("b".into()), event("c".into())])
            .await
            .unwrap();
        registry.append(block, event("d".into())).await.unwrap();
        registry.flush(block).await.unwrap();

        let stored = store.get_block(block).await.unwrap();
        let contents: Vec<&str> = stored.events.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "c", "d"]);
        assert_eq!(store.event_writes(), 3);
    }

    #[tokio::test]
    async fn stop_drains_then_rejects() {
        let (store, registry, block) = setup().await;
        let serializer = registry.get_or_create(block).unwrap();

        for i in 0..20 {
            serializer.append(event(format!("e{i}"))).await.unwrap();
        }
        registry.release(block).await.unwrap();

        assert_eq!(store.get_block(block).await.unwrap().events.len(), 20);
        assert!(!registry.is_active(block));

        let err = serializer.append(event("late".into())).await.unwrap_err();
        assert_eq!(err, StreamError::Stopped(block));
        assert!(err.to_string().contains("serializer stopped"));
    }

    #[tokio::test]
    async fn released_block_refuses_new_workers() {
        let (store, registry, block) = setup().await;
        registry.append(block, event("a".into())).await.unwrap();
        registry.release(block).await.unwrap();

        let err = registry.append(block, event("late".into())).await.unwrap_err();
        assert_eq!(err, StreamError::Store(StoreError::BlockClosed(block)));
        assert!(registry.get_or_create(block).is_err());
        assert!(registry.is_closed(block));
        assert!(registry.is_empty());
        assert_eq!(store.get_block(block).await.unwrap().events.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sweep_keeps_block_open_and_forgets_old_closures() {
        let store = Arc::new(InMemoryStore::new());
        let idle = store.create_block(NewBlock::default()).await.unwrap().id;
        let done = store.create_block(NewBlock::default()).await.unwrap().id;
        let registry = SerializerRegistry::new(store.clone(), SerializerConfig::default());
        registry.append(idle, event("x".into())).await.unwrap();
        registry.release(done).await.unwrap();

        tokio::time::advance(Duration::from_secs(31 * 60)).await;
        assert_eq!(registry.sweep_stale().await, 1);

        // an idle worker is reclaimed, not closed
        registry.append(idle, event("y".into())).await.unwrap();
        assert!(!registry.is_closed(done));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (_store, registry, block) = setup().await;
        let serializer = registry.get_or_create(block).unwrap();
        serializer.stop().await.unwrap();
        serializer.stop().await.unwrap();
        assert!(serializer.is_stopped());
    }

    #[tokio::test]
    async fn full_queue_applies_backpressure() {
        let store = Arc::new(InMemoryStore::new());
        let block = store.create_block(NewBlock::default()).await.unwrap().id;
        let registry = Arc::new(SerializerRegistry::new(
            store.clone(),
            SerializerConfig::default().with_queue_capacity(2),
        ));

        let mut producers = Vec::new();
        for p in 0..4 {
            let registry = Arc::clone(&registry);
            producers.push(tokio::spawn(async move {
                for i in 0..25 {
                    registry.append(block, event(format!("{p}-{i}"))).await.unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        registry.release(block).await.unwrap();

        assert_eq!(store.get_block(block).await.unwrap().events.len(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_reclaims_only_idle_workers() {
        let store = Arc::new(InMemoryStore::new());
        let idle = store.create_block(NewBlock::default()).await.unwrap().id;
        let busy = store.create_block(NewBlock::default()).await.unwrap().id;
        let registry = SerializerRegistry::new(store, SerializerConfig::default());

        registry.append(idle, event("x".into())).await.unwrap();
        tokio::time::advance(Duration::from_secs(20 * 60)).await;
        registry.append(busy, event("y".into())).await.unwrap();
        tokio::time::advance(Duration::from_secs(11 * 60)).await;

        assert_eq!(registry.sweep_stale().await, 1);
        assert!(!registry.is_active(idle));
        assert!(registry.is_active(busy));
        assert_eq!(registry.sweep_stale().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_until_cancelled() {
        let store = Arc::new(InMemoryStore::new());
        let block = store.create_block(NewBlock::default()).await.unwrap().id;
        let registry = Arc::new(SerializerRegistry::new(store, SerializerConfig::default()));
        registry.append(block, event("x".into())).await.unwrap();

        let shutdown = CancellationToken::new();
        let sweeper = registry.spawn_sweeper(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(36 * 60)).await;
        assert!(!registry.is_active(block));

        shutdown.cancel();
        sweeper.await.unwrap();
    }
}
