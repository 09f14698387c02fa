//! Block lifecycle management
//!
//! Creates blocks for chat rounds, routes event appends through the
//! per-block serializer, and moves blocks through their status machine.
//! Terminal transitions release the block's serializer after draining it,
//! so a block is never left with a live worker once it is closed.

use crate::error::StreamError;
use crate::serializer::SerializerRegistry;
use parley_core::{
    now_millis, Block, BlockEvent, BlockId, BlockKind, BlockMode, BlockStatus, BlockStore,
    ConversationId, NewBlock, SerializerConfig, SessionStats, UpdateBlock, UserInput,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Error message recorded on blocks found unfinished at startup
pub const INTERRUPTED_MESSAGE: &str = "interrupted";

/// Owns block creation, event appends and status transitions
#[derive(Clone)]
pub struct BlockManager {
    store: Arc<dyn BlockStore>,
    serializers: Arc<SerializerRegistry>,
}

impl BlockManager {
    /// Create a manager with its own serializer registry
    #[must_use]
    pub fn new(store: Arc<dyn BlockStore>, config: SerializerConfig) -> Self {
        let serializers = Arc::new(SerializerRegistry::new(Arc::clone(&store), config));
        Self { store, serializers }
    }

    /// Create a manager sharing an existing registry
    #[must_use]
    pub fn with_registry(store: Arc<dyn BlockStore>, serializers: Arc<SerializerRegistry>) -> Self {
        Self { store, serializers }
    }

    #[must_use]
    pub fn serializers(&self) -> &Arc<SerializerRegistry> {
        &self.serializers
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    /// Open the next round of `conversation` in `pending` status
    pub async fn create_block_for_chat(
        &self,
        conversation: ConversationId,
        user_message: &str,
        mode: BlockMode,
    ) -> Result<Block, StreamError> {
        let block = self
            .store
            .create_block(NewBlock {
                conversation_id: conversation,
                kind: BlockKind::Message,
                mode,
                user_inputs: vec![UserInput::new(user_message)],
                assistant_content: String::new(),
                status: BlockStatus::Pending,
            })
            .await?;

        tracing::debug!(
            block_id = %block.id,
            %conversation,
            round = block.round_number,
            mode = mode.as_str(),
            "created chat block"
        );
        Ok(block)
    }

    /// Record a summarization boundary; created already completed
    pub async fn create_separator_block(
        &self,
        conversation: ConversationId,
        content: &str,
    ) -> Result<Block, StreamError> {
        let block = self
            .store
            .create_block(NewBlock {
                conversation_id: conversation,
                kind: BlockKind::ContextSeparator,
                mode: BlockMode::Normal,
                user_inputs: Vec::new(),
                assistant_content: content.to_string(),
                status: BlockStatus::Completed,
            })
            .await?;

        tracing::debug!(block_id = %block.id, %conversation, "created separator block");
        Ok(block)
    }

    /// Enqueue one event on the block's serializer
    pub async fn append_event(&self, block: BlockId, event: BlockEvent) -> Result<(), StreamError> {
        self.serializers.append(block, event).await
    }

    /// Enqueue events persisted as one write; zero timestamps are stamped now
    pub async fn append_events_batch(
        &self,
        block: BlockId,
        mut events: Vec<BlockEvent>,
    ) -> Result<(), StreamError> {
        let now = now_millis();
        for event in events.iter_mut().filter(|e| e.timestamp == 0) {
            event.timestamp = now;
        }
        self.serializers.append_batch(block, events).await
    }

    /// Wait for the block's enqueued events to be persisted
    pub async fn flush(&self, block: BlockId) -> Result<(), StreamError> {
        self.serializers.flush(block).await
    }

    pub async fn append_user_input(&self, block: BlockId, content: &str) -> Result<(), StreamError> {
        self.store
            .append_user_input(block, UserInput::new(content))
            .await
            .map_err(Into::into)
    }

    /// Apply a status change with optional content and stats.
    ///
    /// Terminal statuses release the serializer first, so every event
    /// enqueued before this call is persisted ahead of the status change.
    pub async fn update_status(
        &self,
        block: BlockId,
        status: BlockStatus,
        content: Option<String>,
        stats: Option<SessionStats>,
    ) -> Result<Block, StreamError> {
        self.apply(
            block,
            UpdateBlock {
                status: Some(status),
                assistant_content: content,
                session_stats: stats,
                error_message: None,
            },
        )
        .await
    }

    pub async fn mark_streaming(&self, block: BlockId) -> Result<Block, StreamError> {
        self.apply(block, UpdateBlock::status(BlockStatus::Streaming))
            .await
    }

    /// Close the block successfully
    pub async fn complete(
        &self,
        block: BlockId,
        content: String,
        stats: Option<SessionStats>,
    ) -> Result<Block, StreamError> {
        self.apply(
            block,
            UpdateBlock {
                status: Some(BlockStatus::Completed),
                assistant_content: Some(content),
                session_stats: stats,
                error_message: None,
            },
        )
        .await
    }

    /// Close the block as failed
    pub async fn mark_error(
        &self,
        block: BlockId,
        message: &str,
        stats: Option<SessionStats>,
    ) -> Result<Block, StreamError> {
        self.apply(
            block,
            UpdateBlock {
                status: Some(BlockStatus::Error),
                assistant_content: None,
                session_stats: stats,
                error_message: Some(message.to_string()),
            },
        )
        .await
    }

    async fn apply(&self, block: BlockId, update: UpdateBlock) -> Result<Block, StreamError> {
        let terminal = update.status.is_some_and(|s| s.is_terminal());
        if terminal {
            if let Err(err) = self.serializers.release(block).await {
                tracing::warn!(block_id = %block, error = %err, "serializer release failed");
            }
        }

        let status = update.status;
        let updated = self.store.update_block(block, update).await.map_err(|err| {
            tracing::warn!(block_id = %block, ?status, error = %err, "block status update failed");
            StreamError::from(err)
        })?;

        if terminal {
            tracing::info!(
                block_id = %block,
                status = %updated.status,
                events = updated.events.len(),
                "block closed"
            );
        }
        Ok(updated)
    }

    pub async fn get_block(&self, block: BlockId) -> Result<Block, StreamError> {
        self.store.get_block(block).await.map_err(Into::into)
    }

    pub async fn latest_block(
        &self,
        conversation: ConversationId,
    ) -> Result<Option<Block>, StreamError> {
        self.store
            .latest_block(conversation)
            .await
            .map_err(Into::into)
    }

    /// Fail every unfinished block that has no live worker.
    ///
    /// Run at startup so no block stays `pending` or `streaming` forever.
    pub async fn recover_interrupted_blocks(&self) -> Result<usize, StreamError> {
        let mut recovered = 0;
        for block in self.store.unfinished_blocks().await? {
            if self.serializers.is_active(block.id) {
                continue;
            }
            match self.mark_error(block.id, INTERRUPTED_MESSAGE, None).await {
                Ok(_) => recovered += 1,
                Err(err) => {
                    tracing::warn!(block_id = %block.id, error = %err, "could not recover block");
                }
            }
        }
        if recovered > 0 {
            tracing::info!(recovered, "marked interrupted blocks as failed");
        }
        Ok(recovered)
    }

    /// Reclaim idle serializers now
    pub async fn sweep_stale_serializers(&self) -> usize {
        self.serializers.sweep_stale().await
    }

    /// Start the periodic serializer sweep
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.serializers.spawn_sweeper(shutdown)
    }
}

impl std::fmt::Debug for BlockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockManager")
            .field("serializers", &self.serializers)
            .finish_non_exhaustive()
    }
}
