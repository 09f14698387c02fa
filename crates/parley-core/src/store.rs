//! Persistence contracts and the in-memory implementation
//!
//! The store is the authority on two invariants:
//! - round numbers are assigned atomically and increase per conversation
//! - block status only moves forward; terminal blocks accept no events

use crate::error::StoreError;
use crate::types::{
    now_millis, Block, BlockEvent, BlockId, BlockKind, BlockMode, BlockStatus, Conversation,
    ConversationId, SessionStats, TitleSource, UserId, UserInput,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Parameters of a new block
#[derive(Debug, Clone, Default)]
pub struct NewBlock {
    pub conversation_id: ConversationId,
    pub kind: BlockKind,
    pub mode: BlockMode,
    pub user_inputs: Vec<UserInput>,
    pub assistant_content: String,
    pub status: BlockStatus,
}

/// Partial update of a block; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct UpdateBlock {
    pub status: Option<BlockStatus>,
    pub assistant_content: Option<String>,
    pub session_stats: Option<SessionStats>,
    pub error_message: Option<String>,
}

impl UpdateBlock {
    /// Update only the status
    #[must_use]
    pub fn status(status: BlockStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Parameters of a new conversation
#[derive(Debug, Clone, Default)]
pub struct NewConversation {
    pub creator: UserId,
    pub title: String,
    pub title_source: TitleSource,
    pub handler: String,
}

/// Partial update of a conversation; always refreshes `updated_ts`
#[derive(Debug, Clone, Default)]
pub struct UpdateConversation {
    pub title: Option<String>,
    pub title_source: Option<TitleSource>,
    /// Leave the title alone if the user set it
    pub keep_user_title: bool,
}

/// Block persistence
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Create a block with the next round number of its conversation
    async fn create_block(&self, new: NewBlock) -> Result<Block, StoreError>;

    async fn get_block(&self, id: BlockId) -> Result<Block, StoreError>;

    /// Append one event; stamps a zero timestamp
    async fn append_event(&self, id: BlockId, event: BlockEvent) -> Result<(), StoreError>;

    /// Append events as one write, in slice order
    async fn append_events_batch(
        &self,
        id: BlockId,
        events: Vec<BlockEvent>,
    ) -> Result<(), StoreError>;

    async fn append_user_input(&self, id: BlockId, input: UserInput) -> Result<(), StoreError>;

    /// Apply a partial update, enforcing forward-only status
    async fn update_block(&self, id: BlockId, update: UpdateBlock) -> Result<Block, StoreError>;

    /// Highest round of a conversation
    async fn latest_block(&self, conversation: ConversationId)
        -> Result<Option<Block>, StoreError>;

    /// Blocks of a conversation by round
    async fn list_blocks(&self, conversation: ConversationId) -> Result<Vec<Block>, StoreError>;

    /// Blocks still `pending` or `streaming`
    async fn unfinished_blocks(&self) -> Result<Vec<Block>, StoreError>;
}

/// Conversation persistence
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, new: NewConversation)
        -> Result<Conversation, StoreError>;

    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation, StoreError>;

    async fn update_conversation(
        &self,
        id: ConversationId,
        update: UpdateConversation,
    ) -> Result<Conversation, StoreError>;

    /// Conversations of a user, most recently updated first
    async fn list_conversations(&self, creator: UserId) -> Result<Vec<Conversation>, StoreError>;
}

/// Process-local store backing both traits
#[derive(Debug)]
pub struct InMemoryStore {
    blocks: RwLock<IndexMap<BlockId, Block>>,
    conversations: RwLock<IndexMap<ConversationId, Conversation>>,
    next_block: AtomicI64,
    next_conversation: AtomicI64,
    event_writes: AtomicU64,
}

impl InMemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(IndexMap::new()),
            conversations: RwLock::new(IndexMap::new()),
            next_block: AtomicI64::new(1),
            next_conversation: AtomicI64::new(1),
            event_writes: AtomicU64::new(0),
        }
    }

    /// Number of event write operations performed (single or batch)
    #[must_use]
    pub fn event_writes(&self) -> u64 {
        self.event_writes.load(Ordering::Relaxed)
    }

    /// Number of stored blocks
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    fn push_events(&self, id: BlockId, events: Vec<BlockEvent>) -> Result<(), StoreError> {
        let mut blocks = self.blocks.write();
        let block = blocks.get_mut(&id).ok_or(StoreError::BlockNotFound(id))?;
        if block.status.is_terminal() {
            return Err(StoreError::BlockClosed(id));
        }
        let now = now_millis();
        block.events.extend(events.into_iter().map(|mut event| {
            if event.timestamp == 0 {
                event.timestamp = now;
            }
            event
        }));
        block.updated_ts = now;
        self.event_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockStore for InMemoryStore {
    async fn create_block(&self, new: NewBlock) -> Result<Block, StoreError> {
        let mut blocks = self.blocks.write();
        let round_number = blocks
            .values()
            .filter(|b| b.conversation_id == new.conversation_id)
            .map(|b| b.round_number)
            .max()
            .unwrap_or(0)
            + 1;
        let now = now_millis();
        let block = Block {
            id: BlockId(self.next_block.fetch_add(1, Ordering::Relaxed)),
            uid: uuid::Uuid::new_v4().to_string(),
            conversation_id: new.conversation_id,
            round_number,
            kind: new.kind,
            mode: new.mode,
            user_inputs: new.user_inputs,
            assistant_content: new.assistant_content,
            events: Vec::new(),
            session_stats: None,
            status: new.status,
            error_message: None,
            created_ts: now,
            updated_ts: now,
        };
        blocks.insert(block.id, block.clone());
        Ok(block)
    }

    async fn get_block(&self, id: BlockId) -> Result<Block, StoreError> {
        self.blocks
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::BlockNotFound(id))
    }

    async fn append_event(&self, id: BlockId, event: BlockEvent) -> Result<(), StoreError> {
        self.push_events(id, vec![event])
    }

    async fn append_events_batch(
        &self,
        id: BlockId,
        events: Vec<BlockEvent>,
    ) -> Result<(), StoreError> {
        self.push_events(id, events)
    }

    async fn append_user_input(&self, id: BlockId, input: UserInput) -> Result<(), StoreError> {
        let mut blocks = self.blocks.write();
        let block = blocks.get_mut(&id).ok_or(StoreError::BlockNotFound(id))?;
        if block.status.is_terminal() {
            return Err(StoreError::BlockClosed(id));
        }
        block.user_inputs.push(input);
        block.updated_ts = now_millis();
        Ok(())
    }

    async fn update_block(&self, id: BlockId, update: UpdateBlock) -> Result<Block, StoreError> {
        let mut blocks = self.blocks.write();
        let block = blocks.get_mut(&id).ok_or(StoreError::BlockNotFound(id))?;

        if let Some(next) = update.status {
            if !block.status.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    block: id,
                    from: block.status,
                    to: next,
                });
            }
            block.status = next;
        }
        if let Some(content) = update.assistant_content {
            block.assistant_content = content;
        }
        if let Some(stats) = update.session_stats {
            block.session_stats = Some(stats);
        }
        if let Some(message) = update.error_message {
            block.error_message = Some(message);
        }
        block.updated_ts = now_millis();
        Ok(block.clone())
    }

    async fn latest_block(
        &self,
        conversation: ConversationId,
    ) -> Result<Option<Block>, StoreError> {
        Ok(self
            .blocks
            .read()
            .values()
            .filter(|b| b.conversation_id == conversation)
            .max_by_key(|b| b.round_number)
            .cloned())
    }

    async fn list_blocks(&self, conversation: ConversationId) -> Result<Vec<Block>, StoreError> {
        let mut blocks: Vec<Block> = self
            .blocks
            .read()
            .values()
            .filter(|b| b.conversation_id == conversation)
            .cloned()
            .collect();
        blocks.sort_by_key(|b| b.round_number);
        Ok(blocks)
    }

    async fn unfinished_blocks(&self) -> Result<Vec<Block>, StoreError> {
        Ok(self
            .blocks
            .read()
            .values()
            .filter(|b| !b.status.is_terminal())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<Conversation, StoreError> {
        let now = now_millis();
        let conversation = Conversation {
            id: ConversationId(self.next_conversation.fetch_add(1, Ordering::Relaxed)),
            uid: uuid::Uuid::new_v4().to_string(),
            creator: new.creator,
            title: new.title,
            title_source: new.title_source,
            handler: new.handler,
            created_ts: now,
            updated_ts: now,
        };
        self.conversations
            .write()
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation, StoreError> {
        self.conversations
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::ConversationNotFound(id))
    }

    async fn update_conversation(
        &self,
        id: ConversationId,
        update: UpdateConversation,
    ) -> Result<Conversation, StoreError> {
        let mut conversations = self.conversations.write();
        let conversation = conversations
            .get_mut(&id)
            .ok_or(StoreError::ConversationNotFound(id))?;

        let locked = update.keep_user_title && !conversation.title_source.allows_auto_title();
        if !locked {
            if let Some(title) = update.title {
                conversation.title = title;
            }
            if let Some(source) = update.title_source {
                conversation.title_source = source;
            }
        }
        conversation.updated_ts = now_millis();
        Ok(conversation.clone())
    }

    async fn list_conversations(&self, creator: UserId) -> Result<Vec<Conversation>, StoreError> {
        let mut conversations: Vec<Conversation> = self
            .conversations
            .read()
            .values()
            .filter(|c| c.creator == creator)
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_ts.cmp(&a.updated_ts));
        Ok(conversations)
    }
}
