//! Conversation creation listener

use crate::bus::{LifecycleBus, LifecycleListener};
use crate::error::BusError;
use crate::event::{LifecycleEvent, LifecycleEventKind};
use async_trait::async_trait;
use parley_core::{
    Conversation, ConversationId, ConversationStore, NewConversation, StoreError, TitleSource,
    UpdateConversation,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Title key of a freshly created conversation; clients localize it
pub const NEW_CONVERSATION_TITLE: &str = "chat.new";

/// Keeps conversations in step with chat rounds
pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
}

impl ConversationService {
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Listen for `conversation_start` on `bus`
    pub fn subscribe(self: &Arc<Self>, bus: &LifecycleBus) -> usize {
        bus.subscribe(LifecycleEventKind::ConversationStart, self.clone())
    }

    /// Conversation for a starting round.
    ///
    /// - existing: touched, same id
    /// - temporary: nothing persisted, `ConversationId::NEW`
    /// - otherwise: created with the default title
    pub async fn ensure_conversation(
        &self,
        event: &LifecycleEvent,
    ) -> Result<ConversationId, StoreError> {
        if event.conversation_id.is_persisted() {
            if let Err(e) = self
                .store
                .update_conversation(event.conversation_id, UpdateConversation::default())
                .await
            {
                warn!(conversation = %event.conversation_id, error = %e, "failed to touch conversation");
            }
            return Ok(event.conversation_id);
        }

        if event.temporary {
            return Ok(ConversationId::NEW);
        }

        let conversation = self
            .store
            .create_conversation(NewConversation {
                creator: event.user_id,
                title: NEW_CONVERSATION_TITLE.to_string(),
                title_source: TitleSource::Default,
                handler: event.handler.clone(),
            })
            .await?;
        info!(conversation = %conversation.id, user = event.user_id.0, "conversation created");
        Ok(conversation.id)
    }

    /// Store a generated title unless the user named the conversation
    pub async fn apply_generated_title(
        &self,
        id: ConversationId,
        title: impl Into<String>,
    ) -> Result<Conversation, StoreError> {
        self.store
            .update_conversation(
                id,
                UpdateConversation {
                    title: Some(title.into()),
                    title_source: Some(TitleSource::Auto),
                    keep_user_title: true,
                },
            )
            .await
    }

    /// Set a user title; generated titles never replace it
    pub async fn rename(
        &self,
        id: ConversationId,
        title: impl Into<String>,
    ) -> Result<Conversation, StoreError> {
        self.store
            .update_conversation(
                id,
                UpdateConversation {
                    title: Some(title.into()),
                    title_source: Some(TitleSource::User),
                    keep_user_title: false,
                },
            )
            .await
    }
}

#[async_trait]
impl LifecycleListener for ConversationService {
    async fn on_event(
        &self,
        event: &LifecycleEvent,
        _cancel: CancellationToken,
    ) -> Result<serde_json::Value, BusError> {
        let id = self.ensure_conversation(event).await?;
        Ok(serde_json::json!(id.0))
    }
}

impl std::fmt::Debug for ConversationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationService").finish_non_exhaustive()
    }
}
