//! Parley Core - shared foundation of the conversational execution core
//!
//! Provides:
//! - The persisted data model (conversations, blocks, events, usage)
//! - Routing vocabulary (intents, domains, route results)
//! - Store contracts and an in-memory store
//! - Handler and emitter contracts, and the handler registry
//! - Configuration and telemetry setup
//!
//! # Example
//!
//! ```rust,ignore
//! use parley_core::prelude::*;
//!
//! # async fn example() -> Result<(), StoreError> {
//! let store = InMemoryStore::new();
//! let block = store
//!     .create_block(NewBlock {
//!         conversation_id: ConversationId(1),
//!         user_inputs: vec![UserInput::new("what's on tomorrow?")],
//!         ..NewBlock::default()
//!     })
//!     .await?;
//! assert_eq!(block.round_number, 1);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod handler;
pub mod route;
pub mod store;
pub mod telemetry;
pub mod types;

pub use config::{
    BusConfig, HarnessConfig, OrchestratorConfig, ParleyConfig, RouterConfig, SerializerConfig,
};
pub use error::{ConfigError, EmitError, HandlerError, StoreError};
pub use handler::{
    ChatHandler, EventEmitter, EventSink, ExpertProfile, HandlerEvent, HandlerRegistry,
    HandlerRequest,
};
pub use route::{Domain, Intent, RouteLayer, RouteResult};
pub use store::{
    BlockStore, ConversationStore, InMemoryStore, NewBlock, NewConversation, UpdateBlock,
    UpdateConversation,
};
pub use types::{
    now_millis, Block, BlockEvent, BlockId, BlockKind, BlockMode, BlockStatus, Conversation,
    ConversationId, EventKind, EventMeta, SessionStats, SummaryStatus, TitleSource, TraceId,
    UsageStats, UserId, UserInput,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Parley Core
    pub use crate::{
        Block, BlockEvent, BlockId, BlockMode, BlockStatus, BlockStore, ChatHandler,
        ConversationId, ConversationStore, EventKind, EventSink, HandlerError, HandlerEvent,
        HandlerRequest, InMemoryStore, NewBlock, ParleyConfig, StoreError, UsageStats, UserId,
        UserInput,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
