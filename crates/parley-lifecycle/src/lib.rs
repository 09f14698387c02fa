//! Parley Lifecycle - conversation events with isolated listeners
//!
//! Provides:
//! - [`LifecycleBus`]: concurrent fan-out with per-listener deadlines
//! - [`LifecycleListener`]: the subscriber seam
//! - [`ConversationService`]: creates or touches the conversation of a round
//!
//! # Example
//!
//! ```rust,ignore
//! use parley_lifecycle::{ConversationService, LifecycleBus, LifecycleEvent};
//!
//! let bus = LifecycleBus::new(&config.bus);
//! Arc::new(ConversationService::new(store)).subscribe(&bus);
//! let outcome = bus.publish(LifecycleEvent::conversation_start(user, id, "memo", false), &cancel).await;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod bus;
pub mod conversation;
pub mod error;
pub mod event;

pub use bus::{LifecycleBus, LifecycleListener, PublishOutcome};
pub use conversation::{ConversationService, NEW_CONVERSATION_TITLE};
pub use error::BusError;
pub use event::{LifecycleEvent, LifecycleEventKind};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
