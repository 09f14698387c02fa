//! Parley Stream - ordered event persistence for conversational rounds
//!
//! Provides:
//! - [`EventSerializer`]: one ordering worker per block
//! - [`SerializerRegistry`]: lazily created workers with stale sweeping
//! - [`BlockManager`]: block creation and status lifecycle on top of both

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod block_manager;
pub mod error;
pub mod serializer;

pub use block_manager::{BlockManager, INTERRUPTED_MESSAGE};
pub use error::StreamError;
pub use serializer::{EventSerializer, SerializerRegistry};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
