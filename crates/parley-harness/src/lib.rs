//! Parley Harness - streaming execution of conversational rounds
//!
//! Provides:
//! - [`ChatHarness`]: dispatch, block lifecycle, heartbeat and terminal ordering
//! - [`ChatRequest`] / [`ChatResponse`] / [`ChatStream`]: the client contract
//! - [`RoundEmitter`]: per-round sink that persists and forwards handler events
//!
//! # Example
//!
//! ```rust,ignore
//! use parley_harness::{ChatHarness, ChatRequest};
//!
//! let harness = ChatHarness::new(registry, config.harness)
//!     .with_router(router)
//!     .with_orchestrator(orchestrator)
//!     .with_block_manager(blocks);
//! let summary = harness.handle(ChatRequest::new(user, "what's on tomorrow?"), stream, cancel).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod harness;
pub mod heartbeat;
pub mod request;
pub mod round;
pub mod summary;

pub use error::HarnessError;
pub use harness::ChatHarness;
pub use request::{ChatRequest, ChatResponse, ChatStream, HandlerChoice};
pub use round::{BlockTarget, RoundEmitter, RoundState, StreamGate};
pub use summary::SummaryContext;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
