//! Parley Routing - decides which handler answers a message
//!
//! The [`Router`] runs a cascade of increasingly expensive layers:
//! - multi-intent detection (requests decomposition)
//! - memoized verdicts ([`RouteCache`])
//! - keyword and pattern rules ([`RuleMatcher`])
//! - conversation and user history ([`HistoryMatcher`])
//! - per-user adaptive weights ([`WeightedMatcher`])
//! - an external [`SemanticClassifier`]
//!
//! [`LastRoutes`] keeps the route each conversation took last, which the
//! history layer needs for confirmations and follow-ups.
//!
//! # Example
//!
//! ```rust,ignore
//! use parley_routing::{Router, RouteRequest};
//! use parley_core::{RouterConfig, UserId};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), parley_routing::RoutingError> {
//! let router = Router::new(RouterConfig::default());
//! let route = router
//!     .route(&RouteRequest::new(UserId(1), "search my notes"), &CancellationToken::new())
//!     .await?;
//! assert_eq!(route.target.as_deref(), Some("memo"));
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cache;
pub mod detector;
pub mod error;
pub mod feedback;
pub mod history;
pub mod lexicon;
pub mod router;
pub mod rules;
pub mod semantic;
pub mod session;
pub mod weights;

pub use cache::{RouteCache, RouteCacheStats};
pub use detector::{MultiIntentDetector, MultiIntentReason};
pub use error::RoutingError;
pub use feedback::{FeedbackKind, RouterFeedback, RouterStats};
pub use history::{HistoryMatch, HistoryMatchKind, HistoryMatcher};
pub use router::{RouteRequest, Router};
pub use rules::RuleMatcher;
pub use semantic::{SemanticClassifier, SemanticVerdict};
pub use session::LastRoutes;
pub use weights::{InMemoryWeightStore, UserWeights, WeightStore, WeightedMatcher};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
