//! Parley Orchestrator - multi-expert execution
//!
//! Provides:
//! - Decomposition of one request into a task plan (planner or heuristic)
//! - A validated task DAG and a bounded-concurrency executor
//! - `{{tN.result}}` context injection between tasks
//! - Capability-based handoff between experts
//! - Aggregation of task results into a single answer
//!
//! # Example
//!
//! ```rust,ignore
//! use parley_orchestrator::Orchestrator;
//!
//! let orchestrator = Orchestrator::new(registry.clone(), config.orchestrator.clone());
//! let usage = orchestrator.execute(request, sink).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod aggregator;
mod capture;
pub mod decomposer;
pub mod error;
pub mod executor;
pub mod graph;
pub mod handoff;
pub mod injector;
pub mod orchestrator;
pub mod task;

pub use aggregator::{Aggregated, Aggregator, Synthesizer, RESULT_SEPARATOR};
pub use decomposer::{parse_plan, Decomposer, Planner};
pub use error::OrchestratorError;
pub use executor::{ExecutionReport, Executor};
pub use graph::TaskGraph;
pub use handoff::{CapabilityMap, HandoffChain, HandoffFailReason};
pub use orchestrator::{Orchestrator, ORCHESTRATOR_NAME};
pub use task::{Task, TaskPlan, TaskStatus};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
