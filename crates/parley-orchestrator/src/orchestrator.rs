//! Decompose → execute → aggregate, exposed as a [`ChatHandler`]

use crate::aggregator::{Aggregated, Aggregator, Synthesizer};
use crate::decomposer::{Decomposer, Planner};
use crate::error::OrchestratorError;
use crate::executor::{notify, Executor};
use async_trait::async_trait;
use parley_core::{
    ChatHandler, EventKind, EventSink, HandlerError, HandlerEvent, HandlerRegistry,
    HandlerRequest, OrchestratorConfig, UsageStats,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Registry name of the orchestrator
pub const ORCHESTRATOR_NAME: &str = "orchestrator";

/// Multi-expert handler
#[derive(Debug, Clone)]
pub struct Orchestrator {
    decomposer: Decomposer,
    executor: Executor,
    aggregator: Aggregator,
}

impl Orchestrator {
    /// Orchestrate over the experts registered in `registry`
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>, config: OrchestratorConfig) -> Self {
        let experts = registry.experts().cloned().collect();
        Self {
            decomposer: Decomposer::new(experts, config.default_expert.clone()),
            executor: Executor::new(registry, config),
            aggregator: Aggregator::new(),
        }
    }

    #[must_use]
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.decomposer = self.decomposer.with_planner(planner);
        self
    }

    #[must_use]
    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.aggregator = self.aggregator.with_synthesizer(synthesizer);
        self
    }

    /// Run all three stages; progress events go to `sink`, the answer does not
    pub async fn run(
        &self,
        request: &HandlerRequest,
        sink: &EventSink,
    ) -> Result<Aggregated, OrchestratorError> {
        let started = Instant::now();
        notify(
            sink,
            HandlerEvent::json(
                EventKind::DecomposeStart,
                &serde_json::json!({ "experts": self.decomposer.experts().len() }),
            ),
        )
        .await;

        let plan = self.decomposer.decompose(request).await?;
        notify(
            sink,
            HandlerEvent::json(
                EventKind::DecomposeEnd,
                &serde_json::json!({
                    "analysis": plan.analysis,
                    "tasks": plan.tasks.len(),
                    "direct": plan.direct_response.is_some(),
                    "duration_ms": started.elapsed().as_millis() as u64,
                }),
            ),
        )
        .await;

        if let Some(response) = plan.direct_response {
            return Ok(Aggregated {
                content: response,
                usage: UsageStats::default(),
                merged: false,
            });
        }

        let synthesize = plan.aggregate;
        let report = self.executor.execute_plan(plan, request, sink).await?;
        if report.cancelled {
            return Err(OrchestratorError::Cancelled);
        }

        let aggregated = self
            .aggregator
            .aggregate(request, &report, synthesize, sink)
            .await?;
        info!(
            tasks = report.tasks.len(),
            completed = report.completed().count(),
            merged = aggregated.merged,
            duration_ms = started.elapsed().as_millis() as u64,
            "orchestration finished"
        );
        Ok(aggregated)
    }
}

#[async_trait]
impl ChatHandler for Orchestrator {
    fn name(&self) -> &str {
        ORCHESTRATOR_NAME
    }

    async fn execute(
        &self,
        request: HandlerRequest,
        sink: EventSink,
    ) -> Result<UsageStats, HandlerError> {
        let aggregated = self.run(&request, &sink).await?;
        sink.emit(HandlerEvent::answer(aggregated.content)).await?;
        Ok(aggregated.usage)
    }
}
