//! DAG executor
//!
//! Kahn scheduling over a [`TaskGraph`]: every ready task is spawned into a
//! `JoinSet`, a semaphore caps how many run at once, and a finished task
//! releases its dependents. A failed or panicked task skips everything
//! downstream of it; unrelated branches keep running.

use crate::capture::TaskSink;
use crate::error::OrchestratorError;
use crate::graph::TaskGraph;
use crate::handoff::{CapabilityMap, HandoffChain, HandoffFailReason};
use crate::injector;
use crate::task::{Task, TaskPlan, TaskStatus};
use parley_core::{
    ChatHandler, EventKind, EventSink, HandlerError, HandlerEvent, HandlerRegistry,
    HandlerRequest, OrchestratorConfig, UsageStats,
};
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Final state of every task plus summed usage
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Tasks in plan order
    pub tasks: Vec<Task>,
    pub usage: UsageStats,
    pub cancelled: bool,
}

impl ExecutionReport {
    /// Completed tasks, in plan order
    pub fn completed(&self) -> impl Iterator<Item = &Task> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
    }

    /// Tasks that did not complete
    pub fn unsuccessful(&self) -> impl Iterator<Item = &Task> {
        self.tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed)
    }

    #[must_use]
    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.tasks.iter().find(|t| t.id == id).map(|t| t.status)
    }
}

struct NodeOutcome {
    result: Result<String, HandlerError>,
    usage: UsageStats,
    expert: String,
    duration: Duration,
}

/// Runs task graphs against the experts of a registry
#[derive(Clone)]
pub struct Executor {
    registry: Arc<HandlerRegistry>,
    capabilities: Arc<CapabilityMap>,
    config: OrchestratorConfig,
}

impl Executor {
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>, config: OrchestratorConfig) -> Self {
        let capabilities = Arc::new(CapabilityMap::from_registry(&registry));
        Self {
            registry,
            capabilities,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Announce, validate and run a plan.
    ///
    /// Plans not marked parallel run one task at a time.
    pub async fn execute_plan(
        &self,
        plan: TaskPlan,
        request: &HandlerRequest,
        sink: &EventSink,
    ) -> Result<ExecutionReport, OrchestratorError> {
        notify(sink, HandlerEvent::json(EventKind::Plan, &plan.to_event_payload())).await;

        let limit = if plan.parallel {
            self.config.max_parallel_tasks
        } else {
            1
        };
        let graph = TaskGraph::new(plan.tasks)?;
        Ok(self.run(graph, request, sink, limit).await)
    }

    /// Run a validated graph with the configured concurrency cap
    pub async fn execute(
        &self,
        graph: TaskGraph,
        request: &HandlerRequest,
        sink: &EventSink,
    ) -> ExecutionReport {
        self.run(graph, request, sink, self.config.max_parallel_tasks)
            .await
    }

    async fn run(
        &self,
        mut graph: TaskGraph,
        request: &HandlerRequest,
        sink: &EventSink,
        limit: usize,
    ) -> ExecutionReport {
        let semaphore = Arc::new(Semaphore::new(limit.max(1)));
        let mut remaining = graph.in_degrees();
        let mut ready: VecDeque<usize> = graph.roots().into();
        let mut join_set: JoinSet<(usize, NodeOutcome)> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, usize> = HashMap::new();
        let mut results: HashMap<String, String> = HashMap::new();
        let mut usage = UsageStats::default();
        let cancel = request.cancel.clone();
        let mut cancelled = false;

        info!(tasks = graph.len(), limit, "executing task graph");

        loop {
            while let Some(index) = ready.pop_front() {
                let Some(task) = graph.task_mut(index) else {
                    continue;
                };
                let input = match injector::resolve(&task.input, &results) {
                    Ok(input) => input,
                    Err(e) => {
                        task.status = TaskStatus::Failed;
                        task.error = Some(e.to_string());
                        let event = task_end_event(task, Duration::ZERO);
                        notify(sink, event).await;
                        self.skip_dependents(&mut graph, index, sink).await;
                        continue;
                    }
                };
                task.status = TaskStatus::Running;

                let id = task.id.clone();
                let expert = task.expert.clone();
                let start = task_start_event(task);
                let executor = self.clone();
                let node_request = request.with_message(input);
                let node_sink = Arc::clone(sink);
                let permits = Arc::clone(&semaphore);

                let handle = join_set.spawn(async move {
                    let _permit = permits.acquire_owned().await.ok();
                    notify(&node_sink, start).await;
                    let started = Instant::now();
                    let mut outcome = executor
                        .run_task(&id, expert, &node_request, &node_sink)
                        .await;
                    outcome.duration = started.elapsed();
                    (index, outcome)
                });
                running.insert(handle.id(), index);
            }

            if join_set.is_empty() {
                break;
            }

            let joined = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                joined = join_set.join_next_with_id() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok((task_id, (index, outcome))) => {
                    running.remove(&task_id);
                    usage.merge(&outcome.usage);
                    let succeeded = outcome.result.is_ok();
                    if let Some(task) = graph.task_mut(index) {
                        task.usage = outcome.usage;
                        task.expert = outcome.expert;
                        match outcome.result {
                            Ok(text) => {
                                task.status = TaskStatus::Completed;
                                results.insert(task.id.clone(), text.clone());
                                task.result = Some(text);
                            }
                            Err(e) => {
                                warn!(task = %task.id, error = %e, "task failed");
                                task.status = TaskStatus::Failed;
                                task.error = Some(e.to_string());
                            }
                        }
                        let event = task_end_event(task, outcome.duration);
                        notify(sink, event).await;
                    }

                    if succeeded {
                        for dependent in graph.dependents(index) {
                            remaining[dependent] = remaining[dependent].saturating_sub(1);
                            let pending = graph
                                .task(dependent)
                                .is_some_and(|t| t.status == TaskStatus::Pending);
                            if remaining[dependent] == 0 && pending {
                                ready.push_back(dependent);
                            }
                        }
                    } else {
                        self.skip_dependents(&mut graph, index, sink).await;
                    }
                }
                Err(join_error) => {
                    let Some(index) = running.remove(&join_error.id()) else {
                        continue;
                    };
                    if let Some(task) = graph.task_mut(index) {
                        warn!(task = %task.id, error = %join_error, "task panicked");
                        task.status = TaskStatus::Failed;
                        task.error = Some(format!("task panicked: {join_error}"));
                        let event = task_end_event(task, Duration::ZERO);
                        notify(sink, event).await;
                    }
                    self.skip_dependents(&mut graph, index, sink).await;
                }
            }
        }

        if cancelled {
            join_set.abort_all();
            while join_set.join_next().await.is_some() {}
            for index in 0..graph.len() {
                if let Some(task) = graph.task_mut(index) {
                    if !task.status.is_terminal() {
                        task.status = TaskStatus::Failed;
                        task.error = Some(HandlerError::Cancelled.to_string());
                    }
                }
            }
            info!("task graph cancelled");
        }

        ExecutionReport {
            tasks: graph.into_tasks(),
            usage,
            cancelled,
        }
    }

    async fn skip_dependents(&self, graph: &mut TaskGraph, index: usize, sink: &EventSink) {
        let failed = graph.task(index).map(|t| t.id.clone()).unwrap_or_default();
        for dependent in graph.transitive_dependents(index) {
            if let Some(task) = graph.task_mut(dependent) {
                if task.status != TaskStatus::Pending {
                    continue;
                }
                debug!(task = %task.id, upstream = %failed, "skipping dependent task");
                task.status = TaskStatus::Skipped;
                task.error = Some(format!("upstream task {failed} did not complete"));
                let event = task_end_event(task, Duration::ZERO);
                notify(sink, event).await;
            }
        }
    }

    /// One task with retries of transient failures
    async fn run_task(
        &self,
        task_id: &str,
        expert: String,
        request: &HandlerRequest,
        sink: &EventSink,
    ) -> NodeOutcome {
        let mut usage = UsageStats::default();
        let mut attempt = 0;
        loop {
            let outcome = self.run_with_handoff(task_id, &expert, request, sink).await;
            usage.merge(&outcome.usage);

            match outcome.result {
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(self.config.retry_base_delay(), attempt);
                    attempt += 1;
                    warn!(
                        task = %task_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying task"
                    );
                    tokio::select! {
                        biased;
                        () = request.cancel.cancelled() => {
                            return NodeOutcome {
                                result: Err(HandlerError::Cancelled),
                                usage,
                                expert: outcome.expert,
                                duration: Duration::ZERO,
                            };
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                result => {
                    return NodeOutcome {
                        result,
                        usage,
                        expert: outcome.expert,
                        duration: Duration::ZERO,
                    };
                }
            }
        }
    }

    /// One attempt, following handoffs on capability mismatch
    async fn run_with_handoff(
        &self,
        task_id: &str,
        expert: &str,
        request: &HandlerRequest,
        sink: &EventSink,
    ) -> NodeOutcome {
        let mut chain = HandoffChain::new(task_id, expert, self.config.max_handoff_depth);
        let mut usage = UsageStats::default();

        loop {
            let (result, used) = self.invoke(chain.current(), request, sink).await;
            usage.merge(&used);

            match result {
                Ok(text) => {
                    if chain.depth() > 0 {
                        notify(sink, chain.end_event()).await;
                    }
                    return NodeOutcome {
                        result: Ok(text),
                        usage,
                        expert: chain.current().to_string(),
                        duration: Duration::ZERO,
                    };
                }
                Err(HandlerError::Inability { capability, reason }) => {
                    let from = chain.current().to_string();
                    match chain.advance(&capability, &self.capabilities) {
                        Ok(next) => {
                            info!(task = %task_id, %from, to = %next, %capability, "handing off task");
                            notify(sink, chain.start_event(&from, &capability)).await;
                        }
                        Err(fail) => {
                            notify(sink, chain.fail_event(fail, &reason)).await;
                            return NodeOutcome {
                                result: Err(HandlerError::Inability { capability, reason }),
                                usage,
                                expert: from,
                                duration: Duration::ZERO,
                            };
                        }
                    }
                }
                Err(e) => {
                    if chain.depth() > 0 {
                        let event =
                            chain.fail_event(HandoffFailReason::TargetExecution, &e.to_string());
                        notify(sink, event).await;
                    }
                    return NodeOutcome {
                        result: Err(e),
                        usage,
                        expert: chain.current().to_string(),
                        duration: Duration::ZERO,
                    };
                }
            }
        }
    }

    /// Call one expert under the task deadline and the request's token
    async fn invoke(
        &self,
        expert: &str,
        request: &HandlerRequest,
        sink: &EventSink,
    ) -> (Result<String, HandlerError>, UsageStats) {
        let handler: Arc<dyn ChatHandler> = match self.registry.require(expert) {
            Ok(handler) => handler,
            Err(e) => return (Err(e), UsageStats::default()),
        };
        let capture = Arc::new(TaskSink::new(Arc::clone(sink)));
        let task_sink: EventSink = capture.clone();
        let timeout = self.config.task_timeout();

        let result = tokio::select! {
            biased;
            () = request.cancel.cancelled() => Err(HandlerError::Cancelled),
            run = tokio::time::timeout(timeout, handler.execute(request.clone(), task_sink)) => {
                run.unwrap_or(Err(HandlerError::Timeout {
                    duration_secs: timeout.as_secs(),
                }))
            }
        };

        match result {
            Ok(returned) => {
                let usage = if returned.is_empty() {
                    capture.reported_usage()
                } else {
                    returned
                };
                (Ok(capture.answer()), usage)
            }
            Err(e) => (Err(e), capture.reported_usage()),
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// `base * 2^attempt` plus up to half of `base` of jitter
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponential = base.saturating_mul(2u32.saturating_pow(attempt));
    let max_jitter = u64::try_from(base.as_millis() / 2).unwrap_or(u64::MAX);
    let jitter = if max_jitter == 0 {
        0
    } else {
        rand::rng().random_range(0..=max_jitter)
    };
    exponential.saturating_add(Duration::from_millis(jitter))
}

fn task_start_event(task: &Task) -> HandlerEvent {
    HandlerEvent::json(
        EventKind::TaskStart,
        &serde_json::json!({
            "id": task.id,
            "expert": task.expert,
            "purpose": task.purpose,
        }),
    )
}

fn task_end_event(task: &Task, duration: Duration) -> HandlerEvent {
    HandlerEvent::json(
        EventKind::TaskEnd,
        &serde_json::json!({
            "id": task.id,
            "expert": task.expert,
            "status": task.status.as_str(),
            "error": task.error,
            "duration_ms": duration.as_millis() as u64,
        }),
    )
}

/// Best-effort delivery of orchestration progress
pub(crate) async fn notify(sink: &EventSink, event: HandlerEvent) {
    let kind = event.kind;
    if let Err(e) = sink.emit(event).await {
        debug!(kind = kind.as_str(), error = %e, "progress event not delivered");
    }
}
