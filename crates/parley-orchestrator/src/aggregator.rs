//! Result aggregation

use crate::error::OrchestratorError;
use crate::executor::{notify, ExecutionReport};
use crate::task::Task;
use async_trait::async_trait;
use parley_core::{EventKind, EventSink, HandlerEvent, HandlerRequest, UsageStats};
use std::sync::Arc;
use tracing::{info, warn};

/// Separator between concatenated results
pub const RESULT_SEPARATOR: &str = "\n\n---\n\n";

/// External service merging several task results into one answer
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        request: &str,
        completed: &[Task],
    ) -> Result<(String, UsageStats), OrchestratorError>;
}

/// Final answer plus usage of every task and of the synthesis call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregated {
    pub content: String,
    pub usage: UsageStats,
    /// Whether the content was merged from several results
    pub merged: bool,
}

/// Merges an execution report into one answer
#[derive(Clone, Default)]
pub struct Aggregator {
    synthesizer: Option<Arc<dyn Synthesizer>>,
}

impl Aggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Merge the completed results of `report`.
    ///
    /// Fails only when no task completed.
    pub async fn aggregate(
        &self,
        request: &HandlerRequest,
        report: &ExecutionReport,
        synthesize: bool,
        sink: &EventSink,
    ) -> Result<Aggregated, OrchestratorError> {
        let completed: Vec<Task> = report
            .completed()
            .filter(|t| t.result.as_deref().is_some_and(|r| !r.trim().is_empty()))
            .cloned()
            .collect();
        let mut usage = report.usage.clone();

        match completed.as_slice() {
            [] => {
                let reasons: Vec<String> = report
                    .unsuccessful()
                    .map(|t| format!("{}: {}", t.id, t.error.as_deref().unwrap_or(t.status.as_str())))
                    .collect();
                Err(OrchestratorError::NothingCompleted(reasons.join("; ")))
            }
            [only] => Ok(Aggregated {
                content: only.result.clone().unwrap_or_default(),
                usage,
                merged: false,
            }),
            many => {
                let concatenated = || {
                    many.iter()
                        .filter_map(|t| t.result.as_deref())
                        .collect::<Vec<_>>()
                        .join(RESULT_SEPARATOR)
                };

                let Some(synthesizer) = self.synthesizer.as_ref().filter(|_| synthesize) else {
                    return Ok(Aggregated {
                        content: concatenated(),
                        usage,
                        merged: true,
                    });
                };

                let outcome = tokio::select! {
                    biased;
                    () = request.cancel.cancelled() => Err(OrchestratorError::Cancelled),
                    merged = synthesizer.synthesize(&request.message, many) => merged,
                };

                match outcome {
                    Ok((content, synthesis_usage)) => {
                        usage.merge(&synthesis_usage);
                        info!(inputs = many.len(), len = content.len(), "results synthesized");
                        notify(
                            sink,
                            HandlerEvent::json(
                                EventKind::Aggregation,
                                &serde_json::json!({ "tasks": many.len() }),
                            ),
                        )
                        .await;
                        Ok(Aggregated {
                            content,
                            usage,
                            merged: true,
                        })
                    }
                    Err(OrchestratorError::Cancelled) => Err(OrchestratorError::Cancelled),
                    Err(e) => {
                        warn!(error = %e, "synthesis failed, concatenating results");
                        notify(
                            sink,
                            HandlerEvent::json(
                                EventKind::AggregationFallback,
                                &serde_json::json!({ "reason": e.to_string() }),
                            ),
                        )
                        .await;
                        Ok(Aggregated {
                            content: concatenated(),
                            usage,
                            merged: true,
                        })
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("synthesizer", &self.synthesizer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;
    use parking_lot::Mutex;
    use parley_core::{EmitError, EventEmitter, UserId};

    #[derive(Default)]
    struct Collect(Mutex<Vec<HandlerEvent>>);

    #[async_trait]
    impl EventEmitter for Collect {
        async fn emit(&self, event: HandlerEvent) -> Result<(), EmitError> {
            self.0.lock().push(event);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Synthesizer for Failing {
        async fn synthesize(
            &self,
            _request: &str,
            _completed: &[Task],
        ) -> Result<(String, UsageStats), OrchestratorError> {
            Err(OrchestratorError::Synthesis("model unavailable".into()))
        }
    }

    struct Joining;

    #[async_trait]
    impl Synthesizer for Joining {
        async fn synthesize(
            &self,
            _request: &str,
            completed: &[Task],
        ) -> Result<(String, UsageStats), OrchestratorError> {
            let ids: Vec<&str> = completed.iter().map(|t| t.id.as_str()).collect();
            Ok((
                format!("merged {}", ids.join("+")),
                UsageStats {
                    output_tokens: 5,
                    ..UsageStats::default()
                },
            ))
        }
    }

    fn done(id: &str, result: &str, tokens: u64) -> Task {
        let mut task = Task::new(id, "memo", "x");
        task.status = TaskStatus::Completed;
        task.result = Some(result.to_string());
        task.usage.input_tokens = tokens;
        task
    }

    fn report(tasks: Vec<Task>) -> ExecutionReport {
        let mut usage = UsageStats::default();
        for t in &tasks {
            usage.merge(&t.usage);
        }
        ExecutionReport {
            tasks,
            usage,
            cancelled: false,
        }
    }

    #[tokio::test]
    async fn single_result_passes_through() {
        let sink: EventSink = Arc::new(Collect::default());
        let request = HandlerRequest::new("q", UserId(1));
        let out = Aggregator::new()
            .with_synthesizer(Arc::new(Joining))
            .aggregate(&request, &report(vec![done("t1", "only", 3)]), true, &sink)
            .await
            .unwrap();
        assert_eq!(out.content, "only");
        assert!(!out.merged);
        assert_eq!(out.usage.input_tokens, 3);
    }

    #[tokio::test]
    async fn synthesis_adds_its_usage() {
        let sink: EventSink = Arc::new(Collect::default());
        let request = HandlerRequest::new("q", UserId(1));
        let out = Aggregator::new()
            .with_synthesizer(Arc::new(Joining))
            .aggregate(
                &request,
                &report(vec![done("t1", "a", 3), done("t2", "b", 4)]),
                true,
                &sink,
            )
            .await
            .unwrap();
        assert_eq!(out.content, "merged t1+t2");
        assert_eq!(out.usage.input_tokens, 7);
        assert_eq!(out.usage.output_tokens, 5);
    }

    #[tokio::test]
    async fn failed_synthesis_concatenates_and_reports_fallback() {
        let collect = Arc::new(Collect::default());
        let sink: EventSink = collect.clone();
        let request = HandlerRequest::new("q", UserId(1));
        let out = Aggregator::new()
            .with_synthesizer(Arc::new(Failing))
            .aggregate(
                &request,
                &report(vec![done("t1", "a", 1), done("t2", "b", 1)]),
                true,
                &sink,
            )
            .await
            .unwrap();

        assert_eq!(out.content, "a\n\n---\n\nb");
        let events = collect.0.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::AggregationFallback);
    }

    #[tokio::test]
    async fn nothing_completed_is_an_error() {
        let sink: EventSink = Arc::new(Collect::default());
        let request = HandlerRequest::new("q", UserId(1));
        let mut failed = Task::new("t1", "memo", "x");
        failed.status = TaskStatus::Failed;
        failed.error = Some("boom".into());

        let err = Aggregator::new()
            .aggregate(&request, &report(vec![failed]), true, &sink)
            .await
            .unwrap_err();
        assert_eq!(err, OrchestratorError::NothingCompleted("t1: boom".into()));
    }
}
