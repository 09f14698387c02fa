//! Per-task event sink
//!
//! Answer fragments become the task's result instead of reaching the
//! client; usage reports are kept for aggregation; everything else is
//! forwarded to the orchestrator's own sink.

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_core::{EmitError, EventEmitter, EventKind, EventSink, HandlerEvent, UsageStats};

pub(crate) struct TaskSink {
    parent: EventSink,
    answer: Mutex<String>,
    usage: Mutex<UsageStats>,
}

impl TaskSink {
    pub(crate) fn new(parent: EventSink) -> Self {
        Self {
            parent,
            answer: Mutex::new(String::new()),
            usage: Mutex::new(UsageStats::default()),
        }
    }

    /// Concatenated answer fragments
    pub(crate) fn answer(&self) -> String {
        self.answer.lock().clone()
    }

    /// Usage reported through `session_stats` events
    pub(crate) fn reported_usage(&self) -> UsageStats {
        self.usage.lock().clone()
    }
}

#[async_trait]
impl EventEmitter for TaskSink {
    async fn emit(&self, event: HandlerEvent) -> Result<(), EmitError> {
        match event.kind {
            EventKind::Answer => {
                self.answer.lock().push_str(&event.content);
                Ok(())
            }
            EventKind::SessionStats => {
                match serde_json::from_str::<UsageStats>(&event.content) {
                    Ok(reported) => self.usage.lock().merge(&reported),
                    Err(e) => tracing::debug!(error = %e, "ignoring malformed usage report"),
                }
                Ok(())
            }
            _ => self.parent.emit(event).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct Collect(Mutex<Vec<HandlerEvent>>);

    #[async_trait]
    impl EventEmitter for Collect {
        async fn emit(&self, event: HandlerEvent) -> Result<(), EmitError> {
            self.0.lock().push(event);
            Ok(())
        }
    }

    #[tokio::test]
    async fn answers_are_captured_and_the_rest_forwarded() {
        let parent = Arc::new(Collect::default());
        let sink = TaskSink::new(parent.clone());

        sink.emit(HandlerEvent::thinking("looking")).await.unwrap();
        sink.emit(HandlerEvent::answer("hello ")).await.unwrap();
        sink.emit(HandlerEvent::answer("world")).await.unwrap();
        sink.emit(HandlerEvent::session_stats(&UsageStats {
            output_tokens: 7,
            ..UsageStats::default()
        }))
        .await
        .unwrap();

        assert_eq!(sink.answer(), "hello world");
        assert_eq!(sink.reported_usage().output_tokens, 7);

        let forwarded = parent.0.lock();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].kind, EventKind::Thinking);
    }
}
