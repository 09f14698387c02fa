//! Lifecycle event bus
//!
//! Listeners of an event kind run concurrently, each under its own deadline
//! and panic boundary and with a child of the publisher's cancellation
//! token. A failed listener only loses its own result.

use crate::error::BusError;
use crate::event::{LifecycleEvent, LifecycleEventKind};
use async_trait::async_trait;
use parking_lot::RwLock;
use parley_core::BusConfig;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Reacts to lifecycle events
#[async_trait]
pub trait LifecycleListener: Send + Sync {
    /// Handle one event; the token is cancelled when the publisher gives up
    async fn on_event(
        &self,
        event: &LifecycleEvent,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, BusError>;
}

/// Results of one publish
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOutcome {
    /// Output of each successful listener, by subscription index
    pub results: BTreeMap<usize, serde_json::Value>,
    /// First failure observed
    pub first_error: Option<BusError>,
}

impl PublishOutcome {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.first_error.is_none()
    }

    #[must_use]
    pub fn result(&self, index: usize) -> Option<&serde_json::Value> {
        self.results.get(&index)
    }

    /// Results, or the first error if any listener failed
    pub fn into_result(self) -> Result<BTreeMap<usize, serde_json::Value>, BusError> {
        match self.first_error {
            Some(e) => Err(e),
            None => Ok(self.results),
        }
    }

    fn record_error(&mut self, error: BusError) {
        self.first_error.get_or_insert(error);
    }
}

/// Publish/subscribe hub for conversation lifecycle events
pub struct LifecycleBus {
    listeners: RwLock<HashMap<LifecycleEventKind, Vec<Arc<dyn LifecycleListener>>>>,
    timeout: Duration,
}

impl LifecycleBus {
    #[must_use]
    pub fn new(config: &BusConfig) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            timeout: config.listener_timeout(),
        }
    }

    /// Per-listener deadline
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register `listener` for `kind`; returns its index for that kind
    pub fn subscribe(&self, kind: LifecycleEventKind, listener: Arc<dyn LifecycleListener>) -> usize {
        let mut listeners = self.listeners.write();
        let entry = listeners.entry(kind).or_default();
        entry.push(listener);
        entry.len() - 1
    }

    #[must_use]
    pub fn listener_count(&self, kind: LifecycleEventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    /// Deliver `event` to every listener of its kind and wait for all of them
    pub async fn publish(&self, event: LifecycleEvent, cancel: &CancellationToken) -> PublishOutcome {
        let kind = event.kind;
        let listeners: Vec<Arc<dyn LifecycleListener>> = self
            .listeners
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        let mut outcome = PublishOutcome::default();
        if listeners.is_empty() {
            debug!(%kind, "no listeners");
            return outcome;
        }

        let event = Arc::new(event);
        let timeout = self.timeout;
        let mut join_set = JoinSet::new();
        let mut indices = HashMap::with_capacity(listeners.len());

        for (index, listener) in listeners.into_iter().enumerate() {
            let event = Arc::clone(&event);
            let token = cancel.child_token();
            let handle = join_set.spawn(async move {
                let result = tokio::select! {
                    biased;
                    () = token.cancelled() => Err(BusError::Cancelled(kind)),
                    run = tokio::time::timeout(timeout, listener.on_event(&event, token.clone())) => {
                        run.unwrap_or_else(|_| {
                            Err(BusError::ListenerTimeout {
                                kind,
                                index,
                                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                            })
                        })
                    }
                };
                // stop anything the listener left running
                token.cancel();
                (index, result)
            });
            indices.insert(handle.id(), index);
        }

        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((_, (index, Ok(value)))) => {
                    outcome.results.insert(index, value);
                }
                Ok((_, (index, Err(e)))) => {
                    warn!(%kind, index, error = %e, "listener failed, result discarded");
                    metrics::counter!("parley.bus.listener_failure", "kind" => kind.as_str())
                        .increment(1);
                    outcome.record_error(e);
                }
                Err(join_error) => {
                    let index = indices.get(&join_error.id()).copied().unwrap_or_default();
                    warn!(%kind, index, error = %join_error, "listener panicked");
                    metrics::counter!("parley.bus.listener_failure", "kind" => kind.as_str())
                        .increment(1);
                    outcome.record_error(BusError::ListenerPanicked {
                        kind,
                        index,
                        message: join_error.to_string(),
                    });
                }
            }
        }

        outcome
    }
}

impl std::fmt::Debug for LifecycleBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: BTreeMap<LifecycleEventKind, usize> = self
            .listeners
            .read()
            .iter()
            .map(|(k, v)| (*k, v.len()))
            .collect();
        f.debug_struct("LifecycleBus")
            .field("listeners", &counts)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{ConversationId, UserId};

    struct Constant(i64);

    #[async_trait]
    impl LifecycleListener for Constant {
        async fn on_event(
            &self,
            _event: &LifecycleEvent,
            _cancel: CancellationToken,
        ) -> Result<serde_json::Value, BusError> {
            Ok(serde_json::json!(self.0))
        }
    }

    fn event() -> LifecycleEvent {
        LifecycleEvent::conversation_start(UserId(1), ConversationId::NEW, "memo", false)
    }

    #[test]
    fn subscribe_returns_indices_per_kind() {
        let bus = LifecycleBus::new(&BusConfig::default());
        assert_eq!(bus.subscribe(LifecycleEventKind::ConversationStart, Arc::new(Constant(1))), 0);
        assert_eq!(bus.subscribe(LifecycleEventKind::ConversationStart, Arc::new(Constant(2))), 1);
        assert_eq!(bus.subscribe(LifecycleEventKind::Separator, Arc::new(Constant(3))), 0);
        assert_eq!(bus.listener_count(LifecycleEventKind::ConversationStart), 2);
        assert_eq!(bus.listener_count(LifecycleEventKind::BlockCompleted), 0);
    }

    #[tokio::test]
    async fn results_are_keyed_by_index() {
        let bus = LifecycleBus::new(&BusConfig::default());
        bus.subscribe(LifecycleEventKind::ConversationStart, Arc::new(Constant(10)));
        bus.subscribe(LifecycleEventKind::ConversationStart, Arc::new(Constant(20)));

        let outcome = bus.publish(event(), &CancellationToken::new()).await;
        assert!(outcome.is_ok());
        assert_eq!(outcome.result(0), Some(&serde_json::json!(10)));
        assert_eq!(outcome.result(1), Some(&serde_json::json!(20)));
    }

    #[tokio::test]
    async fn no_listeners_is_empty_success() {
        let bus = LifecycleBus::new(&BusConfig::default());
        let results = bus
            .publish(event(), &CancellationToken::new())
            .await
            .into_result()
            .unwrap();
        assert!(results.is_empty());
    }
}
