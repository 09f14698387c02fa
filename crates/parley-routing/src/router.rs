//! Layered router
//!
//! Evaluation order, cheapest first:
//! 0. multi-intent detection → decomposition
//! 1. cache
//! 2. rules
//! 3. history
//! 4. adaptive weights
//! 5. semantic classifier
//!
//! A layer's verdict is accepted at or above the accept threshold. A
//! failing layer is logged and skipped; if nothing resolves, the first
//! layer error is returned, otherwise the result asks for decomposition.

use crate::cache::{cache_key, RouteCache, RouteCacheStats};
use crate::detector::MultiIntentDetector;
use crate::error::RoutingError;
use crate::feedback::{RouterFeedback, RouterStats};
use crate::history::HistoryMatcher;
use crate::lexicon;
use crate::rules::RuleMatcher;
use crate::semantic::SemanticClassifier;
use crate::weights::{InMemoryWeightStore, WeightStore, WeightedMatcher};
use parley_core::{now_millis, RouteLayer, RouteResult, RouterConfig, UserId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Input of one routing decision
#[derive(Debug, Clone, Default)]
pub struct RouteRequest {
    pub user_id: UserId,
    pub message: String,
    /// Prior turns, oldest first
    pub history: Vec<String>,
    /// Last route taken in this conversation
    pub last_route: Option<RouteResult>,
}

impl RouteRequest {
    #[must_use]
    pub fn new(user_id: UserId, message: impl Into<String>) -> Self {
        Self {
            user_id,
            message: message.into(),
            ..Self::default()
        }
    }

    /// With last route of the conversation
    #[must_use]
    pub fn with_last_route(mut self, last_route: RouteResult) -> Self {
        self.last_route = Some(last_route);
        self
    }

    /// With prior turns
    #[must_use]
    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.history = history;
        self
    }
}

/// Layered intent router
pub struct Router {
    config: RouterConfig,
    detector: MultiIntentDetector,
    cache: Option<RouteCache>,
    rules: RuleMatcher,
    history: Option<HistoryMatcher>,
    weighted: Option<WeightedMatcher>,
    semantic: Option<Arc<dyn SemanticClassifier>>,
}

impl Router {
    /// Router with an in-memory weight store and no semantic classifier
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        let cache = config.enable_cache.then(|| {
            RouteCache::new(
                config.cache_capacity,
                config.cache_ttl(),
                config.semantic_cache_ttl(),
            )
        });
        let history = config
            .enable_history
            .then(|| HistoryMatcher::new(config.history_size, config.history_similarity));
        let weighted = config
            .enable_weighted
            .then(|| WeightedMatcher::new(Arc::new(InMemoryWeightStore::new())));

        Self {
            config,
            detector: MultiIntentDetector::new(),
            cache,
            rules: RuleMatcher::new(),
            history,
            weighted,
            semantic: None,
        }
    }

    /// With semantic fallback
    #[must_use]
    pub fn with_semantic(mut self, classifier: Arc<dyn SemanticClassifier>) -> Self {
        self.semantic = Some(classifier);
        self
    }

    /// With weight persistence
    #[must_use]
    pub fn with_weight_store(mut self, store: Arc<dyn WeightStore>) -> Self {
        if self.config.enable_weighted {
            self.weighted = Some(WeightedMatcher::new(store));
        }
        self
    }

    /// Decide where a message goes
    pub async fn route(
        &self,
        request: &RouteRequest,
        cancel: &CancellationToken,
    ) -> Result<RouteResult, RoutingError> {
        if cancel.is_cancelled() {
            return Err(RoutingError::Cancelled);
        }
        let started = Instant::now();
        let normalized = lexicon::normalize(&request.message);

        if let Some(reason) = self.detector.detect(&normalized) {
            tracing::debug!(user_id = %request.user_id, ?reason, "multi-intent message");
            return Ok(RouteResult::decompose());
        }

        let key = cache_key(request.user_id, &normalized);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&key).await {
                record_resolution(RouteLayer::Cache, started);
                return Ok(hit.with_layer(RouteLayer::Cache));
            }
        }

        if let Some(verdict) = self.rules.evaluate(&normalized) {
            if self.accepts(&verdict) {
                return Ok(self
                    .accept(request.user_id, key, &normalized, verdict, true, started)
                    .await);
            }
        }

        if let Some(history) = &self.history {
            let found = history.evaluate(
                request.user_id,
                &normalized,
                request.last_route.as_ref(),
            );
            if let Some(found) = found.filter(|m| self.accepts(&m.result)) {
                let context_free = !found.kind.is_contextual();
                return Ok(self
                    .accept(request.user_id, key, &normalized, found.result, context_free, started)
                    .await);
            }
        }

        let mut first_error: Option<RoutingError> = None;

        if let Some(weighted) = &self.weighted {
            match weighted.evaluate(request.user_id, &normalized).await {
                Ok(Some(verdict)) if self.accepts(&verdict) => {
                    return Ok(self
                        .accept(request.user_id, key, &normalized, verdict, true, started)
                        .await);
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(layer = "weighted", error = %err, "routing layer failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(classifier) = &self.semantic {
            match self.classify(classifier.as_ref(), request, cancel).await {
                Ok(Some(verdict)) if self.accepts(&verdict) => {
                    return Ok(self
                        .accept(request.user_id, key, &normalized, verdict, true, started)
                        .await);
                }
                Ok(_) => {}
                Err(RoutingError::Cancelled) => return Err(RoutingError::Cancelled),
                Err(err) => {
                    tracing::warn!(layer = "semantic", error = %err, "routing layer failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                record_resolution(RouteLayer::None, started);
                Ok(RouteResult::decompose())
            }
        }
    }

    async fn classify(
        &self,
        classifier: &dyn SemanticClassifier,
        request: &RouteRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<RouteResult>, RoutingError> {
        let deadline = self.config.semantic_timeout();
        let call = classifier.classify(&request.message, &request.history);

        let verdict = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RoutingError::Cancelled),
            outcome = tokio::time::timeout(deadline, call) => match outcome {
                Ok(verdict) => verdict?,
                Err(_) => {
                    return Err(RoutingError::Timeout {
                        duration_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                    })
                }
            },
        };

        if verdict.intent.domain().is_none() {
            return Ok(None);
        }
        Ok(Some(RouteResult::resolved(
            verdict.intent,
            RouteLayer::Semantic,
            verdict.confidence,
        )))
    }

    fn accepts(&self, verdict: &RouteResult) -> bool {
        verdict.is_resolved() && verdict.confidence >= self.config.accept_threshold
    }

    async fn accept(
        &self,
        user: UserId,
        key: String,
        normalized: &str,
        verdict: RouteResult,
        context_free: bool,
        started: Instant,
    ) -> RouteResult {
        // verdicts that depend on the conversation are neither cached nor learned
        if context_free {
            if let Some(cache) = &self.cache {
                cache.insert(key, verdict.clone()).await;
            }
            if let Some(history) = &self.history {
                history.record(user, normalized, verdict.intent);
            }
        }
        record_resolution(verdict.layer, started);
        tracing::debug!(
            user_id = %user,
            layer = %verdict.layer,
            intent = %verdict.intent,
            confidence = verdict.confidence,
            "route resolved"
        );
        verdict
    }

    /// Learn from the user's reaction to a routing decision.
    ///
    /// Also drops the cached verdict for the input so the next request is
    /// re-evaluated with the new weights.
    pub async fn record_feedback(&self, feedback: RouterFeedback) -> Result<(), RoutingError> {
        let normalized = lexicon::normalize(&feedback.input);

        if let Some(cache) = &self.cache {
            cache
                .invalidate(&cache_key(feedback.user_id, &normalized))
                .await;
        }

        let Some(weighted) = &self.weighted else {
            return Ok(());
        };
        if let Err(err) = weighted.store().record_feedback(&feedback).await {
            tracing::warn!(user_id = %feedback.user_id, error = %err, "feedback not persisted");
        }
        weighted.apply_feedback(&feedback, &normalized).await
    }

    /// Accuracy of `user`'s routes over the trailing `window`
    pub async fn router_stats(
        &self,
        user: UserId,
        window: Duration,
    ) -> Result<RouterStats, RoutingError> {
        let Some(weighted) = &self.weighted else {
            return Ok(RouterStats::default());
        };
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let since = now_millis().saturating_sub(window_ms);
        let records = weighted.store().feedback_since(user, since).await?;
        Ok(RouterStats::from_feedback(&records))
    }

    /// Cache counters; zero when caching is disabled
    #[must_use]
    pub fn cache_stats(&self) -> RouteCacheStats {
        self.cache
            .as_ref()
            .map(RouteCache::stats)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("semantic", &self.semantic.is_some())
            .finish_non_exhaustive()
    }
}

fn record_resolution(layer: RouteLayer, started: Instant) {
    metrics::counter!("parley.router.layer_resolution", "layer" => layer.as_str()).increment(1);
    tracing::trace!(
        layer = %layer,
        elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
        "routing layer finished"
    );
}
