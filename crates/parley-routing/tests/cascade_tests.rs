//! Router cascade behavior against slow and failing collaborators
//!
//! Run with: cargo test --package parley-routing --test cascade_tests

use async_trait::async_trait;
use parley_core::{Intent, RouteLayer, RouterConfig, UserId};
use parley_routing::{
    FeedbackKind, RouteRequest, Router, RouterFeedback, RoutingError, SemanticClassifier,
    SemanticVerdict,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Classifier that answers after a fixed delay
struct SlowClassifier {
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl SemanticClassifier for SlowClassifier {
    async fn classify(
        &self,
        _message: &str,
        _history: &[String],
    ) -> Result<SemanticVerdict, RoutingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(SemanticVerdict::new(Intent::ScheduleQuery, 0.95))
    }
}

fn slow(delay: Duration) -> Arc<SlowClassifier> {
    Arc::new(SlowClassifier {
        delay,
        calls: AtomicUsize::new(0),
    })
}

/// Tenet: a classifier slower than the deadline yields a timeout error.
#[tokio::test(start_paused = true)]
async fn semantic_deadline_is_enforced() {
    let router = Router::new(RouterConfig::default()).with_semantic(slow(Duration::from_secs(30)));

    let err = router
        .route(&RouteRequest::new(UserId(1), "anything planned?"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err, RoutingError::Timeout { duration_ms: 10_000 });
}

/// Tenet: cancelling the request aborts the semantic call.
#[tokio::test(start_paused = true)]
async fn cancellation_aborts_semantic_call() {
    let router = Router::new(RouterConfig::default()).with_semantic(slow(Duration::from_secs(5)));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let err = router
        .route(&RouteRequest::new(UserId(1), "anything planned?"), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, RoutingError::Cancelled);
}

/// Tenet: a classifier within its deadline resolves and is cached.
#[tokio::test(start_paused = true)]
async fn semantic_verdict_within_deadline() {
    let classifier = slow(Duration::from_secs(2));
    let router = Router::new(RouterConfig::default()).with_semantic(classifier.clone());
    let cancel = CancellationToken::new();
    let request = RouteRequest::new(UserId(7), "anything planned?");

    let first = router.route(&request, &cancel).await.unwrap();
    let second = router.route(&request, &cancel).await.unwrap();

    assert_eq!(first.layer, RouteLayer::Semantic);
    assert_eq!(first.target.as_deref(), Some("schedule"));
    assert_eq!(second.layer, RouteLayer::Cache);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
}

/// Tenet: feedback teaches the weighted layer to resolve a user's vocabulary.
#[tokio::test]
async fn feedback_teaches_weighted_layer() {
    let router = Router::new(RouterConfig::default());
    let cancel = CancellationToken::new();
    let request = RouteRequest::new(UserId(3), "journal draft");

    let before = router.route(&request, &cancel).await.unwrap();
    assert!(before.needs_decomposition);

    router
        .record_feedback(RouterFeedback::new(
            UserId(3),
            "journal draft",
            Intent::MemoCreate,
            Intent::MemoCreate,
            FeedbackKind::Positive,
            RouteLayer::Weighted,
        ))
        .await
        .unwrap();

    let after = router.route(&request, &cancel).await.unwrap();
    assert_eq!(after.layer, RouteLayer::Weighted);
    assert_eq!(after.target.as_deref(), Some("memo"));
}
