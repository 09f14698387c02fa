//! Adaptive keyword weights
//!
//! Each domain has base keyword weights. Users accumulate their own
//! weights through feedback; a user weight replaces the base weight of the
//! same keyword. A domain's score is the sum of its matched keyword weights,
//! normalized against the domain maximum.

use crate::error::RoutingError;
use crate::feedback::{FeedbackKind, RouterFeedback};
use crate::lexicon;
use async_trait::async_trait;
use parking_lot::RwLock;
use parley_core::{Domain, RouteLayer, RouteResult, UserId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Learned weights of one user: domain → keyword → weight
pub type UserWeights = BTreeMap<Domain, BTreeMap<String, i32>>;

const MIN_WEIGHT: i32 = 1;
const MAX_WEIGHT: i32 = 5;
const FULL_CONFIDENCE: f32 = 0.95;

/// Persistence of learned weights and feedback
#[async_trait]
pub trait WeightStore: Send + Sync {
    async fn weights(&self, user: UserId) -> Result<UserWeights, RoutingError>;

    async fn save_weights(&self, user: UserId, weights: UserWeights) -> Result<(), RoutingError>;

    async fn record_feedback(&self, feedback: &RouterFeedback) -> Result<(), RoutingError>;

    /// Feedback of `user` at or after `since_ms`
    async fn feedback_since(
        &self,
        user: UserId,
        since_ms: i64,
    ) -> Result<Vec<RouterFeedback>, RoutingError>;
}

/// Process-local [`WeightStore`]
#[derive(Debug, Default)]
pub struct InMemoryWeightStore {
    weights: RwLock<HashMap<UserId, UserWeights>>,
    feedback: RwLock<Vec<RouterFeedback>>,
}

impl InMemoryWeightStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WeightStore for InMemoryWeightStore {
    async fn weights(&self, user: UserId) -> Result<UserWeights, RoutingError> {
        Ok(self.weights.read().get(&user).cloned().unwrap_or_default())
    }

    async fn save_weights(&self, user: UserId, weights: UserWeights) -> Result<(), RoutingError> {
        self.weights.write().insert(user, weights);
        Ok(())
    }

    async fn record_feedback(&self, feedback: &RouterFeedback) -> Result<(), RoutingError> {
        self.feedback.write().push(feedback.clone());
        Ok(())
    }

    async fn feedback_since(
        &self,
        user: UserId,
        since_ms: i64,
    ) -> Result<Vec<RouterFeedback>, RoutingError> {
        Ok(self
            .feedback
            .read()
            .iter()
            .filter(|f| f.user_id == user && f.timestamp >= since_ms)
            .cloned()
            .collect())
    }
}

/// Per-user weighted keyword matcher
#[derive(Clone)]
pub struct WeightedMatcher {
    store: Arc<dyn WeightStore>,
}

impl WeightedMatcher {
    #[must_use]
    pub fn new(store: Arc<dyn WeightStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn WeightStore> {
        &self.store
    }

    /// Best normalized domain score for a normalized message
    pub async fn evaluate(
        &self,
        user: UserId,
        normalized: &str,
    ) -> Result<Option<RouteResult>, RoutingError> {
        let learned = self.store.weights(user).await?;

        let best = [Domain::Memo, Domain::Schedule]
            .into_iter()
            .map(|d| (d, confidence(d, domain_score(d, &learned, normalized))))
            .filter(|(_, c)| *c > 0.0)
            .fold(None::<(Domain, f32)>, |best, candidate| match best {
                Some((_, c)) if c >= candidate.1 => best,
                _ => Some(candidate),
            });

        Ok(best.map(|(domain, confidence)| {
            let intent = lexicon::refine_intent(
                domain,
                &lexicon::actions(normalized),
                lexicon::has_time_expression(normalized),
            );
            RouteResult::resolved(intent, RouteLayer::Weighted, confidence)
        }))
    }

    /// Adjust the user's weights from one feedback record.
    ///
    /// - positive: +1 on the actual domain's matched keywords, only if the
    ///   prediction was right
    /// - rephrase: -1 on the predicted domain's matched keywords
    /// - switch: -2 on the predicted domain, +1 on the actual domain
    ///
    /// Weights stay within 1..=5.
    pub async fn apply_feedback(
        &self,
        feedback: &RouterFeedback,
        normalized_input: &str,
    ) -> Result<(), RoutingError> {
        let mut learned = self.store.weights(feedback.user_id).await?;
        let predicted = feedback.predicted.domain();
        let actual = feedback.actual.domain();

        match feedback.kind {
            FeedbackKind::Positive => {
                if feedback.predicted != feedback.actual {
                    return Ok(());
                }
                if let Some(domain) = actual {
                    adjust(&mut learned, domain, normalized_input, 1);
                }
            }
            FeedbackKind::Rephrase | FeedbackKind::Switch => {
                if let Some(domain) = predicted {
                    adjust(
                        &mut learned,
                        domain,
                        normalized_input,
                        feedback.kind.predicted_delta(),
                    );
                }
                if feedback.kind == FeedbackKind::Switch {
                    if let Some(domain) = actual.filter(|d| Some(*d) != predicted) {
                        adjust(&mut learned, domain, normalized_input, 1);
                    }
                }
            }
        }

        self.store.save_weights(feedback.user_id, learned).await
    }
}

impl std::fmt::Debug for WeightedMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightedMatcher").finish_non_exhaustive()
    }
}

/// Effective weights of `domain`: base weights overridden by learned ones
fn effective_weights(domain: Domain, learned: &UserWeights) -> BTreeMap<String, i32> {
    let mut weights: BTreeMap<String, i32> = lexicon::base_weights(domain)
        .iter()
        .map(|(k, w)| ((*k).to_string(), *w))
        .collect();
    if let Some(user) = learned.get(&domain) {
        weights.extend(user.iter().map(|(k, w)| (k.clone(), *w)));
    }
    weights
}

fn domain_score(domain: Domain, learned: &UserWeights, normalized: &str) -> i32 {
    effective_weights(domain, learned)
        .iter()
        .filter(|(keyword, _)| lexicon::contains_keyword(normalized, keyword))
        .map(|(_, weight)| *weight)
        .sum()
}

fn confidence(domain: Domain, score: i32) -> f32 {
    let max = lexicon::domain_max_score(domain);
    if score <= 0 {
        0.0
    } else if score >= max {
        FULL_CONFIDENCE
    } else {
        score as f32 / max as f32
    }
}

fn adjust(learned: &mut UserWeights, domain: Domain, normalized: &str, delta: i32) {
    let current = effective_weights(domain, learned);
    let entry = learned.entry(domain).or_default();
    for (keyword, weight) in current {
        if lexicon::contains_keyword(normalized, &keyword) {
            let updated = (weight + delta).clamp(MIN_WEIGHT, MAX_WEIGHT);
            tracing::debug!(%domain, %keyword, old = weight, new = updated, "weight adjusted");
            entry.insert(keyword, updated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::Intent;

    fn matcher() -> (Arc<InMemoryWeightStore>, WeightedMatcher) {
        let store = Arc::new(InMemoryWeightStore::new());
        (store.clone(), WeightedMatcher::new(store))
    }

    #[tokio::test]
    async fn base_weights_normalize_per_domain() {
        let (_store, matcher) = matcher();
        let verdict = matcher
            .evaluate(UserId(1), "journal draft")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.intent, Intent::MemoSearch);
        assert!((verdict.confidence - 0.6).abs() < 1e-6);
        assert_eq!(verdict.layer, RouteLayer::Weighted);

        assert!(matcher.evaluate(UserId(1), "hello").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn positive_feedback_raises_confidence() {
        let (_store, matcher) = matcher();
        let feedback = RouterFeedback::new(
            UserId(1),
            "journal draft",
            Intent::MemoCreate,
            Intent::MemoCreate,
            FeedbackKind::Positive,
            RouteLayer::Weighted,
        );
        matcher.apply_feedback(&feedback, "journal draft").await.unwrap();

        let verdict = matcher
            .evaluate(UserId(1), "journal draft")
            .await
            .unwrap()
            .unwrap();
        assert!((verdict.confidence - 0.95).abs() < 1e-6);

        // other users keep base weights
        let other = matcher
            .evaluate(UserId(2), "journal draft")
            .await
            .unwrap()
            .unwrap();
        assert!((other.confidence - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn switch_moves_weight_between_domains() {
        let (store, matcher) = matcher();
        let feedback = RouterFeedback::new(
            UserId(1),
            "deadline notes",
            Intent::MemoSearch,
            Intent::ScheduleQuery,
            FeedbackKind::Switch,
            RouteLayer::Rule,
        );
        matcher
            .apply_feedback(&feedback, "deadline notes")
            .await
            .unwrap();

        let learned = store.weights(UserId(1)).await.unwrap();
        assert_eq!(learned[&Domain::Memo]["notes"], 1);
        assert_eq!(learned[&Domain::Schedule]["deadline"], 3);
    }

    #[tokio::test]
    async fn weights_are_clamped() {
        let (store, matcher) = matcher();
        for _ in 0..10 {
            let feedback = RouterFeedback::new(
                UserId(1),
                "memo",
                Intent::MemoSearch,
                Intent::MemoSearch,
                FeedbackKind::Positive,
                RouteLayer::Rule,
            );
            matcher.apply_feedback(&feedback, "memo").await.unwrap();
        }
        assert_eq!(store.weights(UserId(1)).await.unwrap()[&Domain::Memo]["memo"], 5);
    }
}
