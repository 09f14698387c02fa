//! Routing feedback and accuracy statistics

use parley_core::{now_millis, Intent, RouteLayer, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// User reaction to a routing decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// The user kept going with the routed handler
    Positive,
    /// The user rephrased the request
    Rephrase,
    /// The user explicitly switched handlers
    Switch,
}

impl FeedbackKind {
    /// Weight delta applied to the predicted domain's matched keywords
    #[must_use]
    pub fn predicted_delta(&self) -> i32 {
        match self {
            Self::Positive => 1,
            Self::Rephrase => -1,
            Self::Switch => -2,
        }
    }
}

/// One feedback record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterFeedback {
    pub user_id: UserId,
    pub input: String,
    pub predicted: Intent,
    pub actual: Intent,
    pub kind: FeedbackKind,
    /// Layer that produced the prediction
    pub layer: RouteLayer,
    pub timestamp: i64,
}

impl RouterFeedback {
    /// Feedback stamped now
    #[must_use]
    pub fn new(
        user_id: UserId,
        input: impl Into<String>,
        predicted: Intent,
        actual: Intent,
        kind: FeedbackKind,
        layer: RouteLayer,
    ) -> Self {
        Self {
            user_id,
            input: input.into(),
            predicted,
            actual,
            kind,
            layer,
            timestamp: now_millis(),
        }
    }

    /// Whether the prediction turned out right
    #[must_use]
    pub fn is_correct(&self) -> bool {
        self.kind == FeedbackKind::Positive && self.predicted == self.actual
    }
}

/// Routing accuracy over a time window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterStats {
    pub total: u64,
    pub correct: u64,
    pub incorrect: u64,
    pub accuracy: f64,
    pub by_intent: BTreeMap<Intent, u64>,
    pub by_layer: BTreeMap<RouteLayer, u64>,
}

impl RouterStats {
    /// Aggregate feedback records
    #[must_use]
    pub fn from_feedback<'a>(records: impl IntoIterator<Item = &'a RouterFeedback>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.total += 1;
            if record.is_correct() {
                stats.correct += 1;
            } else {
                stats.incorrect += 1;
            }
            *stats.by_intent.entry(record.predicted).or_default() += 1;
            *stats.by_layer.entry(record.layer).or_default() += 1;
        }
        if stats.total > 0 {
            stats.accuracy = stats.correct as f64 / stats.total as f64;
        }
        stats
    }
}
