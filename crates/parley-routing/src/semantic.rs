//! Semantic fallback contract
//!
//! The classifier is an external reasoning service; the router bounds each
//! call with a deadline and the request's cancellation token.

use crate::error::RoutingError;
use async_trait::async_trait;
use parley_core::Intent;
use serde::{Deserialize, Serialize};

/// Classifier answer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SemanticVerdict {
    pub intent: Intent,
    pub confidence: f32,
}

impl SemanticVerdict {
    #[must_use]
    pub fn new(intent: Intent, confidence: f32) -> Self {
        Self { intent, confidence }
    }

    /// Parse `{"intent": "...", "confidence": 0.9}`, tolerating code fences
    pub fn from_json(raw: &str) -> Result<Self, RoutingError> {
        let body = raw
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        #[derive(Deserialize)]
        struct Wire {
            intent: String,
            #[serde(default)]
            confidence: f32,
        }

        let wire: Wire =
            serde_json::from_str(body).map_err(|e| RoutingError::InvalidVerdict(e.to_string()))?;
        if !(0.0..=1.0).contains(&wire.confidence) {
            return Err(RoutingError::InvalidVerdict(format!(
                "confidence {} out of range",
                wire.confidence
            )));
        }
        Ok(Self::new(Intent::parse(&wire.intent), wire.confidence))
    }
}

/// External intent classifier
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SemanticClassifier: Send + Sync {
    /// Classify a message given prior turns
    async fn classify(
        &self,
        message: &str,
        history: &[String],
    ) -> Result<SemanticVerdict, RoutingError>;
}
