//! Multi-intent detection
//!
//! Cheap first check of the cascade. A message is multi-intent when it
//! touches two or more handler domains, or joins two or more distinct
//! actions with a connector ("and", "then", "顺便", ...).

use crate::lexicon;

/// Why a message was flagged as multi-intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiIntentReason {
    /// Keywords of several domains
    CrossDomain,
    /// Connector joining several actions
    ChainedActions,
}

/// Stateless multi-intent detector
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiIntentDetector;

impl MultiIntentDetector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Inspect a normalized message
    #[must_use]
    pub fn detect(&self, normalized: &str) -> Option<MultiIntentReason> {
        if lexicon::matched_domains(normalized).len() >= 2 {
            return Some(MultiIntentReason::CrossDomain);
        }
        if lexicon::has_connector(normalized) && lexicon::actions(normalized).len() >= 2 {
            return Some(MultiIntentReason::ChainedActions);
        }
        None
    }

    #[must_use]
    pub fn is_multi_intent(&self, normalized: &str) -> bool {
        self.detect(normalized).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexicon::normalize;

    #[test]
    fn chained_actions_across_clauses() {
        let detector = MultiIntentDetector::new();
        let message = normalize("Summarize my week and schedule tomorrow's meeting");
        assert_eq!(
            detector.detect(&message),
            Some(MultiIntentReason::ChainedActions)
        );
    }

    #[test]
    fn cross_domain_keywords() {
        let detector = MultiIntentDetector::new();
        assert_eq!(
            detector.detect("搜索笔记顺便看看明天的日程"),
            Some(MultiIntentReason::CrossDomain)
        );
    }

    #[test]
    fn single_intent_with_connector_is_not_flagged() {
        let detector = MultiIntentDetector::new();
        assert!(!detector.is_multi_intent("search notes about rust and tokio"));
        assert!(!detector.is_multi_intent("明天下午3点开会"));
    }
}
