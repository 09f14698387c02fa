//! Static rule matching
//!
//! Scores a normalized message from domain keywords, action patterns and
//! time expressions:
//!
//! | evidence | confidence |
//! |---|---|
//! | domain keyword + time expression | 0.90 |
//! | domain keyword + action | 0.85 |
//! | domain keyword alone | 0.70 |
//! | time expression + action, no keyword | 0.75 |
//!
//! Time expressions only count toward the schedule domain.

use crate::lexicon::{self, Action};
use parley_core::{Domain, RouteLayer, RouteResult};
use std::collections::BTreeSet;

const KEYWORD_AND_TIME: f32 = 0.9;
const KEYWORD_AND_ACTION: f32 = 0.85;
const KEYWORD_ONLY: f32 = 0.7;
const TIME_AND_ACTION: f32 = 0.75;

/// Keyword and pattern based matcher
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleMatcher;

impl RuleMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Best verdict for a normalized message, if any rule fires
    #[must_use]
    pub fn evaluate(&self, normalized: &str) -> Option<RouteResult> {
        let domains = lexicon::matched_domains(normalized);
        let actions = lexicon::actions(normalized);
        let has_time = lexicon::has_time_expression(normalized);

        // memo wins ties
        let best = [Domain::Memo, Domain::Schedule]
            .into_iter()
            .filter(|d| domains.contains(d))
            .map(|d| (d, Self::keyword_confidence(d, &actions, has_time)))
            .fold(None::<(Domain, f32)>, |best, candidate| match best {
                Some((_, score)) if score >= candidate.1 => best,
                _ => Some(candidate),
            });

        let (domain, confidence) = match best {
            Some(found) => found,
            None if has_time && !actions.is_empty() => (Domain::Schedule, TIME_AND_ACTION),
            None => return None,
        };

        let intent = lexicon::refine_intent(domain, &actions, has_time);
        Some(RouteResult::resolved(intent, RouteLayer::Rule, confidence))
    }

    fn keyword_confidence(domain: Domain, actions: &BTreeSet<Action>, has_time: bool) -> f32 {
        if has_time && domain == Domain::Schedule {
            KEYWORD_AND_TIME
        } else if !actions.is_empty() {
            KEYWORD_AND_ACTION
        } else {
            KEYWORD_ONLY
        }
    }
}
