//! Conversation and user history matching
//!
//! Three checks, in order:
//! - short confirmations reuse the conversation's last route
//! - short follow-ups stay in the last route's domain
//! - messages similar to the user's recent decisions reuse their intent

use crate::lexicon;
use dashmap::DashMap;
use parley_core::{Intent, RouteLayer, RouteResult, UserId};
use std::collections::VecDeque;

const CONFIRMATION_CONFIDENCE: f32 = 0.95;
const FOLLOW_UP_CONFIDENCE: f32 = 0.85;
const MAX_FOLLOW_UP_WORDS: usize = 4;
const MAX_FOLLOW_UP_CJK: usize = 8;

const CONFIRMATIONS: &[&str] = &[
    "ok", "okay", "yes", "yep", "yeah", "sure", "go ahead", "do it", "confirm", "sounds good",
    "好", "好的", "是的", "是", "可以", "行", "嗯", "确认", "对", "没问题",
];

/// How a history verdict was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMatchKind {
    Confirmation,
    FollowUp,
    Similar,
}

impl HistoryMatchKind {
    /// Whether the verdict depends on conversation state, not just the text
    #[must_use]
    pub fn is_contextual(&self) -> bool {
        !matches!(self, Self::Similar)
    }
}

/// A history verdict
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryMatch {
    pub kind: HistoryMatchKind,
    pub result: RouteResult,
}

#[derive(Debug, Clone)]
struct Decision {
    normalized: String,
    intent: Intent,
}

/// Matcher over per-user recent decisions
#[derive(Debug)]
pub struct HistoryMatcher {
    decisions: DashMap<UserId, VecDeque<Decision>>,
    capacity: usize,
    min_similarity: f32,
}

impl HistoryMatcher {
    #[must_use]
    pub fn new(capacity: usize, min_similarity: f32) -> Self {
        Self {
            decisions: DashMap::new(),
            capacity: capacity.max(1),
            min_similarity,
        }
    }

    /// Remember an accepted verdict for `user`
    pub fn record(&self, user: UserId, normalized: &str, intent: Intent) {
        if intent == Intent::Unknown {
            return;
        }
        let mut recent = self.decisions.entry(user).or_default();
        recent.retain(|d| d.normalized != normalized);
        recent.push_back(Decision {
            normalized: normalized.to_string(),
            intent,
        });
        while recent.len() > self.capacity {
            recent.pop_front();
        }
    }

    /// Decisions remembered for `user`
    #[must_use]
    pub fn len(&self, user: UserId) -> usize {
        self.decisions.get(&user).map_or(0, |d| d.len())
    }

    /// Evaluate a normalized message against conversation and user history
    #[must_use]
    pub fn evaluate(
        &self,
        user: UserId,
        normalized: &str,
        last_route: Option<&RouteResult>,
    ) -> Option<HistoryMatch> {
        let last = last_route.filter(|r| r.intent != Intent::Unknown);

        if let Some(last) = last {
            if is_confirmation(normalized) {
                return Some(HistoryMatch {
                    kind: HistoryMatchKind::Confirmation,
                    result: RouteResult::resolved(
                        last.intent,
                        RouteLayer::History,
                        CONFIRMATION_CONFIDENCE,
                    ),
                });
            }
            if let Some(intent) = follow_up_intent(normalized, last.intent) {
                return Some(HistoryMatch {
                    kind: HistoryMatchKind::FollowUp,
                    result: RouteResult::resolved(intent, RouteLayer::History, FOLLOW_UP_CONFIDENCE),
                });
            }
        }

        self.most_similar(user, normalized)
            .map(|(intent, score)| HistoryMatch {
                kind: HistoryMatchKind::Similar,
                result: RouteResult::resolved(intent, RouteLayer::History, score),
            })
    }

    fn most_similar(&self, user: UserId, normalized: &str) -> Option<(Intent, f32)> {
        let recent = self.decisions.get(&user)?;
        recent
            .iter()
            .map(|d| (d.intent, lexicon::bigram_similarity(&d.normalized, normalized)))
            .filter(|(_, score)| *score >= self.min_similarity)
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

fn is_confirmation(normalized: &str) -> bool {
    let core = lexicon::strip_punctuation(normalized);
    CONFIRMATIONS.contains(&core)
}

fn is_short(normalized: &str) -> bool {
    if lexicon::cjk_count(normalized) > 0 {
        normalized.chars().filter(|c| !c.is_whitespace()).count() <= MAX_FOLLOW_UP_CJK
    } else {
        lexicon::word_count(normalized) <= MAX_FOLLOW_UP_WORDS
    }
}

/// Intent of a short follow-up staying in the last route's domain
fn follow_up_intent(normalized: &str, last: Intent) -> Option<Intent> {
    let domain = last.domain()?;
    if !is_short(normalized) {
        return None;
    }

    let actions = lexicon::actions(normalized);
    let has_time = lexicon::has_time_expression(normalized);
    let mentions_domain = lexicon::matched_domains(normalized).contains(&domain);
    if actions.is_empty() && !has_time && !mentions_domain && !lexicon::is_follow_up_marker(normalized)
    {
        return None;
    }

    if actions.is_empty() && !has_time {
        return Some(last);
    }
    Some(lexicon::refine_intent(domain, &actions, has_time))
}
