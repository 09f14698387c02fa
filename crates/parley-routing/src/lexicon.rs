//! Keyword tables, action and time patterns, and text helpers
//!
//! Patterns cover English and Chinese. Inputs are expected to be
//! normalized with [`normalize`] first.

use once_cell::sync::Lazy;
use parley_core::{Domain, Intent};
use regex::Regex;
use std::collections::BTreeSet;

/// Generic action a message asks for, independent of domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    Update,
    Batch,
    Search,
    Query,
    Create,
}

/// Lower-case, trim and collapse whitespace
#[must_use]
pub fn normalize(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Whether `c` is a CJK ideograph
#[inline]
#[must_use]
pub fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}' | '\u{f900}'..='\u{faff}')
}

/// Number of CJK ideographs in `text`
#[must_use]
pub fn cjk_count(text: &str) -> usize {
    text.chars().filter(|c| is_cjk(*c)).count()
}

/// Whitespace-separated word count
#[must_use]
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Strip surrounding punctuation and whitespace
#[must_use]
pub fn strip_punctuation(text: &str) -> &str {
    text.trim_matches(|c: char| {
        c.is_whitespace() || c.is_ascii_punctuation() || "，。！？；：、…~～".contains(c)
    })
}

/// Character bigrams, ignoring whitespace; a single character is its own gram
#[must_use]
pub fn bigrams(text: &str) -> BTreeSet<String> {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.len() < 2 {
        return chars.iter().map(ToString::to_string).collect();
    }
    chars.windows(2).map(|w| w.iter().collect()).collect()
}

/// Jaccard similarity of the character bigram sets of `a` and `b`
#[must_use]
pub fn bigram_similarity(a: &str, b: &str) -> f32 {
    let left = bigrams(a);
    let right = bigrams(b);
    if left.is_empty() && right.is_empty() {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    let union = left.union(&right).count();
    shared as f32 / union as f32
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern}: {e}"))
}

static UPDATE: Lazy<Regex> = Lazy::new(|| {
    regex(r"\b(update|change|reschedule|cancel|delete|remove|move|modify|postpone)\b|修改|更新|取消|改|删除|推迟")
});
static BATCH: Lazy<Regex> = Lazy::new(|| {
    regex(r"\b(every day|every week|daily|weekly|recurring|batch)\b|批量|多个|一系列|每天|每周")
});
static SEARCH: Lazy<Regex> = Lazy::new(|| {
    regex(r"\b(search|find|look up|look for|lookup)\b|搜索|查找|查询|找一下|查一下")
});
static QUERY: Lazy<Regex> = Lazy::new(|| {
    regex(r"\b(what|show|list|view|which|summarize|summarise|review)\b|查看|有什么|哪些|看看|什么安排|有没有|总结")
});
static CREATE: Lazy<Regex> = Lazy::new(|| {
    regex(r"\b(write|save|record|create|add|jot|schedule|book|arrange|remind me|set up)\b|记录|记一下|写|保存|创建|安排")
});

static TIME: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        regex(r"\d{1,2}[:：时点]\d{0,2}"),
        regex(r"\b\d{1,2}(:\d{2})?\s?(am|pm)\b"),
        regex(r"(上午|下午|晚上|早上|中午)\d{1,2}[点时]"),
        regex(r"明天|后天|今天|下周|本周"),
        regex(r"\d{1,2}月\d{1,2}[日号]"),
        regex(r"\b(today|tonight|tomorrow|next week|this week|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b"),
    ]
});

static CONNECTOR: Lazy<Regex> = Lazy::new(|| {
    regex(r"\b(and|then|also|plus|as well as|after that)\b|[;；]|顺便|同时|还有|以及|并且|另外|然后")
});

static FOLLOW_UP: Lazy<Regex> = Lazy::new(|| {
    regex(r"^(and|also|what about|how about|then)\b|呢$|^那|^还有")
});

const MEMO_KEYWORDS: &[&str] = &[
    "笔记", "memo", "memos", "note", "notes", "记录", "搜索", "备忘", "notebook",
];

const SCHEDULE_KEYWORDS: &[&str] = &[
    "日程", "schedule", "会议", "meeting", "meetings", "提醒", "remind", "reminder",
    "calendar", "appointment", "日历",
];

/// Keyword weights used when a user has no learned weight
const MEMO_WEIGHTS: &[(&str, i32)] = &[
    ("笔记", 3),
    ("memo", 3),
    ("note", 2),
    ("notes", 2),
    ("记录", 2),
    ("搜索", 2),
    ("备忘", 2),
    ("journal", 2),
    ("diary", 2),
    ("日记", 2),
    ("idea", 1),
    ("ideas", 1),
    ("想法", 1),
    ("灵感", 1),
    ("draft", 1),
];

const SCHEDULE_WEIGHTS: &[(&str, i32)] = &[
    ("日程", 3),
    ("schedule", 3),
    ("calendar", 3),
    ("会议", 2),
    ("meeting", 2),
    ("提醒", 2),
    ("reminder", 2),
    ("appointment", 2),
    ("agenda", 2),
    ("deadline", 2),
    ("截止", 2),
    ("待办", 1),
    ("todo", 1),
    ("busy", 1),
    ("空闲", 1),
];

/// Rule-layer keywords of a domain
#[must_use]
pub fn domain_keywords(domain: Domain) -> &'static [&'static str] {
    match domain {
        Domain::Memo => MEMO_KEYWORDS,
        Domain::Schedule => SCHEDULE_KEYWORDS,
    }
}

/// Default weighted-layer keywords of a domain
#[must_use]
pub fn base_weights(domain: Domain) -> &'static [(&'static str, i32)] {
    match domain {
        Domain::Memo => MEMO_WEIGHTS,
        Domain::Schedule => SCHEDULE_WEIGHTS,
    }
}

/// Weighted score at which a domain is fully confident
#[must_use]
pub fn domain_max_score(domain: Domain) -> i32 {
    match domain {
        Domain::Memo => 5,
        Domain::Schedule => 6,
    }
}

/// Whether `keyword` occurs in `text`; ASCII keywords must match whole words
#[must_use]
pub fn contains_keyword(text: &str, keyword: &str) -> bool {
    if !keyword.is_ascii() {
        return text.contains(keyword);
    }
    text.match_indices(keyword).any(|(start, _)| {
        let end = start + keyword.len();
        let before = text[..start].chars().next_back();
        let after = text[end..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphanumeric())
            && !after.is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

/// Domains whose rule keywords occur in `text`
#[must_use]
pub fn matched_domains(text: &str) -> BTreeSet<Domain> {
    Domain::ALL
        .into_iter()
        .filter(|d| domain_keywords(*d).iter().any(|k| contains_keyword(text, k)))
        .collect()
}

/// Distinct actions mentioned in `text`
#[must_use]
pub fn actions(text: &str) -> BTreeSet<Action> {
    [
        (Action::Update, &*UPDATE),
        (Action::Batch, &*BATCH),
        (Action::Search, &*SEARCH),
        (Action::Query, &*QUERY),
        (Action::Create, &*CREATE),
    ]
    .into_iter()
    .filter(|(_, re)| re.is_match(text))
    .map(|(action, _)| action)
    .collect()
}

#[must_use]
pub fn has_time_expression(text: &str) -> bool {
    TIME.iter().any(|re| re.is_match(text))
}

#[must_use]
pub fn has_connector(text: &str) -> bool {
    CONNECTOR.is_match(text)
}

/// Whether `text` reads like a continuation of the previous turn
#[must_use]
pub fn is_follow_up_marker(text: &str) -> bool {
    FOLLOW_UP.is_match(text)
}

/// Intent inside `domain` implied by the actions and time expression
#[must_use]
pub fn refine_intent(domain: Domain, actions: &BTreeSet<Action>, has_time: bool) -> Intent {
    match domain {
        Domain::Memo => {
            if actions.contains(&Action::Search) {
                Intent::MemoSearch
            } else if actions.contains(&Action::Create) {
                Intent::MemoCreate
            } else {
                Intent::MemoSearch
            }
        }
        Domain::Schedule => {
            if actions.contains(&Action::Update) {
                Intent::ScheduleUpdate
            } else if actions.contains(&Action::Query) {
                Intent::ScheduleQuery
            } else if actions.contains(&Action::Batch) {
                Intent::BatchSchedule
            } else if has_time || actions.contains(&Action::Create) {
                Intent::ScheduleCreate
            } else {
                Intent::ScheduleQuery
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize("  Show   My\tNotes "), "show my notes");
    }

    #[test]
    fn ascii_keywords_match_whole_words() {
        assert!(contains_keyword("find my notes", "notes"));
        assert!(!contains_keyword("footnotes here", "notes"));
        assert!(contains_keyword("搜索笔记", "笔记"));
    }

    #[test]
    fn time_expressions() {
        assert!(has_time_expression("明天下午3点开会"));
        assert!(has_time_expression("meeting at 3pm"));
        assert!(has_time_expression("lunch tomorrow"));
        assert!(has_time_expression("5月20日"));
        assert!(!has_time_expression("find my notes"));
    }

    #[test]
    fn action_detection() {
        let found = actions("summarize my week and schedule tomorrow's meeting");
        assert!(found.contains(&Action::Query));
        assert!(found.contains(&Action::Create));
        assert_eq!(actions("cancel it").into_iter().collect::<Vec<_>>(), vec![Action::Update]);
    }

    #[test]
    fn bigram_similarity_bounds() {
        assert!((bigram_similarity("查看明天日程", "查看明天日程") - 1.0).abs() < f32::EPSILON);
        assert!(bigram_similarity("find notes", "book flight") < 0.2);
        assert!(bigram_similarity("", "") < f32::EPSILON);
    }

    #[test]
    fn schedule_intent_refinement() {
        let none = BTreeSet::new();
        assert_eq!(refine_intent(Domain::Schedule, &none, true), Intent::ScheduleCreate);
        assert_eq!(refine_intent(Domain::Schedule, &none, false), Intent::ScheduleQuery);
        let update: BTreeSet<Action> = [Action::Update].into_iter().collect();
        assert_eq!(refine_intent(Domain::Schedule, &update, true), Intent::ScheduleUpdate);
        assert_eq!(refine_intent(Domain::Memo, &none, false), Intent::MemoSearch);
    }
}
