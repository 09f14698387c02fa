//! Routing vocabulary shared by the router, orchestrator and harness

use serde::{Deserialize, Serialize};

/// Handler domain an intent belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Memo,
    Schedule,
}

impl Domain {
    /// All routable domains
    pub const ALL: [Domain; 2] = [Domain::Memo, Domain::Schedule];

    /// Handler name serving this domain
    #[must_use]
    pub fn handler_name(&self) -> &'static str {
        match self {
            Self::Memo => "memo",
            Self::Schedule => "schedule",
        }
    }

    /// Look up a domain by handler name
    #[must_use]
    pub fn from_handler_name(name: &str) -> Option<Self> {
        match name {
            "memo" => Some(Self::Memo),
            "schedule" => Some(Self::Schedule),
            _ => None,
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.handler_name())
    }
}

/// Classified user intent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    MemoSearch,
    MemoCreate,
    ScheduleQuery,
    ScheduleCreate,
    ScheduleUpdate,
    BatchSchedule,
    #[default]
    Unknown,
}

impl Intent {
    /// Domain the intent routes to; `None` for [`Intent::Unknown`]
    #[must_use]
    pub fn domain(&self) -> Option<Domain> {
        match self {
            Self::MemoSearch | Self::MemoCreate => Some(Domain::Memo),
            Self::ScheduleQuery
            | Self::ScheduleCreate
            | Self::ScheduleUpdate
            | Self::BatchSchedule => Some(Domain::Schedule),
            Self::Unknown => None,
        }
    }

    /// Stable wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemoSearch => "memo_search",
            Self::MemoCreate => "memo_create",
            Self::ScheduleQuery => "schedule_query",
            Self::ScheduleCreate => "schedule_create",
            Self::ScheduleUpdate => "schedule_update",
            Self::BatchSchedule => "batch_schedule",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a wire name; unrecognized names map to [`Intent::Unknown`]
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "memo_search" => Self::MemoSearch,
            "memo_create" => Self::MemoCreate,
            "schedule_query" => Self::ScheduleQuery,
            "schedule_create" => Self::ScheduleCreate,
            "schedule_update" => Self::ScheduleUpdate,
            "batch_schedule" => Self::BatchSchedule,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Router layer that produced a verdict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteLayer {
    Cache,
    Rule,
    History,
    Weighted,
    Semantic,
    #[default]
    None,
}

impl RouteLayer {
    /// Stable wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Rule => "rule",
            Self::History => "history",
            Self::Weighted => "weighted",
            Self::Semantic => "semantic",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for RouteLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Router decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    /// Handler to dispatch to; `None` when unresolved
    pub target: Option<String>,
    pub intent: Intent,
    pub layer: RouteLayer,
    pub confidence: f32,
    pub needs_decomposition: bool,
}

impl RouteResult {
    /// A resolved verdict for `intent`
    #[must_use]
    pub fn resolved(intent: Intent, layer: RouteLayer, confidence: f32) -> Self {
        Self {
            target: intent.domain().map(|d| d.handler_name().to_string()),
            intent,
            layer,
            confidence,
            needs_decomposition: false,
        }
    }

    /// No layer could decide; the request should be decomposed
    #[must_use]
    pub fn decompose() -> Self {
        Self {
            target: None,
            intent: Intent::Unknown,
            layer: RouteLayer::None,
            confidence: 0.0,
            needs_decomposition: true,
        }
    }

    /// Whether a target handler was chosen
    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.target.is_some() && !self.needs_decomposition
    }

    /// Same verdict, attributed to another layer
    #[must_use]
    pub fn with_layer(mut self, layer: RouteLayer) -> Self {
        self.layer = layer;
        self
    }
}
