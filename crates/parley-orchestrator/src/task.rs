//! Tasks and plans

use parley_core::UsageStats;
use serde::{Deserialize, Serialize};

/// Task lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    /// An upstream dependency failed
    Skipped,
}

impl TaskStatus {
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sub-request handled by one expert
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub expert: String,
    /// May contain `{{tN.result}}` references
    pub input: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub usage: UsageStats,
}

impl Task {
    /// Pending task
    #[must_use]
    pub fn new(id: impl Into<String>, expert: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            expert: expert.into(),
            input: input.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    /// With dependencies on other task ids
    #[must_use]
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = ids.into_iter().map(Into::into).collect();
        self
    }
}

/// Decomposition of one request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Whether independent tasks may run concurrently
    #[serde(default)]
    pub parallel: bool,
    /// Whether multiple results are merged into one answer
    #[serde(default)]
    pub aggregate: bool,
    /// Answer the request without running any expert
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_response: Option<String>,
}

impl TaskPlan {
    /// Plan with one task on `expert`
    #[must_use]
    pub fn single(expert: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            analysis: "direct routing to expert".to_string(),
            tasks: vec![Task::new("t1", expert, input).with_purpose("handle user request")],
            parallel: false,
            aggregate: false,
            direct_response: None,
        }
    }

    /// Summary sent to the client as the `plan` event
    #[must_use]
    pub fn to_event_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "analysis": self.analysis,
            "parallel": self.parallel,
            "aggregate": self.aggregate,
            "tasks": self
                .tasks
                .iter()
                .map(|t| serde_json::json!({
                    "id": t.id,
                    "expert": t.expert,
                    "purpose": t.purpose,
                    "dependencies": t.dependencies,
                }))
                .collect::<Vec<_>>(),
        })
    }
}
