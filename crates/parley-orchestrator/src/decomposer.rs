//! Request decomposition
//!
//! With a [`Planner`] the plan comes from an external reasoning service and
//! is validated against the registered experts; a reply that does not
//! validate falls back to one task on the default expert. Without a planner
//! the message is split heuristically on connectors.

use crate::error::OrchestratorError;
use crate::graph::TaskGraph;
use crate::task::{Task, TaskPlan};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parley_core::{ExpertProfile, HandlerRequest};
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

static CONNECTOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s*[;；]\s*|,?\s+(?:and then|after that|as well as|and also|then|and|also|plus)\s+|然后|并且|同时|顺便|还有|以及|另外|接着|之后",
    )
    .expect("valid connector pattern")
});

static SEQUENCING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:and then|after that|then|afterwards)\b|然后|接着|之后")
        .expect("valid sequencing pattern")
});

static PRIOR_RESULT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:it|that|them|those|the result|the results)\b|它|这些|结果")
        .expect("valid reference pattern")
});

/// External planning service
#[async_trait]
pub trait Planner: Send + Sync {
    /// Raw JSON plan for `message`
    async fn plan(
        &self,
        message: &str,
        experts: &[ExpertProfile],
        history: &[String],
    ) -> Result<String, OrchestratorError>;
}

#[derive(Deserialize)]
struct WirePlan {
    #[serde(default)]
    analysis: String,
    #[serde(default)]
    tasks: Vec<WireTask>,
    #[serde(default)]
    parallel: bool,
    #[serde(default)]
    aggregate: bool,
    #[serde(default)]
    direct_response: bool,
    #[serde(default)]
    response: Option<String>,
}

#[derive(Deserialize)]
struct WireTask {
    #[serde(default)]
    id: Option<String>,
    #[serde(alias = "agent")]
    expert: String,
    input: String,
    #[serde(default)]
    purpose: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Parse and validate a planner reply against `experts`
pub fn parse_plan(raw: &str, experts: &[String]) -> Result<TaskPlan, OrchestratorError> {
    let body = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let wire: WirePlan =
        serde_json::from_str(body).map_err(|e| OrchestratorError::InvalidPlan(e.to_string()))?;

    if wire.direct_response {
        if let Some(response) = wire.response.filter(|r| !r.trim().is_empty()) {
            return Ok(TaskPlan {
                analysis: wire.analysis,
                direct_response: Some(response),
                ..TaskPlan::default()
            });
        }
    }

    let tasks = wire
        .tasks
        .into_iter()
        .enumerate()
        .map(|(i, t)| {
            let id = t
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("t{}", i + 1));
            if !experts.iter().any(|e| *e == t.expert) {
                return Err(OrchestratorError::UnknownExpert {
                    task: id,
                    expert: t.expert,
                });
            }
            Ok(Task::new(id, t.expert, t.input)
                .with_purpose(t.purpose)
                .depends_on(t.dependencies))
        })
        .collect::<Result<Vec<_>, _>>()?;

    // structural checks happen here so a bad plan can still fall back
    TaskGraph::new(tasks.clone())?;

    Ok(TaskPlan {
        analysis: wire.analysis,
        tasks,
        parallel: wire.parallel,
        aggregate: wire.aggregate,
        direct_response: None,
    })
}

/// Turns one request into a task plan
#[derive(Clone)]
pub struct Decomposer {
    planner: Option<Arc<dyn Planner>>,
    experts: Vec<ExpertProfile>,
    default_expert: String,
}

impl Decomposer {
    /// Heuristic decomposer over `experts`
    #[must_use]
    pub fn new(experts: Vec<ExpertProfile>, default_expert: impl Into<String>) -> Self {
        Self {
            planner: None,
            experts,
            default_expert: default_expert.into(),
        }
    }

    /// Use an external planner
    #[must_use]
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    #[must_use]
    pub fn experts(&self) -> &[ExpertProfile] {
        &self.experts
    }

    /// Build a plan for `request`
    pub async fn decompose(&self, request: &HandlerRequest) -> Result<TaskPlan, OrchestratorError> {
        let Some(planner) = &self.planner else {
            return Ok(self.heuristic(&request.message));
        };

        let reply = tokio::select! {
            biased;
            () = request.cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            reply = planner.plan(&request.message, &self.experts, &request.history) => reply,
        };

        let names: Vec<String> = self.experts.iter().map(|e| e.name.clone()).collect();
        match reply.and_then(|raw| parse_plan(&raw, &names)) {
            Ok(plan) => {
                info!(
                    tasks = plan.tasks.len(),
                    parallel = plan.parallel,
                    direct = plan.direct_response.is_some(),
                    "plan accepted"
                );
                Ok(plan)
            }
            Err(e) => {
                warn!(error = %e, "planner reply rejected, using single-task plan");
                let mut plan = TaskPlan::single(&self.default_expert, request.message.clone());
                plan.analysis = format!("[fallback] {}", plan.analysis);
                Ok(plan)
            }
        }
    }

    /// Split on connectors and assign each clause by expert keywords
    #[must_use]
    pub fn heuristic(&self, message: &str) -> TaskPlan {
        let clauses = split_clauses(message);
        if clauses.len() < 2 {
            let expert = self.expert_for(message);
            return TaskPlan::single(expert, message.trim());
        }

        let mut tasks: Vec<Task> = Vec::with_capacity(clauses.len());
        for (i, clause) in clauses.iter().enumerate() {
            let id = format!("t{}", i + 1);
            let expert = self.expert_for(&clause.text);
            let previous = i.checked_sub(1).map(|p| format!("t{}", p + 1));

            let task = match previous {
                Some(prev) if clause.sequenced || PRIOR_RESULT.is_match(&clause.text) => {
                    let input = format!(
                        "{}\n\nResult of the previous step: {{{{{prev}.result}}}}",
                        clause.text
                    );
                    Task::new(id, expert, input)
                        .with_purpose(clause.text.clone())
                        .depends_on([prev])
                }
                _ => Task::new(id, expert, clause.text.clone()).with_purpose(clause.text.clone()),
            };
            tasks.push(task);
        }
        debug!(tasks = tasks.len(), "heuristic decomposition");

        TaskPlan {
            analysis: format!("split into {} clauses", tasks.len()),
            tasks,
            parallel: true,
            aggregate: true,
            direct_response: None,
        }
    }

    fn expert_for(&self, text: &str) -> String {
        let lowered = text.to_lowercase();
        self.experts
            .iter()
            .map(|p| {
                let hits = p
                    .keywords
                    .iter()
                    .filter(|k| !k.is_empty() && lowered.contains(k.as_str()))
                    .count();
                (p, hits)
            })
            .filter(|(_, hits)| *hits > 0)
            .fold(None::<(&ExpertProfile, usize)>, |best, candidate| match best {
                Some((_, hits)) if hits >= candidate.1 => best,
                _ => Some(candidate),
            })
            .map_or_else(|| self.default_expert.clone(), |(p, _)| p.name.clone())
    }
}

impl std::fmt::Debug for Decomposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decomposer")
            .field("planner", &self.planner.is_some())
            .field("experts", &self.experts.len())
            .field("default_expert", &self.default_expert)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    text: String,
    /// Introduced by a sequencing connector ("then", "然后")
    sequenced: bool,
}

fn split_clauses(message: &str) -> Vec<Clause> {
    let mut clauses = Vec::new();
    let mut start = 0;
    let mut sequenced = false;

    for connector in CONNECTOR.find_iter(message) {
        push_clause(&mut clauses, &message[start..connector.start()], sequenced);
        sequenced = SEQUENCING.is_match(connector.as_str().trim_start_matches([',', ' ']));
        start = connector.end();
    }
    push_clause(&mut clauses, &message[start..], sequenced);
    clauses
}

fn push_clause(clauses: &mut Vec<Clause>, raw: &str, sequenced: bool) {
    let text = raw
        .trim()
        .trim_matches(|c: char| c == ',' || c == '，' || c == '.' || c == '。');
    if text.chars().count() < 2 {
        return;
    }
    clauses.push(Clause {
        text: text.to_string(),
        sequenced: sequenced || SEQUENCING.is_match(text),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn experts() -> Vec<ExpertProfile> {
        vec![
            ExpertProfile::new("memo", "notes").with_keywords(["note", "memo", "summarize", "week"]),
            ExpertProfile::new("schedule", "calendar")
                .with_keywords(["schedule", "meeting", "calendar", "日程"]),
        ]
    }

    struct Canned(Result<String, OrchestratorError>);

    #[async_trait]
    impl Planner for Canned {
        async fn plan(
            &self,
            _message: &str,
            _experts: &[ExpertProfile],
            _history: &[String],
        ) -> Result<String, OrchestratorError> {
            self.0.clone()
        }
    }

    #[test]
    fn cross_domain_message_splits_into_two_tasks() {
        let decomposer = Decomposer::new(experts(), "memo");
        let plan = decomposer.heuristic("summarize my week and schedule tomorrow's meeting");

        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[0].expert, "memo");
        assert_eq!(plan.tasks[0].input, "summarize my week");
        assert_eq!(plan.tasks[1].expert, "schedule");
        assert!(plan.tasks[1].dependencies.is_empty());
        assert!(plan.parallel);
    }

    #[test]
    fn sequencing_adds_dependency_and_reference() {
        let decomposer = Decomposer::new(experts(), "memo");
        let plan = decomposer.heuristic("find my meeting notes, then schedule a follow-up meeting");

        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[1].dependencies, vec!["t1".to_string()]);
        assert!(plan.tasks[1].input.contains("{{t1.result}}"));
    }

    #[test]
    fn chinese_connectors_split() {
        let decomposer = Decomposer::new(experts(), "memo");
        let plan = decomposer.heuristic("记录今天的想法然后查看明天的日程");
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[1].expert, "schedule");
        assert_eq!(plan.tasks[1].dependencies, vec!["t1".to_string()]);
    }

    #[test]
    fn single_clause_uses_keyword_or_default_expert() {
        let decomposer = Decomposer::new(experts(), "memo");
        let plan = decomposer.heuristic("book a meeting");
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].expert, "schedule");

        let plan = decomposer.heuristic("hello there");
        assert_eq!(plan.tasks[0].expert, "memo");
    }

    #[test]
    fn parse_plan_validates_experts_and_ids() {
        let experts = vec!["memo".to_string(), "schedule".to_string()];
        let raw = r#"```json
        {"analysis":"two steps","parallel":true,"aggregate":true,
         "tasks":[{"agent":"memo","input":"find notes","purpose":"p"},
                  {"agent":"schedule","input":"book {{t1.result}}","dependencies":["t1"]}]}
        ```"#;
        let plan = parse_plan(raw, &experts).unwrap();
        assert_eq!(plan.tasks[0].id, "t1");
        assert_eq!(plan.tasks[1].id, "t2");
        assert!(plan.parallel);

        let unknown = r#"{"tasks":[{"agent":"weather","input":"x"}]}"#;
        assert!(matches!(
            parse_plan(unknown, &experts),
            Err(OrchestratorError::UnknownExpert { .. })
        ));

        let cyclic = r#"{"tasks":[{"id":"a","agent":"memo","input":"x","dependencies":["a"]}]}"#;
        assert!(matches!(
            parse_plan(cyclic, &experts),
            Err(OrchestratorError::CycleDetected(_))
        ));
    }

    #[test]
    fn direct_response_plan_has_no_tasks() {
        let raw = r#"{"analysis":"chit-chat","direct_response":true,"response":"Hi!"}"#;
        let plan = parse_plan(raw, &[]).unwrap();
        assert!(plan.tasks.is_empty());
        assert_eq!(plan.direct_response.as_deref(), Some("Hi!"));
    }

    #[tokio::test]
    async fn bad_planner_reply_falls_back_to_default_expert() {
        let decomposer = Decomposer::new(experts(), "schedule")
            .with_planner(Arc::new(Canned(Ok("not json".into()))));
        let request = HandlerRequest::new("do things", parley_core::UserId(1));

        let plan = decomposer.decompose(&request).await.unwrap();
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].expert, "schedule");
        assert!(plan.analysis.starts_with("[fallback]"));

        let failing = Decomposer::new(experts(), "memo")
            .with_planner(Arc::new(Canned(Err(OrchestratorError::Planner("503".into())))));
        let plan = failing.decompose(&request).await.unwrap();
        assert_eq!(plan.tasks[0].expert, "memo");
    }

    #[tokio::test]
    async fn cancelled_before_plan() {
        let decomposer =
            Decomposer::new(experts(), "memo").with_planner(Arc::new(Canned(Ok("{}".into()))));
        let request = HandlerRequest::new("x", parley_core::UserId(1));
        request.cancel.cancel();
        assert_eq!(
            decomposer.decompose(&request).await.unwrap_err(),
            OrchestratorError::Cancelled
        );
    }
}
