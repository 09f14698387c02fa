//! The orchestrator as a chat handler: decomposition through the final answer
//!
//! Run with: cargo test --package parley-orchestrator --test orchestrator_tests

use async_trait::async_trait;
use parley_core::{
    ChatHandler, EventKind, EventSink, ExpertProfile, HandlerError, HandlerRegistry,
    HandlerRequest, OrchestratorConfig, UserId,
};
use parley_orchestrator::{Orchestrator, OrchestratorError, Planner, RESULT_SEPARATOR};
use parley_test_utils::{usage, RecordingSink, ScriptedHandler};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn registry(memo: Arc<ScriptedHandler>, schedule: Arc<ScriptedHandler>) -> Arc<HandlerRegistry> {
    Arc::new(
        HandlerRegistry::new()
            .with_expert(
                memo,
                ExpertProfile::new("memo", "notes and journals")
                    .with_keywords(["note", "memo", "summarize", "week"]),
            )
            .with_expert(
                schedule,
                ExpertProfile::new("schedule", "calendar and events")
                    .with_keywords(["schedule", "meeting", "calendar"]),
            ),
    )
}

struct FixedPlanner(String);

#[async_trait]
impl Planner for FixedPlanner {
    async fn plan(
        &self,
        _message: &str,
        _experts: &[ExpertProfile],
        _history: &[String],
    ) -> Result<String, OrchestratorError> {
        Ok(self.0.clone())
    }
}

/// Tenet: a cross-domain request becomes two tasks whose answers merge into one.
#[tokio::test]
async fn cross_domain_request_runs_both_experts() {
    let memo = ScriptedHandler::new("memo")
        .thinking("reading this week's notes")
        .echo()
        .usage(usage(3, 4))
        .into_arc();
    let schedule = ScriptedHandler::new("schedule")
        .echo()
        .usage(usage(5, 6))
        .into_arc();
    let orchestrator = Orchestrator::new(
        registry(memo.clone(), schedule.clone()),
        OrchestratorConfig::default(),
    );

    let recording = RecordingSink::new();
    let sink: EventSink = recording.clone();
    let request = HandlerRequest::new(
        "summarize my week and schedule tomorrow's meeting",
        UserId(1),
    );
    let used = orchestrator.execute(request, sink).await.unwrap();

    assert_eq!(memo.inputs(), vec!["summarize my week".to_string()]);
    assert_eq!(schedule.inputs(), vec!["schedule tomorrow's meeting".to_string()]);

    let answers = recording.contents(EventKind::Answer);
    assert_eq!(answers.len(), 1);
    assert_eq!(
        answers[0],
        format!(
            "memo: summarize my week{RESULT_SEPARATOR}schedule: schedule tomorrow's meeting"
        )
    );

    // sub-task progress is forwarded, answer fragments are not
    assert_eq!(recording.count(EventKind::Thinking), 1);
    assert_eq!(recording.count(EventKind::DecomposeStart), 1);
    assert_eq!(recording.count(EventKind::DecomposeEnd), 1);
    assert_eq!(recording.count(EventKind::Plan), 1);
    assert_eq!(recording.count(EventKind::TaskStart), 2);
    assert_eq!(recording.count(EventKind::TaskEnd), 2);

    assert_eq!(used.input_tokens, 8);
    assert_eq!(used.output_tokens, 10);

    let kinds = recording.kinds();
    assert_eq!(kinds.first(), Some(&EventKind::DecomposeStart));
    assert_eq!(kinds.last(), Some(&EventKind::Answer));
}

/// Tenet: a planner's direct response is answered without running experts.
#[tokio::test]
async fn direct_response_skips_experts() {
    let memo = ScriptedHandler::new("memo").echo().into_arc();
    let schedule = ScriptedHandler::new("schedule").echo().into_arc();
    let orchestrator = Orchestrator::new(
        registry(memo.clone(), schedule.clone()),
        OrchestratorConfig::default(),
    )
    .with_planner(Arc::new(FixedPlanner(
        r#"{"analysis":"greeting","direct_response":true,"response":"Hello!"}"#.into(),
    )));

    let recording = RecordingSink::new();
    orchestrator
        .execute(HandlerRequest::new("hi", UserId(1)), recording.clone())
        .await
        .unwrap();

    assert_eq!(recording.contents(EventKind::Answer), vec!["Hello!".to_string()]);
    assert_eq!(memo.calls() + schedule.calls(), 0);
    assert_eq!(recording.count(EventKind::Plan), 0);
}

/// Tenet: planned dependencies pass results forward through references.
#[tokio::test]
async fn planned_dependency_receives_result() {
    let memo = ScriptedHandler::new("memo").answer("standup notes").into_arc();
    let schedule = ScriptedHandler::new("schedule").echo().into_arc();
    let orchestrator = Orchestrator::new(
        registry(memo, schedule.clone()),
        OrchestratorConfig::default(),
    )
    .with_planner(Arc::new(FixedPlanner(
        r#"{"analysis":"find then book","parallel":true,"aggregate":false,
            "tasks":[{"id":"t1","agent":"memo","input":"find standup notes"},
                     {"id":"t2","agent":"schedule","input":"book a slot for {{t1.result}}","dependencies":["t1"]}]}"#
            .into(),
    )));

    let recording = RecordingSink::new();
    orchestrator
        .execute(HandlerRequest::new("find and book", UserId(1)), recording.clone())
        .await
        .unwrap();

    assert_eq!(
        schedule.inputs(),
        vec!["book a slot for \"standup notes\"".to_string()]
    );
    let answer = &recording.contents(EventKind::Answer)[0];
    assert!(answer.starts_with("standup notes"));
}

/// Tenet: when every task fails the orchestrator fails instead of answering.
#[tokio::test]
async fn all_tasks_failing_is_a_handler_error() {
    let memo = ScriptedHandler::new("memo")
        .fail(HandlerError::Failed("index offline".into()))
        .into_arc();
    let schedule = ScriptedHandler::new("schedule").echo().into_arc();
    let orchestrator = Orchestrator::new(registry(memo, schedule), OrchestratorConfig::default());

    let recording = RecordingSink::new();
    let err = orchestrator
        .execute(HandlerRequest::new("summarize my notes", UserId(1)), recording.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, HandlerError::Failed(ref m) if m.contains("index offline")));
    assert_eq!(recording.count(EventKind::Answer), 0);
}
