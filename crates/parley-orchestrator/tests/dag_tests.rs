//! Task graph execution: ordering, isolation of failures, retries, handoff
//!
//! Run with: cargo test --package parley-orchestrator --test dag_tests

use parley_core::{
    EventKind, EventSink, ExpertProfile, HandlerError, HandlerRegistry, HandlerRequest,
    OrchestratorConfig, UserId,
};
use parley_orchestrator::{
    Executor, OrchestratorError, Task, TaskGraph, TaskPlan, TaskStatus,
};
use parley_test_utils::{ConcurrencyProbe, RecordingSink, ScriptedHandler};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn request() -> HandlerRequest {
    HandlerRequest::new("orchestrated", UserId(7))
}

fn executor(registry: HandlerRegistry, config: OrchestratorConfig) -> Executor {
    Executor::new(Arc::new(registry), config)
}

fn sink() -> (Arc<RecordingSink>, EventSink) {
    let recording = RecordingSink::new();
    let sink: EventSink = recording.clone();
    (recording, sink)
}

/// Tenet: a diamond runs in dependency order and downstream inputs see upstream results.
#[tokio::test]
async fn diamond_injects_upstream_results() {
    let memo = ScriptedHandler::new("memo").echo().into_arc();
    let schedule = ScriptedHandler::new("schedule").echo().into_arc();
    let registry = HandlerRegistry::new()
        .with_handler(memo.clone())
        .with_handler(schedule.clone());

    let graph = TaskGraph::new(vec![
        Task::new("t1", "memo", "a"),
        Task::new("t2", "memo", "b {{t1.result}}").depends_on(["t1"]),
        Task::new("t3", "schedule", "c").depends_on(["t1"]),
        Task::new("t4", "memo", "d {{t2.result}} {{t3.result}}").depends_on(["t2", "t3"]),
    ])
    .unwrap();

    let (_recording, sink) = sink();
    let report = executor(registry, OrchestratorConfig::default())
        .execute(graph, &request(), &sink)
        .await;

    assert!(report.tasks.iter().all(|t| t.status == TaskStatus::Completed));
    let inputs = memo.inputs();
    assert_eq!(inputs[0], "a");
    assert_eq!(inputs[1], "b \"memo: a\"");
    assert_eq!(inputs[2], "d \"memo: b \\\"memo: a\\\"\" \"schedule: c\"");
    assert_eq!(schedule.calls(), 1);
}

/// Tenet: no more than `max_parallel_tasks` nodes run at once.
#[tokio::test(start_paused = true)]
async fn concurrency_cap_is_respected() {
    let probe = ConcurrencyProbe::new();
    let slow = ScriptedHandler::new("slow")
        .with_probe(probe.clone())
        .sleep(Duration::from_millis(50))
        .echo()
        .into_arc();
    let registry = HandlerRegistry::new().with_handler(slow.clone());

    let tasks = (1..=6)
        .map(|i| Task::new(format!("t{i}"), "slow", format!("job {i}")))
        .collect();
    let graph = TaskGraph::new(tasks).unwrap();

    let (_recording, sink) = sink();
    let report = executor(
        registry,
        OrchestratorConfig::default().with_max_parallel_tasks(2),
    )
    .execute(graph, &request(), &sink)
    .await;

    assert_eq!(report.completed().count(), 6);
    assert_eq!(slow.calls(), 6);
    assert_eq!(probe.max(), 2);
}

/// Tenet: a failing node skips only its dependents; unrelated branches complete.
#[tokio::test]
async fn failure_skips_only_dependents() {
    let ok = ScriptedHandler::new("ok").echo().into_arc();
    let broken = ScriptedHandler::new("broken")
        .fail(HandlerError::Failed("disk full".into()))
        .into_arc();
    let registry = HandlerRegistry::new()
        .with_handler(ok.clone())
        .with_handler(broken);

    let graph = TaskGraph::new(vec![
        Task::new("t1", "broken", "a"),
        Task::new("t2", "ok", "b").depends_on(["t1"]),
        Task::new("t3", "ok", "c").depends_on(["t2"]),
        Task::new("t4", "ok", "d"),
        Task::new("t5", "ok", "e").depends_on(["t4"]),
    ])
    .unwrap();

    let (recording, sink) = sink();
    let report = executor(registry, OrchestratorConfig::default())
        .execute(graph, &request(), &sink)
        .await;

    assert_eq!(report.status_of("t1"), Some(TaskStatus::Failed));
    assert_eq!(report.status_of("t2"), Some(TaskStatus::Skipped));
    assert_eq!(report.status_of("t3"), Some(TaskStatus::Skipped));
    assert_eq!(report.status_of("t4"), Some(TaskStatus::Completed));
    assert_eq!(report.status_of("t5"), Some(TaskStatus::Completed));
    assert_eq!(ok.inputs(), vec!["d".to_string(), "e".to_string()]);

    // every task reports its end exactly once
    assert_eq!(recording.count(EventKind::TaskEnd), 5);
    assert_eq!(recording.count(EventKind::TaskStart), 3);
}

/// Tenet: a panicking node is isolated like a failing one.
#[tokio::test]
async fn panic_is_isolated() {
    let ok = ScriptedHandler::new("ok").echo().into_arc();
    let bomb = ScriptedHandler::new("bomb").panic("boom").into_arc();
    let registry = HandlerRegistry::new().with_handler(ok).with_handler(bomb);

    let graph = TaskGraph::new(vec![
        Task::new("t1", "bomb", "a"),
        Task::new("t2", "ok", "b").depends_on(["t1"]),
        Task::new("t3", "ok", "c"),
    ])
    .unwrap();

    let (_recording, sink) = sink();
    let report = executor(registry, OrchestratorConfig::default())
        .execute(graph, &request(), &sink)
        .await;

    assert_eq!(report.status_of("t1"), Some(TaskStatus::Failed));
    assert!(report.tasks[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("panicked")));
    assert_eq!(report.status_of("t2"), Some(TaskStatus::Skipped));
    assert_eq!(report.status_of("t3"), Some(TaskStatus::Completed));
}

/// Tenet: transient failures are retried with backoff; permanent ones are not.
#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let flaky = ScriptedHandler::new("flaky")
        .fail_first(2, HandlerError::Transient("rate limited".into()))
        .echo()
        .into_arc();
    let broken = ScriptedHandler::new("broken")
        .fail_first(5, HandlerError::Failed("bad input".into()))
        .into_arc();
    let registry = HandlerRegistry::new()
        .with_handler(flaky.clone())
        .with_handler(broken.clone());
    let config = OrchestratorConfig::default().with_retries(3, Duration::from_millis(10));

    let graph = TaskGraph::new(vec![
        Task::new("t1", "flaky", "a"),
        Task::new("t2", "broken", "b"),
    ])
    .unwrap();

    let (_recording, sink) = sink();
    let report = executor(registry, config)
        .execute(graph, &request(), &sink)
        .await;

    assert_eq!(report.status_of("t1"), Some(TaskStatus::Completed));
    assert_eq!(flaky.calls(), 3);
    assert_eq!(report.status_of("t2"), Some(TaskStatus::Failed));
    assert_eq!(broken.calls(), 1);
}

/// Tenet: cancellation stops running nodes and fails everything unfinished.
#[tokio::test]
async fn cancellation_fails_unfinished_tasks() {
    let waiting = ScriptedHandler::new("waiting").await_cancel().into_arc();
    let registry = HandlerRegistry::new().with_handler(waiting);
    let graph = TaskGraph::new(vec![
        Task::new("t1", "waiting", "a"),
        Task::new("t2", "waiting", "b").depends_on(["t1"]),
    ])
    .unwrap();

    let request = request();
    let cancel = request.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let (_recording, sink) = sink();
    let report = executor(registry, OrchestratorConfig::default())
        .execute(graph, &request, &sink)
        .await;

    assert!(report.cancelled);
    assert!(report.tasks.iter().all(|t| t.status == TaskStatus::Failed));
}

/// Tenet: an expert lacking a capability hands the task to one that has it.
#[tokio::test]
async fn inability_hands_off_to_capable_expert() {
    let memo = ScriptedHandler::new("memo")
        .fail(HandlerError::inability("calendar", "no calendar access"))
        .into_arc();
    let schedule = ScriptedHandler::new("schedule").echo().into_arc();
    let registry = HandlerRegistry::new()
        .with_expert(
            memo.clone(),
            ExpertProfile::new("memo", "notes").with_capabilities(["note_search"]),
        )
        .with_expert(
            schedule.clone(),
            ExpertProfile::new("schedule", "calendar").with_capabilities(["calendar"]),
        );

    let graph = TaskGraph::new(vec![Task::new("t1", "memo", "what's on friday")]).unwrap();
    let (recording, sink) = sink();
    let report = executor(registry, OrchestratorConfig::default())
        .execute(graph, &request(), &sink)
        .await;

    let task = &report.tasks[0];
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.expert, "schedule");
    assert_eq!(task.result.as_deref(), Some("schedule: what's on friday"));
    assert_eq!(recording.count(EventKind::HandoffStart), 1);
    assert_eq!(recording.count(EventKind::HandoffEnd), 1);
    assert_eq!(memo.calls(), 1);
}

/// Tenet: with no capable expert the handoff fails and the task fails.
#[tokio::test]
async fn handoff_without_candidate_fails() {
    let memo = ScriptedHandler::new("memo")
        .fail(HandlerError::inability("weather", "no forecast tool"))
        .into_arc();
    let registry = HandlerRegistry::new().with_expert(
        memo,
        ExpertProfile::new("memo", "notes").with_capabilities(["note_search"]),
    );

    let graph = TaskGraph::new(vec![Task::new("t1", "memo", "will it rain")]).unwrap();
    let (recording, sink) = sink();
    let report = executor(registry, OrchestratorConfig::default())
        .execute(graph, &request(), &sink)
        .await;

    assert_eq!(report.status_of("t1"), Some(TaskStatus::Failed));
    let failures = recording.payloads(EventKind::HandoffFail);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["reason"], "no_matching_expert");
}

/// Tenet: malformed plans are rejected before anything runs.
#[tokio::test]
async fn invalid_plans_are_rejected() {
    let echo = ScriptedHandler::new("memo").echo().into_arc();
    let executor = executor(
        HandlerRegistry::new().with_handler(echo.clone()),
        OrchestratorConfig::default(),
    );
    let (_recording, sink) = sink();

    let cyclic = TaskPlan {
        tasks: vec![
            Task::new("t1", "memo", "a").depends_on(["t2"]),
            Task::new("t2", "memo", "b").depends_on(["t1"]),
        ],
        ..TaskPlan::default()
    };
    assert!(matches!(
        executor.execute_plan(cyclic, &request(), &sink).await,
        Err(OrchestratorError::CycleDetected(_))
    ));

    let dangling = TaskPlan {
        tasks: vec![Task::new("t1", "memo", "a").depends_on(["t0"])],
        ..TaskPlan::default()
    };
    assert!(matches!(
        executor.execute_plan(dangling, &request(), &sink).await,
        Err(OrchestratorError::UnknownDependency { .. })
    ));
    assert_eq!(echo.calls(), 0);
}
