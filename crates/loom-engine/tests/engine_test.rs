mod common;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::*;
use futures::StreamExt;
use loom_engine::{Engine, EngineConfig, EngineError, RunState, RunStatus, WatchEventData};
use loom_store::{MemoryStore, SnapshotStore};
use loom_workflow::{StepGraph, WorkflowDefinition};
use serde_json::json;
use tokio::time::timeout;

fn approvals() -> WorkflowDefinition {
  let graph = StepGraph::new(
    vec!["draft".to_string()],
    subscribers(&[("draft", "review"), ("review", "publish")]),
  )
  .unwrap();
  let review = step("review", Approval).with_output_schema(schema(
    "review.output",
    json!({ "type": "object", "required": ["approved"] }),
  ));
  WorkflowDefinition::new(
    "approvals",
    graph,
    vec![step("draft", Echo), review, step("publish", Echo)],
    Some(schema("trigger", json!({ "type": "object" }))),
  )
  .unwrap()
}

fn linear(name: &str) -> WorkflowDefinition {
  let graph = StepGraph::new(vec!["only".to_string()], BTreeMap::new()).unwrap();
  WorkflowDefinition::new(name, graph, vec![step("only", Echo)], None).unwrap()
}

fn engine() -> Engine {
  let engine = Engine::new(EngineConfig::default());
  engine.register_workflow(approvals()).unwrap();
  engine.register_workflow(linear("echo")).unwrap();
  engine
}

#[tokio::test]
async fn test_workflows_are_listed_and_described() {
  let engine = engine();
  assert_eq!(engine.workflows(), vec!["approvals", "echo"]);

  let description = engine.describe("approvals").unwrap();
  assert_eq!(description.step_graph, vec!["draft"]);
  assert!(description.step_subscriber_graph["draft"].contains("review"));
  assert_eq!(description.trigger_schema, Some(json!({ "type": "object" })));
  assert!(description.steps["review"].output_schema.is_some());
}

#[tokio::test]
async fn test_duplicate_workflow_rejected() {
  let engine = engine();
  let err = engine.register_workflow(linear("echo")).unwrap_err();
  assert!(matches!(err, EngineError::DuplicateWorkflow(name) if name == "echo"));
}

#[tokio::test]
async fn test_unknown_workflow_and_run() {
  let engine = engine();
  assert!(matches!(
    engine.create_run("missing", None).await.err().unwrap(),
    EngineError::WorkflowNotFound(_)
  ));
  assert!(matches!(
    engine.get_run("approvals", "nope").err().unwrap(),
    EngineError::RunNotFound { .. }
  ));
  assert!(matches!(
    engine.describe("missing").unwrap_err(),
    EngineError::WorkflowNotFound(_)
  ));
}

#[tokio::test]
async fn test_start_and_resume_through_engine() {
  let engine = engine();
  let run = engine.create_run("approvals", Some("r1".to_string())).await.unwrap();
  assert_eq!(run.run_id(), "r1");

  let state = engine
    .start_run_and_wait("approvals", "r1", json!({ "title": "hello" }))
    .await
    .unwrap();
  assert_eq!(state.status, RunStatus::Suspended);

  let state = engine
    .resume_run_and_wait("approvals", "r1", "review", json!({ "approved": true }))
    .await
    .unwrap();
  assert_eq!(state.status, RunStatus::Completed);
  assert_eq!(state.context["publish"], json!({ "approved": true }));
}

#[tokio::test]
async fn test_create_run_twice_returns_same_run() {
  let engine = engine();
  let first = engine.create_run("echo", Some("same".to_string())).await.unwrap();
  engine.start_run_and_wait("echo", "same", json!(1)).await.unwrap();

  let second = engine.create_run("echo", Some("same".to_string())).await.unwrap();
  assert!(Arc::ptr_eq(&first, &second));
  assert_eq!(second.status(), RunStatus::Completed);
}

#[tokio::test]
async fn test_fire_and_forget_entry_points_stream_wire_records() {
  let engine = engine();
  engine.create_run("approvals", Some("r1".to_string())).await.unwrap();

  let stream = engine.stream_run("approvals", "r1").unwrap();
  engine
    .start_run("approvals", "r1", json!({}))
    .unwrap()
    .wait()
    .await
    .unwrap();
  engine
    .resume_run("approvals", "r1", "review", json!({ "approved": false }))
    .unwrap()
    .wait()
    .await
    .unwrap();

  let records: Vec<WatchEventData> = timeout(
    Duration::from_secs(1),
    stream.map(|state| WatchEventData::from(&state)).collect::<Vec<_>>(),
  )
  .await
  .unwrap();

  assert!(records.iter().all(|r| r.run_id == "r1"));
  assert!(records.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
  let suspended = records.iter().find(|r| !r.suspended_steps.is_empty()).unwrap();
  assert!(suspended.suspended_steps.contains_key("review"));
  assert!(records.last().unwrap().context.contains_key("publish"));
}

#[tokio::test]
async fn test_watch_run_delivers_snapshots() {
  let engine = engine();
  engine.create_run("echo", Some("w1".to_string())).await.unwrap();

  let seen = Arc::new(Mutex::new(Vec::new()));
  let sink = Arc::clone(&seen);
  let watcher = engine
    .watch_run("echo", "w1", move |state: &RunState| {
      sink.lock().unwrap().push(state.status);
      Ok(())
    })
    .unwrap();

  engine.start_run_and_wait("echo", "w1", json!("hi")).await.unwrap();
  tokio::time::sleep(Duration::from_millis(50)).await;
  watcher.unsubscribe();

  assert_eq!(
    *seen.lock().unwrap(),
    vec![RunStatus::Running, RunStatus::Running, RunStatus::Completed]
  );
}

#[tokio::test]
async fn test_engine_with_store_resumes_after_restart() {
  let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());

  {
    let engine = Engine::new(EngineConfig::default()).with_store(Arc::clone(&store));
    engine.register_workflow(approvals()).unwrap();
    engine.create_run("approvals", Some("r1".to_string())).await.unwrap();
    let state = engine.start_run_and_wait("approvals", "r1", json!({})).await.unwrap();
    assert_eq!(state.status, RunStatus::Suspended);

    timeout(Duration::from_secs(1), async {
      loop {
        let stored = store.load("approvals", "r1").await.unwrap();
        if stored.is_some_and(|s| s.status == RunStatus::Suspended) {
          break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
      }
    })
    .await
    .unwrap();
  }

  let engine = Engine::new(EngineConfig::default()).with_store(Arc::clone(&store));
  engine.register_workflow(approvals()).unwrap();
  let run = engine.create_run("approvals", Some("r1".to_string())).await.unwrap();
  assert_eq!(run.status(), RunStatus::Suspended);

  let state = engine
    .resume_run_and_wait("approvals", "r1", "review", json!({ "approved": true }))
    .await
    .unwrap();
  assert_eq!(state.status, RunStatus::Completed);
}
