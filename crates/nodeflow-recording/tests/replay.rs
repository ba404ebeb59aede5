//! Record a run, then replay it without executing nodes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nodeflow_engine::{ChannelNotifier, CompositeNotifier, ExecutionEvent, NodeStatus, Scheduler};
use nodeflow_graph::{Connection, Graph, Node, Project};
use nodeflow_node::{
  ExecutionContext, GraphInputs, Inputs, NodeError, NodeImpl, NodeRegistry, Outputs, PortDef,
};
use nodeflow_nodes::builtin_registry;
use nodeflow_recording::{Playback, RecordedEntry, RecordedOutcome, Recorder, Recording, Replayer};
use nodeflow_value::{DataType, DataValue};
use serde_json::json;

/// Upper-cases `text`; stands in for an expensive model call.
struct Upper;

#[async_trait]
impl NodeImpl for Upper {
  fn input_ports(&self, _: &[Connection], _: &Project) -> Vec<PortDef> {
    vec![PortDef::new("text", DataType::STRING).required()]
  }

  fn output_ports(&self, _: &[Connection], _: &Project) -> Vec<PortDef> {
    vec![PortDef::new("output", DataType::STRING)]
  }

  async fn execute(&self, inputs: Inputs, _: &ExecutionContext) -> Result<Outputs, NodeError> {
    let text = inputs["text"].as_str().unwrap_or_default().to_uppercase();
    let mut out = Outputs::new();
    out.insert("output".into(), DataValue::String(text));
    Ok(out)
  }
}

/// Fails if it is ever executed.
struct Unreachable;

#[async_trait]
impl NodeImpl for Unreachable {
  fn input_ports(&self, _: &[Connection], _: &Project) -> Vec<PortDef> {
    vec![PortDef::new("text", DataType::STRING).required()]
  }

  fn output_ports(&self, _: &[Connection], _: &Project) -> Vec<PortDef> {
    vec![PortDef::new("output", DataType::STRING)]
  }

  async fn execute(&self, _: Inputs, _: &ExecutionContext) -> Result<Outputs, NodeError> {
    Err(NodeError::failed("executed during replay"))
  }
}

/// Always fails.
struct Explode;

#[async_trait]
impl NodeImpl for Explode {
  fn input_ports(&self, _: &[Connection], _: &Project) -> Vec<PortDef> {
    Vec::new()
  }

  fn output_ports(&self, _: &[Connection], _: &Project) -> Vec<PortDef> {
    vec![PortDef::new("output", DataType::STRING)]
  }

  async fn execute(&self, _: Inputs, _: &ExecutionContext) -> Result<Outputs, NodeError> {
    Err(NodeError::failed("kaboom"))
  }
}

fn recording_registry() -> NodeRegistry {
  builtin_registry()
    .with("upper", |_: &Node| Ok(Arc::new(Upper) as Arc<dyn NodeImpl>))
    .with("explode", |_: &Node| Ok(Arc::new(Explode) as Arc<dyn NodeImpl>))
}

fn replay_registry() -> NodeRegistry {
  builtin_registry()
    .with("upper", |_: &Node| Ok(Arc::new(Unreachable) as Arc<dyn NodeImpl>))
    .with("explode", |_: &Node| Ok(Arc::new(Unreachable) as Arc<dyn NodeImpl>))
}

/// Shouts every word, then counts to three in a loop.
fn project() -> Project {
  let graph = Graph::new("main")
    .with_node(Node::new("words", "graphInput", json!({"id": "words"})))
    .with_node(Node::new("shout", "upper", json!({})).split())
    .with_node(Node::new("shouted", "graphOutput", json!({"id": "shouted"})))
    .with_node(Node::new(
      "seed",
      "graphInput",
      json!({"id": "start", "dataType": "number", "defaultValue": 0}),
    ))
    .with_node(Node::new(
      "limit",
      "graphInput",
      json!({"id": "limit", "dataType": "number", "defaultValue": 3}),
    ))
    .with_node(Node::new("loop", "loopController", json!({})))
    .with_node(Node::new("add", "evaluate", json!({"operation": "+", "b": 1})))
    .with_node(Node::new("below", "compare", json!({"comparisonFunction": "<"})))
    .with_node(Node::new("count", "graphOutput", json!({"id": "count"})))
    .connect("words", "data", "shout", "text")
    .connect("shout", "output", "shouted", "value")
    .connect("seed", "data", "loop", "input1Default")
    .connect("loop", "output1", "add", "a")
    .connect("add", "output", "loop", "input1")
    .connect("add", "output", "below", "a")
    .connect("limit", "data", "below", "b")
    .connect("below", "output", "loop", "continue")
    .connect("loop", "output1", "count", "value");
  Project::new("test").with_graph(graph)
}

fn inputs() -> GraphInputs {
  let words = DataValue::StringArray(vec!["a".into(), "b".into(), "c".into()]);
  [("words".to_string(), words)].into_iter().collect()
}

async fn record() -> (Recording, nodeflow_node::GraphOutputs) {
  record_project(project(), inputs()).await
}

async fn record_project(project: Project, inputs: GraphInputs) -> (Recording, nodeflow_node::GraphOutputs) {
  let recorder = Arc::new(Recorder::new("main"));
  let scheduler = Scheduler::new(project, "main", recording_registry()).with_notifier(recorder.clone());
  let outputs = scheduler.run(inputs, GraphInputs::new()).await.unwrap();
  (recorder.finish(), outputs)
}

/// Replays `recording` with nodes that fail when executed, returning the
/// outputs, the events and the scheduler for status checks.
async fn replay_project(
  project: Project,
  inputs: GraphInputs,
  recording: Recording,
) -> (nodeflow_node::GraphOutputs, Vec<ExecutionEvent>, Scheduler) {
  let (events, mut received) = ChannelNotifier::channel();
  let scheduler = Scheduler::new(project, "main", replay_registry())
    .with_notifier(Arc::new(events))
    .with_replay(Arc::new(Replayer::new(recording)));
  let outputs = scheduler.run(inputs, GraphInputs::new()).await.unwrap();
  let mut seen = Vec::new();
  while let Ok(event) = received.try_recv() {
    seen.push(event);
  }
  (outputs, seen, scheduler)
}

#[tokio::test]
async fn test_replay_reproduces_outputs_without_executing() {
  let (recording, recorded) = record().await;
  assert_eq!(
    recorded["shouted"],
    DataValue::StringArray(vec!["A".into(), "B".into(), "C".into()])
  );
  assert_eq!(recorded["count"], DataValue::Number(3.0));
  assert_eq!(
    recording
      .entry("add", 2)
      .and_then(RecordedEntry::outputs)
      .map(|o| &o["output"]),
    Some(&DataValue::Number(3.0))
  );

  // Through a file, as the command line does it.
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("run.json");
  recording.save(&path).unwrap();
  let recording = Recording::load(&path).unwrap();

  let (events, mut received) = ChannelNotifier::channel();
  let scheduler = Scheduler::new(project(), "main", replay_registry())
    .with_notifier(Arc::new(events))
    .with_replay(Arc::new(Replayer::new(recording.clone())));
  let replayed = scheduler.run(inputs(), GraphInputs::new()).await.unwrap();
  assert_eq!(replayed, recorded);

  let mut finishes = Vec::new();
  while let Ok(event) = received.try_recv() {
    if let ExecutionEvent::NodeFinish {
      node_id,
      iteration,
      outputs,
      ..
    } = event
    {
      finishes.push((node_id, iteration, outputs));
    }
  }
  for entry in &recording.entries {
    let outputs = entry.outputs().cloned().unwrap();
    assert!(
      finishes.contains(&(entry.node_id.clone(), entry.iteration, outputs)),
      "missing replay of {} in iteration {}",
      entry.node_id,
      entry.iteration
    );
  }
  assert_eq!(finishes.len(), recording.entries.len());
}

#[tokio::test]
async fn test_uniform_playback_delay() {
  let (recording, _) = record().await;
  let replayer = Replayer::new(recording).with_playback(Playback::Uniform(Duration::from_millis(15)));
  let scheduler = Scheduler::new(project(), "main", replay_registry()).with_replay(Arc::new(replayer));

  let started = Instant::now();
  scheduler.run(inputs(), GraphInputs::new()).await.unwrap();
  // seed -> loop -> add -> below -> loop ... is a chain of more than four nodes
  assert!(started.elapsed() >= Duration::from_millis(60));
}

#[tokio::test]
async fn test_recorder_ignores_subgraph_processes() {
  let child = Graph::new("child")
    .with_node(Node::new("n", "graphInput", json!({"id": "n"})))
    .with_node(Node::new("out", "graphOutput", json!({"id": "echo"})))
    .connect("n", "data", "out", "value");
  let root = Graph::new("main")
    .with_node(Node::new("x", "graphInput", json!({"id": "x"})))
    .with_node(Node::new("call", "subGraph", json!({"graphId": "child"})))
    .with_node(Node::new("out", "graphOutput", json!({"id": "y"})))
    .connect("x", "data", "call", "n")
    .connect("call", "echo", "out", "value");
  let project = Project::new("test").with_graph(root).with_graph(child);

  let recorder = Arc::new(Recorder::new("main"));
  let (events, _received) = ChannelNotifier::channel();
  let notifier = CompositeNotifier::new()
    .with(recorder.clone())
    .with(Arc::new(events));
  let scheduler = Scheduler::new(project, "main", builtin_registry()).with_notifier(Arc::new(notifier));
  let x: GraphInputs = [("x".to_string(), DataValue::from("hi"))].into_iter().collect();
  scheduler.run(x, GraphInputs::new()).await.unwrap();

  let recording = recorder.finish();
  let recorded: Vec<&str> = recording.entries.iter().map(|e| e.node_id.as_str()).collect();
  assert_eq!(recorded.len(), 3);
  for id in ["x", "call", "out"] {
    assert!(recorded.contains(&id));
  }
  assert!(recording.entry("n", 0).is_none());
}

#[tokio::test]
async fn test_replay_reproduces_recovered_failure() {
  let graph = Graph::new("main")
    .with_node(Node::new("bad", "explode", json!({})))
    .with_node(Node::new(
      "fallback",
      "graphInput",
      json!({"id": "fallback", "defaultValue": "spare"}),
    ))
    .with_node(Node::new("pick", "coalesce", json!({})))
    .with_node(Node::new("out", "graphOutput", json!({"id": "value"})))
    .connect("bad", "output", "pick", "input1")
    .connect("fallback", "data", "pick", "input2")
    .connect("pick", "output", "out", "value");
  let project = Project::new("test").with_graph(graph);

  let (recording, recorded) = record_project(project.clone(), GraphInputs::new()).await;
  assert_eq!(recorded["value"], DataValue::from("spare"));
  assert_eq!(
    recording.entry("bad", 0).map(|e| &e.outcome),
    Some(&RecordedOutcome::Errored {
      error: "kaboom".to_string()
    })
  );

  let (replayed, events, _) = replay_project(project, GraphInputs::new(), recording).await;
  assert_eq!(replayed, recorded);
  assert!(events.iter().any(|e| matches!(
    e,
    ExecutionEvent::NodeError { node_id, error, .. } if node_id == "bad" && error == "kaboom"
  )));
}

#[tokio::test]
async fn test_replay_reproduces_use_defaults_failure_once() {
  let mut bad = Node::new("bad", "explode", json!({}));
  bad.on_error = nodeflow_graph::OnError::UseDefaults;
  let graph = Graph::new("main")
    .with_node(bad)
    .with_node(Node::new("out", "graphOutput", json!({"id": "value"})))
    .connect("bad", "output", "out", "value");
  let project = Project::new("test").with_graph(graph);

  let (recording, recorded) = record_project(project.clone(), GraphInputs::new()).await;
  let entries: Vec<_> = recording.entries.iter().filter(|e| e.node_id == "bad").collect();
  assert_eq!(entries.len(), 1);
  assert!(matches!(entries[0].outcome, RecordedOutcome::Errored { .. }));

  let (replayed, _, _) = replay_project(project, GraphInputs::new(), recording).await;
  assert_eq!(replayed, recorded);
}

#[tokio::test]
async fn test_replay_reproduces_race() {
  let graph = Graph::new("main")
    .with_node(Node::new("seed", "graphInput", json!({"id": "seed"})))
    .with_node(Node::new("slow", "delay", json!({"delayMs": 5000})))
    .with_node(Node::new(
      "fast",
      "graphInput",
      json!({"id": "fast", "defaultValue": "quick"}),
    ))
    .with_node(Node::new("race", "raceInputs", json!({})))
    .with_node(Node::new("out", "graphOutput", json!({"id": "winner"})))
    .connect("seed", "data", "slow", "input1")
    .connect("slow", "output1", "race", "input1")
    .connect("fast", "data", "race", "input2")
    .connect("race", "result", "out", "value");
  let project = Project::new("test").with_graph(graph);
  let seed: GraphInputs = [("seed".to_string(), DataValue::from("slow"))].into_iter().collect();

  let (recording, recorded) = record_project(project.clone(), seed.clone()).await;
  assert_eq!(recorded["winner"], DataValue::from("quick"));
  assert_eq!(
    recording.entry("slow", 0).map(|e| &e.outcome),
    Some(&RecordedOutcome::Aborted)
  );

  let started = Instant::now();
  let (replayed, events, scheduler) = replay_project(project, seed, recording).await;
  assert_eq!(replayed, recorded);
  assert!(started.elapsed() < Duration::from_secs(2));
  assert_eq!(scheduler.statuses()["slow"], NodeStatus::Aborted);
  assert!(
    events
      .iter()
      .any(|e| matches!(e, ExecutionEvent::NodeAborted { node_id, .. } if node_id == "slow"))
  );
}
