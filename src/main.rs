use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use nodeflow_engine::{
  ChannelNotifier, CompositeNotifier, ControlHandle, ExecutionEvent, Scheduler, SchedulerConfig,
};
use nodeflow_graph::Project;
use nodeflow_node::{GraphInputs, Settings};
use nodeflow_nodes::builtin_registry;
use nodeflow_recording::{Recorder, Recording, Replayer};
use nodeflow_value::DataValue;

/// Nodeflow - run node graphs from the command line
#[derive(Parser)]
#[command(name = "nodeflow")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a graph of a project and print its outputs as JSON
  Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
  /// Path to the project file (JSON)
  project: PathBuf,

  /// Graph to run (default: the project's main graph)
  #[arg(long)]
  graph: Option<String>,

  /// Graph input as NAME=JSON; plain text is taken as a string
  #[arg(long = "input", value_name = "NAME=JSON", value_parser = parse_assignment)]
  inputs: Vec<(String, DataValue)>,

  /// Context value as NAME=JSON
  #[arg(long = "context", value_name = "NAME=JSON", value_parser = parse_assignment)]
  context: Vec<(String, DataValue)>,

  /// Write a recording of the run to PATH
  #[arg(long, value_name = "PATH")]
  record: Option<PathBuf>,

  /// Replay node outputs from a recording instead of executing nodes
  #[arg(long, value_name = "PATH", conflicts_with = "record")]
  replay: Option<PathBuf>,

  /// Stream execution events to stderr as JSON lines
  #[arg(long)]
  events: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(std::io::stderr)
    .with_target(false)
    .init();

  let cli = Cli::parse();
  let rt = tokio::runtime::Runtime::new()?;
  let result = match cli.command {
    Commands::Run(args) => rt.block_on(run(args)),
  };
  // An unanswered prompt leaves a blocking stdin read behind.
  rt.shutdown_background();
  result
}

/// Parses `NAME=JSON`. A value that is not valid JSON is taken as a string;
/// tagged values (`{"type": ..., "value": ...}`) keep their type.
fn parse_assignment(raw: &str) -> Result<(String, DataValue), String> {
  let (name, value) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected NAME=JSON, got '{raw}'"))?;
  if name.is_empty() {
    return Err(format!("missing name in '{raw}'"));
  }
  let value = match serde_json::from_str::<serde_json::Value>(value) {
    Ok(json) => serde_json::from_value::<DataValue>(json.clone()).unwrap_or_else(|_| DataValue::infer(json)),
    Err(_) => DataValue::String(value.to_string()),
  };
  Ok((name.to_string(), value))
}

async fn load_project(path: &Path) -> Result<Project> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read project file: {}", path.display()))?;
  serde_json::from_str(&content).with_context(|| format!("failed to parse project file: {}", path.display()))
}

async fn run(args: RunArgs) -> Result<()> {
  let project = load_project(&args.project).await?;
  let graph_id = match args.graph {
    Some(id) => id,
    None => project
      .main_graph_id
      .as_ref()
      .map(ToString::to_string)
      .ok_or_else(|| anyhow!("project has no main graph; pass --graph"))?,
  };
  info!(graph_id = %graph_id, project = %project.name, "project_loaded");

  let config = SchedulerConfig::from_env().context("invalid scheduler configuration")?;
  let (channel, events) = ChannelNotifier::channel();
  let mut notifier = CompositeNotifier::new().with(Arc::new(channel));
  let recorder = args.record.as_ref().map(|_| Arc::new(Recorder::new(graph_id.clone())));
  if let Some(recorder) = &recorder {
    notifier = notifier.with(recorder.clone());
  }

  let mut scheduler = Scheduler::new(project, graph_id, builtin_registry())
    .with_notifier(Arc::new(notifier))
    .with_config(config)
    .with_settings(Settings::from_env());
  if let Some(path) = &args.replay {
    let recording =
      Recording::load(path).with_context(|| format!("failed to load recording: {}", path.display()))?;
    scheduler = scheduler.with_replay(Arc::new(Replayer::new(recording)));
  }

  let control = scheduler.control();
  let done = CancellationToken::new();
  let watcher = tokio::spawn(watch(events, control.clone(), done.clone(), args.events));
  let interrupt = tokio::spawn(abort_on_ctrl_c(control, done.clone()));

  let inputs: GraphInputs = args.inputs.into_iter().collect();
  let context: GraphInputs = args.context.into_iter().collect();
  let result = scheduler.run(inputs, context).await;

  done.cancel();
  watcher.await.context("event watcher panicked")??;
  interrupt.await.context("interrupt handler panicked")?;

  if let (Some(path), Some(recorder)) = (&args.record, &recorder) {
    recorder
      .finish()
      .save(path)
      .with_context(|| format!("failed to write recording: {}", path.display()))?;
    eprintln!("Recording written to {}", path.display());
  }

  let outputs = result.context("graph run failed")?;
  println!("{}", serde_json::to_string_pretty(&outputs)?);
  Ok(())
}

/// Answers user-input requests from stdin and optionally echoes events.
/// Drains what is left once `done` fires.
async fn watch(
  mut events: UnboundedReceiver<ExecutionEvent>,
  control: ControlHandle,
  done: CancellationToken,
  echo: bool,
) -> Result<()> {
  let mut stdin = BufReader::new(tokio::io::stdin()).lines();
  loop {
    tokio::select! {
      biased;
      event = events.recv() => {
        let Some(event) = event else { return Ok(()) };
        if echo {
          emit(&event)?;
        }
        if let ExecutionEvent::NeedsUserInput { key, questions } = event {
          tokio::select! {
            answers = prompt(&mut stdin, &questions) => {
              let answers = answers?;
              if !control.supply_user_input_for(key, answers) {
                debug!("user_input_dropped");
              }
            }
            _ = done.cancelled() => {}
          }
        }
      }
      _ = done.cancelled() => {
        while let Ok(event) = events.try_recv() {
          if echo {
            emit(&event)?;
          }
        }
        return Ok(());
      }
    }
  }
}

fn emit(event: &ExecutionEvent) -> Result<()> {
  eprintln!("{}", serde_json::to_string(event)?);
  Ok(())
}

/// Asks each question on stderr and reads one answer line per question.
/// End of input answers with empty strings.
async fn prompt(stdin: &mut Lines<BufReader<Stdin>>, questions: &[String]) -> Result<Vec<String>> {
  let mut stderr = tokio::io::stderr();
  let mut answers = Vec::with_capacity(questions.len());
  for question in questions {
    stderr.write_all(format!("{question}\n> ").as_bytes()).await?;
    stderr.flush().await?;
    let line = stdin.next_line().await.context("failed to read answer from stdin")?;
    answers.push(line.unwrap_or_default());
  }
  Ok(answers)
}

async fn abort_on_ctrl_c(control: ControlHandle, done: CancellationToken) {
  tokio::select! {
    _ = done.cancelled() => {}
    signal = tokio::signal::ctrl_c() => {
      if signal.is_ok() && control.abort() {
        eprintln!("Aborting run");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_assignment() {
    let (name, value) = parse_assignment("x=5").unwrap();
    assert_eq!(name, "x");
    assert_eq!(value, DataValue::Number(5.0));

    let (_, value) = parse_assignment("name=hello world").unwrap();
    assert_eq!(value, DataValue::from("hello world"));

    let (_, value) = parse_assignment(r#"q="a=b""#).unwrap();
    assert_eq!(value, DataValue::from("a=b"));

    let (_, value) = parse_assignment(r#"d={"type": "date", "value": "2026-01-01"}"#).unwrap();
    assert_eq!(value, DataValue::Date("2026-01-01".into()));

    assert!(parse_assignment("novalue").is_err());
    assert!(parse_assignment("=1").is_err());
  }

  #[tokio::test]
  async fn test_load_project_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("project.json");
    std::fs::write(
      &path,
      r#"{
        "name": "demo",
        "mainGraphId": "main",
        "graphs": {
          "main": {
            "id": "main",
            "nodes": [{"id": "x", "type": "graphInput", "data": {"id": "x"}}],
            "connections": []
          }
        }
      }"#,
    )
    .unwrap();

    let project = load_project(&path).await.unwrap();
    assert_eq!(project.name, "demo");
    assert!(project.graph("main").is_some());

    let missing = load_project(&dir.path().join("nope.json")).await.unwrap_err();
    assert!(missing.to_string().contains("failed to read project file"));
  }
}
