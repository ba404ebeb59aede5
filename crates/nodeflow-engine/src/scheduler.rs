//! The public entry point: run one graph of a project to completion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use nodeflow_graph::{GraphId, NodeId, Project};
use nodeflow_node::{
  EchoFunction, ExternalFunction, GraphInputs, GraphOutputs, NodeRegistry, ProcessId, Settings, Usage,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::control::ControlMessage;
use crate::process::{ProcessSpec, RootHooks, StatusTable, run_process};
use crate::services::ProcessTree;
use crate::{
  ControlHandle, ExecutionError, ExecutionEvent, ExecutionNotifier, NodeStatus, NoopNotifier, ReplaySource,
  SchedulerConfig,
};

/// Runs a graph once.
///
/// # Usage
///
/// ```ignore
/// let (notifier, mut events) = ChannelNotifier::channel();
/// let scheduler = Scheduler::new(project, "main", builtin_registry())
///   .with_notifier(Arc::new(notifier));
///
/// let control = scheduler.control();
/// let outputs = scheduler.run(inputs, GraphInputs::new()).await?;
/// ```
///
/// A scheduler runs at most once; a second `run` fails with
/// [`ExecutionError::AlreadyStarted`].
pub struct Scheduler {
  project: Arc<Project>,
  graph_id: GraphId,
  registry: Arc<NodeRegistry>,
  notifier: Arc<dyn ExecutionNotifier>,
  config: SchedulerConfig,
  settings: Arc<Settings>,
  externals: HashMap<String, Arc<dyn ExternalFunction>>,
  replay: Option<Arc<dyn ReplaySource>>,
  control: ControlHandle,
  control_rx: Mutex<Option<mpsc::UnboundedReceiver<ControlMessage>>>,
  statuses: StatusTable,
  usage: Arc<Mutex<Usage>>,
}

impl Scheduler {
  pub fn new(project: Project, graph_id: impl Into<GraphId>, registry: NodeRegistry) -> Self {
    let (sender, receiver) = mpsc::unbounded_channel();
    let mut externals: HashMap<String, Arc<dyn ExternalFunction>> = HashMap::new();
    externals.insert("echo".to_string(), Arc::new(EchoFunction));
    Self {
      project: Arc::new(project),
      graph_id: graph_id.into(),
      registry: Arc::new(registry),
      notifier: Arc::new(NoopNotifier),
      config: SchedulerConfig::default(),
      settings: Arc::new(Settings::new()),
      externals,
      replay: None,
      control: ControlHandle::new(sender),
      control_rx: Mutex::new(Some(receiver)),
      statuses: Arc::new(RwLock::new(HashMap::new())),
      usage: Arc::new(Mutex::new(Usage::default())),
    }
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn with_config(mut self, config: SchedulerConfig) -> Self {
    self.config = config;
    self
  }

  pub fn with_settings(mut self, settings: Settings) -> Self {
    self.settings = Arc::new(settings);
    self
  }

  /// Serve node outputs from `source` instead of executing nodes.
  pub fn with_replay(mut self, source: Arc<dyn ReplaySource>) -> Self {
    self.replay = Some(source);
    self
  }

  pub fn with_external_function(mut self, name: impl Into<String>, function: Arc<dyn ExternalFunction>) -> Self {
    self.externals.insert(name.into(), function);
    self
  }

  /// A handle for pausing, resuming, aborting and answering user input while
  /// the run is in progress.
  pub fn control(&self) -> ControlHandle {
    self.control.clone()
  }

  /// Status of every node of the root graph.
  pub fn statuses(&self) -> HashMap<NodeId, NodeStatus> {
    self
      .statuses
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Usage recorded by the root process and its subgraphs so far.
  pub fn usage(&self) -> Usage {
    *self.usage.lock().unwrap_or_else(PoisonError::into_inner)
  }

  #[instrument(name = "scheduler_run", skip_all, fields(graph_id = %self.graph_id))]
  pub async fn run(&self, inputs: GraphInputs, context_values: GraphInputs) -> Result<GraphOutputs, ExecutionError> {
    let control = self
      .control_rx
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take()
      .ok_or(ExecutionError::AlreadyStarted)?;

    let tree = Arc::new(ProcessTree::new(
      self.project.clone(),
      self.registry.clone(),
      self.notifier.clone(),
      self.config.clone(),
      self.settings.clone(),
      self.externals.clone(),
      self.replay.clone(),
    ));

    let process_id = ProcessId::new();
    info!(graph_id = %self.graph_id, process_id = %process_id, "run_started");
    tree.emit(ExecutionEvent::Start {
      graph_id: self.graph_id.clone(),
      process_id,
    });

    let spec = ProcessSpec {
      process_id,
      graph_id: self.graph_id.clone(),
      inputs,
      context_values,
      parent: None,
      depth: 0,
      cancel: CancellationToken::new(),
    };
    let hooks = RootHooks {
      control,
      statuses: self.statuses.clone(),
      usage: self.usage.clone(),
    };

    match run_process(tree.clone(), spec, Some(hooks)).await {
      Ok(outcome) => {
        info!(process_id = %process_id, "run_completed");
        tree.emit(ExecutionEvent::Done {
          outputs: outcome.outputs.clone(),
          usage: outcome.usage,
        });
        Ok(outcome.outputs)
      }
      Err(err) => {
        info!(process_id = %process_id, error = %err, "run_ended_with_error");
        match &err {
          ExecutionError::Aborted { .. } => tree.emit(ExecutionEvent::Abort { successful: false }),
          ExecutionError::GraphAborted { .. } => {
            tree.emit(ExecutionEvent::Abort { successful: false });
            tree.emit(ExecutionEvent::Error {
              error: err.to_string(),
            });
          }
          _ => tree.emit(ExecutionEvent::Error {
            error: err.to_string(),
          }),
        }
        Err(err)
      }
    }
  }
}
