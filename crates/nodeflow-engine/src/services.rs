//! State shared across a process tree, and the services each process offers
//! its nodes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use nodeflow_graph::{GraphId, NodeId, Project};
use nodeflow_node::{
  ExecutionKey, ExternalFunction, ExternalResult, GraphInputs, NodeError, NodeRegistry, Outputs,
  ProcessId, ProcessServices, Settings, SubgraphOutcome, Usage,
};
use nodeflow_value::DataValue;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Notify, broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::InputTarget;
use crate::process::{ProcessSpec, run_process};
use crate::{ExecutionError, ExecutionEvent, ExecutionNotifier, ReplaySource, SchedulerConfig};

const USER_EVENT_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything the root process and its subgraph children have in common.
pub(crate) struct ProcessTree {
  pub project: Arc<Project>,
  pub registry: Arc<NodeRegistry>,
  pub notifier: Arc<dyn ExecutionNotifier>,
  pub config: SchedulerConfig,
  pub settings: Arc<Settings>,
  pub externals: HashMap<String, Arc<dyn ExternalFunction>>,
  /// Only consulted by the root process.
  pub replay: Option<Arc<dyn ReplaySource>>,
  pub pause: watch::Sender<bool>,
  user_inputs: Mutex<HashMap<ExecutionKey, oneshot::Sender<Vec<String>>>>,
  globals: Mutex<HashMap<String, DataValue>>,
  globals_changed: Notify,
  user_events: broadcast::Sender<(String, DataValue)>,
}

impl ProcessTree {
  pub fn new(
    project: Arc<Project>,
    registry: Arc<NodeRegistry>,
    notifier: Arc<dyn ExecutionNotifier>,
    config: SchedulerConfig,
    settings: Arc<Settings>,
    externals: HashMap<String, Arc<dyn ExternalFunction>>,
    replay: Option<Arc<dyn ReplaySource>>,
  ) -> Self {
    let (pause, _) = watch::channel(false);
    let (user_events, _) = broadcast::channel(USER_EVENT_CAPACITY);
    Self {
      project,
      registry,
      notifier,
      config,
      settings,
      externals,
      replay,
      pause,
      user_inputs: Mutex::new(HashMap::new()),
      globals: Mutex::new(HashMap::new()),
      globals_changed: Notify::new(),
      user_events,
    }
  }

  pub fn emit(&self, event: ExecutionEvent) {
    self.notifier.notify(event);
  }

  /// Returns whether the pause state changed.
  pub fn set_paused(&self, paused: bool) -> bool {
    self.pause.send_if_modified(|current| {
      let changed = *current != paused;
      *current = paused;
      changed
    })
  }

  /// Hand answers to a parked node. Returns whether a node received them.
  pub fn supply_user_input(&self, target: &InputTarget, answers: Vec<String>) -> bool {
    let mut pending = lock(&self.user_inputs);
    let key = match target {
      InputTarget::Key(key) => pending.contains_key(key).then(|| key.clone()),
      InputTarget::Node {
        node_id,
        process_id,
      } => {
        let mut matching = pending
          .keys()
          .filter(|k| k.node_id == *node_id && k.process_id == *process_id);
        match (matching.next(), matching.next()) {
          (Some(key), None) => Some(key.clone()),
          (Some(_), Some(_)) => {
            warn!(node_id = %node_id, process_id = %process_id, "user_input_ambiguous");
            None
          }
          _ => None,
        }
      }
    };

    let Some(key) = key else {
      warn!(input_target = ?target, "user_input_unmatched");
      return false;
    };
    debug!(key = %key, "user_input_supplied");
    pending
      .remove(&key)
      .is_some_and(|reply| reply.send(answers).is_ok())
  }

  pub fn raise_event(&self, name: &str, value: DataValue) {
    debug!(event = %name, "user_event_raised");
    // No listeners is fine
    let _ = self.user_events.send((name.to_string(), value.clone()));
    self.emit(ExecutionEvent::UserEvent {
      name: name.to_string(),
      value,
    });
  }
}

/// Requests a node makes of its own process's scheduling loop.
#[derive(Debug)]
pub(crate) enum ProcessSignal {
  Waiting(NodeId),
  Resumed(NodeId),
  UserInputTimedOut(NodeId),
  AbortGraph {
    node_id: NodeId,
    error: Option<String>,
  },
}

/// The [`ProcessServices`] of one process.
pub(crate) struct ProcessHandle {
  pub tree: Arc<ProcessTree>,
  pub process_id: ProcessId,
  pub depth: usize,
  pub graph_inputs: GraphInputs,
  pub context_values: GraphInputs,
  pub usage: Arc<Mutex<Usage>>,
  pub signals: mpsc::UnboundedSender<ProcessSignal>,
}

impl ProcessHandle {
  fn signal(&self, signal: ProcessSignal) {
    // The loop is gone once the process has ended
    let _ = self.signals.send(signal);
  }

  fn forget_user_input(&self, key: &ExecutionKey) {
    lock(&self.tree.user_inputs).remove(key);
  }
}

#[async_trait]
impl ProcessServices for ProcessHandle {
  fn project(&self) -> &Project {
    &self.tree.project
  }

  fn graph_input(&self, id: &str) -> Option<DataValue> {
    self.graph_inputs.get(id).cloned()
  }

  fn context_value(&self, id: &str) -> Option<DataValue> {
    self.context_values.get(id).cloned()
  }

  fn emit_partial(&self, key: &ExecutionKey, outputs: Outputs) {
    self.tree.emit(ExecutionEvent::PartialOutput {
      node_id: key.node_id.clone(),
      process_id: key.process_id,
      iteration: key.iteration,
      branch: key.branch,
      outputs,
    });
  }

  async fn run_subgraph(
    &self,
    caller: &ExecutionKey,
    cancel: CancellationToken,
    graph_id: &GraphId,
    inputs: GraphInputs,
  ) -> Result<SubgraphOutcome, NodeError> {
    let depth = self.depth + 1;
    let limit = self.tree.config.max_subgraph_depth;
    if depth > limit {
      return Err(NodeError::Subgraph {
        graph_id: graph_id.clone(),
        source: Box::new(ExecutionError::SubgraphDepthExceeded {
          graph_id: graph_id.clone(),
          limit,
        }),
      });
    }

    debug!(caller = %caller, graph_id = %graph_id, depth, "subgraph_starting");
    let started = Instant::now();
    let spec = ProcessSpec {
      process_id: ProcessId::new(),
      graph_id: graph_id.clone(),
      inputs,
      context_values: self.context_values.clone(),
      parent: Some(self.process_id),
      depth,
      cancel: cancel.clone(),
    };

    match run_process(self.tree.clone(), spec, None).await {
      Ok(outcome) => {
        self.record_usage(outcome.usage);
        Ok(SubgraphOutcome {
          outputs: outcome.outputs,
          usage: outcome.usage,
          duration: started.elapsed(),
        })
      }
      Err(err) if err.is_abort() && cancel.is_cancelled() => Err(NodeError::Aborted),
      Err(err) => Err(NodeError::Subgraph {
        graph_id: graph_id.clone(),
        source: Box::new(err),
      }),
    }
  }

  async fn request_user_input(
    &self,
    caller: &ExecutionKey,
    cancel: &CancellationToken,
    questions: Vec<String>,
  ) -> Result<Vec<String>, NodeError> {
    let (reply, answer) = oneshot::channel();
    lock(&self.tree.user_inputs).insert(caller.clone(), reply);

    info!(key = %caller, questions = questions.len(), "user_input_requested");
    self.tree.emit(ExecutionEvent::NeedsUserInput {
      key: caller.clone(),
      questions,
    });
    self.signal(ProcessSignal::Waiting(caller.node_id.clone()));

    let timeout = self.tree.config.user_input_timeout;
    let wait = async move {
      match timeout {
        Some(limit) => tokio::time::timeout(limit, answer).await.ok(),
        None => Some(answer.await),
      }
    };
    let answered = tokio::select! {
      answered = wait => answered,
      _ = cancel.cancelled() => {
        self.forget_user_input(caller);
        return Err(NodeError::Aborted);
      }
    };

    match answered {
      Some(Ok(answers)) => {
        self.signal(ProcessSignal::Resumed(caller.node_id.clone()));
        Ok(answers)
      }
      Some(Err(_)) => {
        self.forget_user_input(caller);
        Err(NodeError::Aborted)
      }
      None => {
        self.forget_user_input(caller);
        warn!(key = %caller, "user_input_timed_out");
        self.signal(ProcessSignal::UserInputTimedOut(caller.node_id.clone()));
        Err(NodeError::TimedOut {
          what: "user input".to_string(),
        })
      }
    }
  }

  fn global(&self, id: &str) -> Option<DataValue> {
    lock(&self.tree.globals).get(id).cloned()
  }

  fn set_global(&self, caller: &ExecutionKey, id: &str, value: DataValue) {
    debug!(key = %caller, global = %id, "global_set");
    lock(&self.tree.globals).insert(id.to_string(), value.clone());
    self.tree.globals_changed.notify_waiters();
    self.tree.emit(ExecutionEvent::GlobalSet {
      id: id.to_string(),
      value,
    });
  }

  async fn wait_for_global(&self, id: &str, cancel: &CancellationToken) -> Result<DataValue, NodeError> {
    loop {
      let changed = self.tree.globals_changed.notified();
      tokio::pin!(changed);
      changed.as_mut().enable();
      if let Some(value) = self.global(id) {
        return Ok(value);
      }
      tokio::select! {
        _ = changed.as_mut() => {}
        _ = cancel.cancelled() => return Err(NodeError::Aborted),
      }
    }
  }

  fn raise_event(&self, name: &str, value: DataValue) {
    self.tree.raise_event(name, value);
  }

  async fn wait_for_event(&self, name: &str, cancel: &CancellationToken) -> Result<DataValue, NodeError> {
    let mut events = self.tree.user_events.subscribe();
    loop {
      tokio::select! {
        received = events.recv() => match received {
          Ok((event, value)) if event == name => return Ok(value),
          Ok(_) | Err(RecvError::Lagged(_)) => continue,
          Err(RecvError::Closed) => return Err(NodeError::Aborted),
        },
        _ = cancel.cancelled() => return Err(NodeError::Aborted),
      }
    }
  }

  async fn call_external(&self, name: &str, args: Vec<DataValue>) -> Result<ExternalResult, NodeError> {
    let function = self
      .tree
      .externals
      .get(name)
      .cloned()
      .ok_or_else(|| NodeError::UnknownFunction {
        name: name.to_string(),
      })?;
    function.call(args).await
  }

  fn record_usage(&self, usage: Usage) {
    *lock(&self.usage) += usage;
  }

  fn abort_graph(&self, caller: &ExecutionKey, error: Option<String>) {
    info!(key = %caller, error = ?error, "abort_graph_requested");
    self.signal(ProcessSignal::AbortGraph {
      node_id: caller.node_id.clone(),
      error,
    });
  }
}
