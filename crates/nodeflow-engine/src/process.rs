//! One process: a single run of one graph.
//!
//! ```text
//! run_process
//! ├── Plan::build          - instantiate nodes, validate wiring, find loops
//! └── Process::drive       - the scheduling loop
//!     ├── propagate        - pending -> ready | excluded, to a fixpoint
//!     ├── dispatch         - ready -> running, one task per node
//!     └── select!
//!         ├── cancellation / run timeout
//!         ├── control messages (root only)
//!         ├── pause watch
//!         ├── signals from nodes (user input, abortGraph)
//!         └── finished tasks -> complete
//! ```
//!
//! All state transitions happen on the loop; node tasks only report back.
//! A node becomes ready once every connected input has a value in the
//! current pass and every unconnected one falls back to its default.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use nodeflow_graph::{GraphId, NodeId, OnError};
use nodeflow_node::{
  ExecutionContext, ExecutionKey, GraphInputs, GraphOutputs, Inputs, LOOP_BREAK_PORT, NodeError,
  NodeRole, Outputs, PortDef, ProcessId, ProcessServices, Usage,
};
use nodeflow_value::DataValue;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::control::ControlMessage;
use crate::plan::{Plan, PlanError, PlannedNode};
use crate::services::{ProcessHandle, ProcessSignal, ProcessTree};
use crate::state::{LoopState, NodeRecord, NodeStatus};
use crate::task::{JobFailure, JobResult, NodeJob, SplitPlan, run_job};
use crate::{ExecutionError, ExecutionEvent, ReplaySource};

/// Upper bound on waiting for cancelled node tasks to return.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

pub(crate) type StatusTable = Arc<RwLock<HashMap<NodeId, NodeStatus>>>;

/// What to run and where it sits in the process tree.
pub(crate) struct ProcessSpec {
  pub process_id: ProcessId,
  pub graph_id: GraphId,
  pub inputs: GraphInputs,
  pub context_values: GraphInputs,
  pub parent: Option<ProcessId>,
  pub depth: usize,
  pub cancel: CancellationToken,
}

/// Extra wiring only the root process gets.
pub(crate) struct RootHooks {
  pub control: mpsc::UnboundedReceiver<ControlMessage>,
  pub statuses: StatusTable,
  pub usage: Arc<Mutex<Usage>>,
}

#[derive(Debug)]
pub(crate) struct ProcessOutcome {
  pub outputs: GraphOutputs,
  pub usage: Usage,
}

#[instrument(
  name = "process_run",
  skip(tree, spec, root),
  fields(process_id = %spec.process_id, graph_id = %spec.graph_id, depth = spec.depth)
)]
pub(crate) async fn run_process(
  tree: Arc<ProcessTree>,
  spec: ProcessSpec,
  root: Option<RootHooks>,
) -> Result<ProcessOutcome, ExecutionError> {
  let process_id = spec.process_id;
  let graph_id = spec.graph_id.clone();

  info!(process_id = %process_id, graph_id = %graph_id, parent = ?spec.parent, "process_started");
  tree.emit(ExecutionEvent::GraphStart {
    graph_id: graph_id.clone(),
    process_id,
    parent: spec.parent,
  });

  let (control, statuses, usage) = match root {
    Some(hooks) => (Some(hooks.control), Some(hooks.statuses), hooks.usage),
    None => (None, None, Arc::new(Mutex::new(Usage::default()))),
  };

  let result = match Process::new(tree.clone(), spec, statuses, usage.clone()) {
    Ok((mut process, signals)) => process.drive(control, signals).await,
    Err(err) => Err(err),
  };
  let usage = *usage.lock().unwrap_or_else(PoisonError::into_inner);

  match &result {
    Ok(outputs) => {
      info!(process_id = %process_id, outputs = outputs.len(), cost = usage.cost, "process_completed");
      tree.emit(ExecutionEvent::GraphFinish {
        graph_id,
        process_id,
        outputs: outputs.clone(),
        usage,
      });
    }
    Err(err) => {
      if err.is_abort() {
        warn!(process_id = %process_id, reason = %err, "process_aborted");
      } else {
        error!(process_id = %process_id, error = %err, "process_failed");
      }
      tree.emit(ExecutionEvent::GraphError {
        graph_id,
        process_id,
        error: err.to_string(),
      });
    }
  }

  result.map(|outputs| ProcessOutcome { outputs, usage })
}

/// How one input port is fed right now.
enum Feed {
  /// No producer (or one ignored on a loop's first pass).
  Unconnected,
  /// The producer has not resolved in this pass.
  Waiting,
  Value(DataValue),
}

enum Gather {
  Wait,
  Exclude,
  Ready(Inputs),
}

struct Process {
  tree: Arc<ProcessTree>,
  process_id: ProcessId,
  is_root: bool,
  cancel: CancellationToken,
  plan: Plan,
  order: Vec<NodeId>,
  services: Arc<dyn ProcessServices>,
  replay: Option<Arc<dyn ReplaySource>>,
  records: HashMap<NodeId, NodeRecord>,
  loops: Vec<LoopState>,
  /// Failed nodes in failure order.
  errors: Vec<(NodeId, NodeError)>,
  /// Ready nodes held back while paused.
  ready: Vec<(NodeId, Inputs)>,
  paused: bool,
  statuses: Option<StatusTable>,
}

impl Process {
  fn new(
    tree: Arc<ProcessTree>,
    spec: ProcessSpec,
    statuses: Option<StatusTable>,
    usage: Arc<Mutex<Usage>>,
  ) -> Result<(Self, mpsc::UnboundedReceiver<ProcessSignal>), ExecutionError> {
    let ProcessSpec {
      process_id,
      graph_id,
      inputs,
      context_values,
      parent,
      depth,
      cancel,
    } = spec;

    let graph = tree
      .project
      .graph(graph_id.as_str())
      .ok_or_else(|| ExecutionError::GraphNotFound {
        graph_id: graph_id.clone(),
      })?;
    let plan = Plan::build(graph, &tree.project, &tree.registry).map_err(|err| match err {
      PlanError::Graph(source) => ExecutionError::Structural { process_id, source },
      PlanError::Node { node_id, source } => ExecutionError::NodeConfig {
        node_id,
        process_id,
        source,
      },
    })?;

    let (signals_tx, signals) = mpsc::unbounded_channel();
    let services: Arc<dyn ProcessServices> = Arc::new(ProcessHandle {
      tree: tree.clone(),
      process_id,
      depth,
      graph_inputs: inputs,
      context_values,
      usage,
      signals: signals_tx,
    });

    let order = plan.order().to_vec();
    let records = order.iter().map(|id| (id.clone(), NodeRecord::new())).collect();
    let loops = plan.loops.iter().map(|_| LoopState::default()).collect();
    if let Some(table) = &statuses {
      let mut table = table.write().unwrap_or_else(PoisonError::into_inner);
      table.clear();
      table.extend(order.iter().map(|id| (id.clone(), NodeStatus::Pending)));
    }

    let is_root = parent.is_none();
    let process = Self {
      replay: if is_root { tree.replay.clone() } else { None },
      tree,
      process_id,
      is_root,
      cancel,
      plan,
      order,
      services,
      records,
      loops,
      errors: Vec::new(),
      ready: Vec::new(),
      paused: false,
      statuses,
    };
    Ok((process, signals))
  }

  async fn drive(
    &mut self,
    mut control: Option<mpsc::UnboundedReceiver<ControlMessage>>,
    mut signals: mpsc::UnboundedReceiver<ProcessSignal>,
  ) -> Result<GraphOutputs, ExecutionError> {
    let mut tasks: JoinSet<JobResult> = JoinSet::new();
    let mut pause = self.tree.pause.subscribe();
    self.paused = *pause.borrow_and_update();

    let cancel = self.cancel.clone();
    let deadline = self
      .tree
      .config
      .run_timeout
      .filter(|_| self.is_root)
      .map(|limit| tokio::time::Instant::now() + limit);
    let timeout = async move {
      match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
      }
    };
    tokio::pin!(timeout);

    loop {
      if cancel.is_cancelled() {
        self.shutdown(&mut tasks).await;
        return Err(ExecutionError::Aborted {
          process_id: self.process_id,
        });
      }

      self.advance(&mut tasks);
      if tasks.is_empty() && self.ready.is_empty() {
        return self.finish();
      }

      // A node's signal is sent before its task returns and must win.
      tokio::select! {
        biased;
        _ = cancel.cancelled() => {}
        _ = &mut timeout => {
          warn!(process_id = %self.process_id, "run_timed_out");
          self.shutdown(&mut tasks).await;
          return Err(ExecutionError::TimedOut { process_id: self.process_id });
        }
        Some(signal) = signals.recv() => {
          if let Some(exit) = self.handle_signal(signal, &mut tasks).await {
            return exit;
          }
        }
        Some(message) = next_control(&mut control) => self.handle_control(message),
        Ok(()) = pause.changed() => {
          self.paused = *pause.borrow_and_update();
          debug!(process_id = %self.process_id, paused = self.paused, "pause_changed");
        }
        Some(joined) = tasks.join_next() => match joined {
          Ok(result) => {
            if let Err(err) = self.complete(result) {
              self.shutdown(&mut tasks).await;
              return Err(err);
            }
          }
          Err(err) => warn!(process_id = %self.process_id, error = %err, "node_task_join_failed"),
        },
      }
    }
  }

  fn handle_control(&mut self, message: ControlMessage) {
    match message {
      ControlMessage::Abort => {
        info!(process_id = %self.process_id, "abort_requested");
        self.cancel.cancel();
      }
      ControlMessage::Pause => {
        self.paused = true;
        if self.tree.set_paused(true) {
          info!(process_id = %self.process_id, "process_paused");
          self.tree.emit(ExecutionEvent::Pause);
        }
      }
      ControlMessage::Resume => {
        self.paused = false;
        if self.tree.set_paused(false) {
          info!(process_id = %self.process_id, "process_resumed");
          self.tree.emit(ExecutionEvent::Resume);
        }
      }
      ControlMessage::UserInput { target, answers } => {
        self.tree.supply_user_input(&target, answers);
      }
      ControlMessage::RaiseEvent { name, value } => self.tree.raise_event(&name, value),
    }
  }

  async fn handle_signal(
    &mut self,
    signal: ProcessSignal,
    tasks: &mut JoinSet<JobResult>,
  ) -> Option<Result<GraphOutputs, ExecutionError>> {
    match signal {
      ProcessSignal::Waiting(node_id) => {
        if self.status(&node_id) == Some(NodeStatus::Running) {
          self.set_status(&node_id, NodeStatus::Waiting);
        }
        None
      }
      ProcessSignal::Resumed(node_id) => {
        if self.status(&node_id) == Some(NodeStatus::Waiting) {
          self.set_status(&node_id, NodeStatus::Running);
        }
        None
      }
      ProcessSignal::UserInputTimedOut(node_id) => {
        self.shutdown(tasks).await;
        Some(Err(ExecutionError::UserInputTimedOut {
          node_id,
          process_id: self.process_id,
        }))
      }
      ProcessSignal::AbortGraph { node_id, error } => {
        self.shutdown(tasks).await;
        match error {
          None => {
            info!(process_id = %self.process_id, node_id = %node_id, "graph_aborted_successfully");
            if self.is_root {
              self.tree.emit(ExecutionEvent::Abort { successful: true });
            }
            Some(Ok(self.final_outputs()))
          }
          Some(message) => Some(Err(ExecutionError::GraphAborted {
            node_id,
            process_id: self.process_id,
            message,
          })),
        }
      }
    }
  }

  /// Cancel everything still in flight and mark unfinished nodes aborted.
  async fn shutdown(&mut self, tasks: &mut JoinSet<JobResult>) {
    self.cancel.cancel();
    // Cancelled jobs return on their own once their grace ends
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
      while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
      warn!(process_id = %self.process_id, running = tasks.len(), "process_tasks_abandoned");
      tasks.shutdown().await;
    }
    self.ready.clear();
    for index in 0..self.order.len() {
      let id = self.order[index].clone();
      if self.status(&id).is_some_and(|s| !s.is_terminal()) {
        self.mark_aborted(&id);
      }
    }
  }

  fn advance(&mut self, tasks: &mut JoinSet<JobResult>) {
    self.propagate();
    if self.paused {
      return;
    }
    for (id, inputs) in std::mem::take(&mut self.ready) {
      if self.status(&id) == Some(NodeStatus::Ready) {
        self.dispatch(id, inputs, tasks);
      }
    }
  }

  /// Move pending nodes to ready or excluded until nothing changes.
  fn propagate(&mut self) {
    loop {
      let mut changed = false;
      for index in 0..self.order.len() {
        let id = self.order[index].clone();
        if self.status(&id) != Some(NodeStatus::Pending) {
          continue;
        }
        match self.gather(&id) {
          Gather::Wait => {}
          Gather::Exclude => {
            self.exclude(&id);
            changed = true;
          }
          Gather::Ready(inputs) => {
            self.set_status(&id, NodeStatus::Ready);
            self.ready.push((id, inputs));
            changed = true;
          }
        }
      }
      if !changed {
        return;
      }
    }
  }

  fn gather(&self, id: &NodeId) -> Gather {
    let Some(planned) = self.plan.node(id.as_str()) else {
      return Gather::Wait;
    };
    if planned.role == NodeRole::RaceInputs {
      return self.gather_race(id, planned);
    }

    let mut inputs = Inputs::new();
    for port in &planned.inputs {
      match self.feed(id, port) {
        Feed::Waiting => return Gather::Wait,
        Feed::Value(value) => {
          inputs.insert(port.id.clone(), value);
        }
        Feed::Unconnected => {
          if let Some(default) = &port.default {
            inputs.insert(port.id.clone(), default.clone());
          }
        }
      }
    }

    // Only connected ports can carry the sentinel here.
    if !planned.imp.accepts_excluded_inputs() && inputs.values().any(DataValue::is_excluded) {
      return Gather::Exclude;
    }
    Gather::Ready(inputs)
  }

  /// A race runs on the first non-excluded value, or once every producer
  /// has resolved.
  fn gather_race(&self, id: &NodeId, planned: &PlannedNode) -> Gather {
    let mut inputs = Inputs::new();
    let mut waiting = false;
    for port in &planned.inputs {
      match self.feed(id, port) {
        Feed::Value(value) => {
          inputs.insert(port.id.clone(), value);
        }
        Feed::Waiting => waiting = true,
        Feed::Unconnected => {}
      }
    }
    if !waiting || inputs.values().any(|v| !v.is_excluded()) {
      Gather::Ready(inputs)
    } else {
      Gather::Wait
    }
  }

  fn feed(&self, consumer: &NodeId, port: &PortDef) -> Feed {
    let Some(conn) = self
      .plan
      .index
      .producer_of(consumer.as_str(), port.id.as_str())
    else {
      return Feed::Unconnected;
    };
    let producer = &conn.output_node_id;
    if self.ignores_feedback(consumer, producer) {
      return Feed::Unconnected;
    }
    if !self.visible(producer, consumer) {
      return Feed::Waiting;
    }
    match self.records.get(producer).and_then(|r| r.outputs.as_ref()) {
      Some(outputs) => Feed::Value(
        outputs
          .get(&conn.output_port_id)
          .cloned()
          .unwrap_or_else(DataValue::excluded),
      ),
      None => Feed::Waiting,
    }
  }

  /// A controller's first pass reads defaults, not the loop body.
  fn ignores_feedback(&self, consumer: &NodeId, producer: &NodeId) -> bool {
    let Some(region) = self.plan.region_of(consumer.as_str()) else {
      return false;
    };
    self.plan.loops[region].controller == *consumer
      && self.loops[region].iteration == 0
      && self.plan.region_of(producer.as_str()) == Some(region)
  }

  /// Values inside a loop are hidden from the rest of the graph until the
  /// loop finishes.
  fn visible(&self, producer: &NodeId, consumer: &NodeId) -> bool {
    match self.plan.region_of(producer.as_str()) {
      Some(region) if self.plan.region_of(consumer.as_str()) != Some(region) => self.loops[region].finished,
      _ => true,
    }
  }

  /// The controller's pass `k` is followed by the body's pass `k`.
  fn iteration_of(&self, id: &NodeId) -> u32 {
    let Some(region) = self.plan.region_of(id.as_str()) else {
      return 0;
    };
    let iteration = self.loops[region].iteration;
    if self.plan.loops[region].controller == *id {
      iteration
    } else {
      iteration.saturating_sub(1)
    }
  }

  fn split_plan(&self, planned: &PlannedNode, inputs: &Inputs) -> Option<SplitPlan> {
    if !planned.node.is_split_run {
      return None;
    }
    let ports: Vec<_> = planned
      .inputs
      .iter()
      .filter(|port| !port.declares_array())
      .filter_map(|port| {
        let value = inputs.get(&port.id).filter(|v| v.is_array())?;
        Some((port.id.clone(), value.items()?))
      })
      .collect();
    if ports.is_empty() {
      return None;
    }

    let longest = ports.iter().map(|(_, items)| items.len()).max().unwrap_or(0);
    let cap = planned.node.split_run_max.or(self.tree.config.default_split_max);
    Some(SplitPlan {
      count: cap.map_or(longest, |cap| longest.min(cap)),
      ports,
      outputs: planned
        .outputs
        .iter()
        .map(|p| (p.id.clone(), p.data_type()))
        .collect(),
      sequential: planned.node.is_split_sequential,
      isolate_errors: planned.node.split_isolate_errors,
    })
  }

  fn dispatch(&mut self, id: NodeId, inputs: Inputs, tasks: &mut JoinSet<JobResult>) {
    let Some(planned) = self.plan.node(id.as_str()) else {
      return;
    };
    let iteration = self.iteration_of(&id);
    let replay = self.replay.clone().filter(|_| !planned.imp.steers_process());
    let split = if replay.is_some() {
      None
    } else {
      self.split_plan(planned, &inputs)
    };
    let node_type = planned.node.node_type.clone();
    let imp = planned.imp.clone();

    let token = self.cancel.child_token();
    let key = ExecutionKey {
      node_id: id.clone(),
      process_id: self.process_id,
      iteration,
      branch: None,
    };
    let ctx = ExecutionContext::new(key, self.tree.settings.clone(), token.clone(), self.services.clone());

    debug!(
      node_id = %id,
      node_type = %node_type,
      iteration,
      branches = ?split.as_ref().map(|s| s.count),
      "node_started"
    );
    self.tree.emit(ExecutionEvent::NodeStart {
      node_id: id.clone(),
      process_id: self.process_id,
      iteration,
      inputs: inputs.clone(),
    });

    tasks.spawn(run_job(NodeJob {
      node_id: id.clone(),
      node_type,
      imp,
      inputs,
      split,
      ctx,
      replay,
    }));

    self.set_status(&id, NodeStatus::Running);
    if let Some(record) = self.records.get_mut(&id) {
      record.token = Some(token);
    }
  }

  /// Apply a finished task. Only replay mismatches end the process here.
  fn complete(&mut self, result: JobResult) -> Result<(), ExecutionError> {
    let JobResult {
      node_id,
      iteration,
      outcome,
    } = result;

    let Some(record) = self.records.get_mut(&node_id) else {
      return Ok(());
    };
    if !record.status.is_active() {
      debug!(node_id = %node_id, status = ?record.status, "late_result_ignored");
      return Ok(());
    }
    record.token = None;

    match outcome {
      Ok(outputs) => self.finish_node(&node_id, iteration, outputs),
      Err(JobFailure::ReplayMismatch) => {
        return Err(ExecutionError::ReplayMismatch {
          node_id,
          process_id: self.process_id,
          iteration,
        });
      }
      Err(JobFailure::Node(err)) if err.is_aborted() && self.cancel.is_cancelled() => {
        self.mark_aborted(&node_id)
      }
      Err(JobFailure::Node(err)) => self.fail_node(&node_id, iteration, err),
    }
    Ok(())
  }

  fn finish_node(&mut self, id: &NodeId, iteration: u32, mut outputs: Outputs) {
    let Some(planned) = self.plan.node(id.as_str()) else {
      return;
    };
    for port in &planned.outputs {
      outputs
        .entry(port.id.clone())
        .or_insert_with(DataValue::excluded);
    }
    let role = planned.role.clone();

    debug!(node_id = %id, iteration, outputs = outputs.len(), "node_completed");
    self.tree.emit(ExecutionEvent::NodeFinish {
      node_id: id.clone(),
      process_id: self.process_id,
      iteration,
      outputs: outputs.clone(),
    });
    self.resolve(id, NodeStatus::Completed, outputs);

    match role {
      NodeRole::LoopController => self.after_controller(id, iteration),
      NodeRole::RaceInputs => self.after_race(id),
      _ => {}
    }
  }

  fn fail_node(&mut self, id: &NodeId, iteration: u32, err: NodeError) {
    let Some(planned) = self.plan.node(id.as_str()) else {
      return;
    };
    warn!(node_id = %id, iteration, error = %err, "node_failed");
    self.tree.emit(ExecutionEvent::NodeError {
      node_id: id.clone(),
      process_id: self.process_id,
      iteration,
      error: err.to_string(),
    });

    if planned.node.on_error == OnError::UseDefaults {
      let defaults = planned
        .outputs
        .iter()
        .map(|port| {
          let value = port
            .default
            .clone()
            .unwrap_or_else(|| port.data_type().default_value());
          (port.id.clone(), value)
        })
        .collect();
      self.finish_node(id, iteration, defaults);
      return;
    }

    let outputs = self.excluded_outputs(id);
    self.resolve(id, NodeStatus::Errored, outputs);
    self.errors.push((id.clone(), err));
  }

  fn exclude(&mut self, id: &NodeId) {
    let iteration = self.iteration_of(id);
    debug!(node_id = %id, iteration, "node_excluded");
    self.tree.emit(ExecutionEvent::NodeExcluded {
      node_id: id.clone(),
      process_id: self.process_id,
      iteration,
    });
    let outputs = self.excluded_outputs(id);
    self.resolve(id, NodeStatus::Excluded, outputs);
  }

  fn mark_aborted(&mut self, id: &NodeId) {
    if let Some(token) = self.records.get_mut(id).and_then(|r| r.token.take()) {
      token.cancel();
    }
    let iteration = self.iteration_of(id);
    debug!(node_id = %id, iteration, "node_aborted");
    self.tree.emit(ExecutionEvent::NodeAborted {
      node_id: id.clone(),
      process_id: self.process_id,
      iteration,
    });
    let outputs = self.excluded_outputs(id);
    self.resolve(id, NodeStatus::Aborted, outputs);
  }

  /// Record a terminal state. A loop whose controller ends without asking
  /// for another pass is finished.
  fn resolve(&mut self, id: &NodeId, status: NodeStatus, outputs: Outputs) {
    if let Some(record) = self.records.get_mut(id) {
      record.outputs = Some(outputs);
    }
    self.set_status(id, status);
    if let Some(region) = self.plan.region_of(id.as_str()) {
      if self.plan.loops[region].controller == *id {
        self.loops[region].finished = true;
      }
    }
  }

  fn excluded_outputs(&self, id: &NodeId) -> Outputs {
    self
      .plan
      .node(id.as_str())
      .map(|planned| {
        planned
          .outputs
          .iter()
          .map(|port| (port.id.clone(), DataValue::excluded()))
          .collect()
      })
      .unwrap_or_default()
  }

  /// Re-arm the loop body when the controller asks for another pass.
  fn after_controller(&mut self, id: &NodeId, iteration: u32) {
    let Some(region) = self.plan.region_of(id.as_str()) else {
      return;
    };
    let continues = self
      .records
      .get(id)
      .and_then(|r| r.outputs.as_ref())
      .and_then(|o| o.get(LOOP_BREAK_PORT))
      .is_some_and(DataValue::is_loop_not_broken);
    if !continues {
      info!(node_id = %id, passes = iteration + 1, "loop_finished");
      return;
    }

    let body = self.plan.loops[region].body.clone();
    let archived: BTreeMap<NodeId, Outputs> = body
      .iter()
      .filter_map(|b| Some((b.clone(), self.records.get(b)?.outputs.clone()?)))
      .collect();
    if !archived.is_empty() {
      self.loops[region].history.push(archived);
    }

    for node in &body {
      if let Some(record) = self.records.get_mut(node) {
        record.outputs = None;
      }
      self.set_status(node, NodeStatus::Pending);
    }
    // The controller keeps its outputs so the body can read them.
    self.set_status(id, NodeStatus::Pending);

    let state = &mut self.loops[region];
    state.finished = false;
    state.iteration += 1;
    debug!(
      node_id = %id,
      iteration = state.iteration,
      archived = state.history.len(),
      "loop_iteration"
    );
  }

  /// Abort every branch that only existed to feed the race.
  fn after_race(&mut self, id: &NodeId) {
    let losers = self.plan.exclusive_ancestors(id);
    let mut aborted = 0usize;
    for index in 0..self.order.len() {
      let node = self.order[index].clone();
      if losers.contains(&node) && self.status(&node).is_some_and(|s| !s.is_terminal()) {
        self.mark_aborted(&node);
        aborted += 1;
      }
    }
    debug!(node_id = %id, aborted, "race_settled");
  }

  fn finish(&mut self) -> Result<GraphOutputs, ExecutionError> {
    let pending: Vec<NodeId> = self
      .order
      .iter()
      .filter(|id| self.status(id) == Some(NodeStatus::Pending))
      .cloned()
      .collect();
    if !pending.is_empty() {
      return Err(ExecutionError::Deadlock {
        process_id: self.process_id,
        pending,
      });
    }

    if let Some(position) = self.errors.iter().position(|(id, _)| !self.recovered(id)) {
      let (node_id, source) = self.errors.swap_remove(position);
      return Err(ExecutionError::NodeFailed {
        node_id,
        process_id: self.process_id,
        source,
      });
    }

    Ok(self.final_outputs())
  }

  /// A failure is recovered when a downstream redundancy node completed
  /// with a real value.
  fn recovered(&self, failed: &NodeId) -> bool {
    self
      .plan
      .index
      .descendants(failed.as_str())
      .iter()
      .any(|id| {
        let recovers = self
          .plan
          .node(id.as_str())
          .is_some_and(|planned| planned.imp.recovers_failures());
        let record = self.records.get(id);
        recovers
          && record.is_some_and(|r| r.status == NodeStatus::Completed)
          && record
            .and_then(|r| r.outputs.as_ref())
            .is_some_and(|outputs| outputs.values().any(|v| !v.is_excluded()))
      })
  }

  /// Values of the graph's output nodes that resolved. Several nodes may
  /// share an output id; the first non-excluded value wins.
  fn final_outputs(&self) -> GraphOutputs {
    let mut outputs = GraphOutputs::new();
    for id in &self.order {
      let Some(planned) = self.plan.node(id.as_str()) else {
        continue;
      };
      let NodeRole::GraphOutput { output_id } = &planned.role else {
        continue;
      };
      let Some(record) = self.records.get(id) else {
        continue;
      };
      let value = match record.status {
        NodeStatus::Completed => planned
          .outputs
          .first()
          .and_then(|port| record.outputs.as_ref()?.get(&port.id).cloned())
          .unwrap_or_else(DataValue::excluded),
        NodeStatus::Excluded | NodeStatus::Errored | NodeStatus::Aborted => DataValue::excluded(),
        _ => continue,
      };
      let keep_existing = outputs.get(output_id).is_some_and(|v| !v.is_excluded());
      if !keep_existing {
        outputs.insert(output_id.clone(), value);
      }
    }
    outputs
  }

  fn status(&self, id: &NodeId) -> Option<NodeStatus> {
    self.records.get(id).map(|r| r.status)
  }

  fn set_status(&mut self, id: &NodeId, status: NodeStatus) {
    if let Some(record) = self.records.get_mut(id) {
      record.status = status;
    }
    if let Some(table) = &self.statuses {
      table
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(id.clone(), status);
    }
  }
}

async fn next_control(control: &mut Option<mpsc::UnboundedReceiver<ControlMessage>>) -> Option<ControlMessage> {
  match control {
    Some(receiver) => receiver.recv().await,
    None => std::future::pending().await,
  }
}
