//! The execution context handed to every node.

use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nodeflow_graph::{GraphId, NodeId, Project};
use nodeflow_value::DataValue;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{ExecutionKey, GraphInputs, GraphOutputs, NodeError, Outputs, ProcessId, Settings};

/// Token and cost bookkeeping reported by nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
  pub prompt_tokens: u64,
  pub completion_tokens: u64,
  pub cost: f64,
}

impl AddAssign for Usage {
  fn add_assign(&mut self, rhs: Self) {
    self.prompt_tokens += rhs.prompt_tokens;
    self.completion_tokens += rhs.completion_tokens;
    self.cost += rhs.cost;
  }
}

/// Result of running a child process for a subgraph.
#[derive(Debug, Clone)]
pub struct SubgraphOutcome {
  pub outputs: GraphOutputs,
  pub usage: Usage,
  pub duration: Duration,
}

/// Result of an external function call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalResult {
  pub value: DataValue,
  pub cost: f64,
}

/// A host-provided function callable from graphs.
#[async_trait]
pub trait ExternalFunction: Send + Sync {
  async fn call(&self, args: Vec<DataValue>) -> Result<ExternalResult, NodeError>;
}

/// Returns its first argument unchanged.
#[derive(Debug, Clone, Default)]
pub struct EchoFunction;

#[async_trait]
impl ExternalFunction for EchoFunction {
  async fn call(&self, args: Vec<DataValue>) -> Result<ExternalResult, NodeError> {
    Ok(ExternalResult {
      value: args
        .into_iter()
        .next()
        .unwrap_or(DataValue::Any(serde_json::Value::Null)),
      cost: 0.0,
    })
  }
}

/// Services a running process offers to its nodes.
///
/// The scheduler implements this; [`crate::StandaloneServices`] implements
/// it for running a single node outside any process.
#[async_trait]
pub trait ProcessServices: Send + Sync {
  fn project(&self) -> &Project;

  fn graph_input(&self, id: &str) -> Option<DataValue>;

  fn context_value(&self, id: &str) -> Option<DataValue>;

  /// Publish outputs before the node completes.
  fn emit_partial(&self, key: &ExecutionKey, outputs: Outputs);

  /// Run another graph of the project as a child process.
  async fn run_subgraph(
    &self,
    caller: &ExecutionKey,
    cancel: CancellationToken,
    graph_id: &GraphId,
    inputs: GraphInputs,
  ) -> Result<SubgraphOutcome, NodeError>;

  /// Park the caller until answers to `questions` are supplied.
  async fn request_user_input(
    &self,
    caller: &ExecutionKey,
    cancel: &CancellationToken,
    questions: Vec<String>,
  ) -> Result<Vec<String>, NodeError>;

  fn global(&self, id: &str) -> Option<DataValue>;

  fn set_global(&self, caller: &ExecutionKey, id: &str, value: DataValue);

  async fn wait_for_global(&self, id: &str, cancel: &CancellationToken) -> Result<DataValue, NodeError>;

  fn raise_event(&self, name: &str, value: DataValue);

  async fn wait_for_event(&self, name: &str, cancel: &CancellationToken) -> Result<DataValue, NodeError>;

  async fn call_external(&self, name: &str, args: Vec<DataValue>) -> Result<ExternalResult, NodeError>;

  fn record_usage(&self, usage: Usage);

  /// End the whole process. `None` ends it successfully.
  fn abort_graph(&self, caller: &ExecutionKey, error: Option<String>);
}

/// Everything a node sees while it executes.
#[derive(Clone)]
pub struct ExecutionContext {
  key: ExecutionKey,
  settings: Arc<Settings>,
  cancel: CancellationToken,
  services: Arc<dyn ProcessServices>,
}

impl ExecutionContext {
  pub fn new(
    key: ExecutionKey,
    settings: Arc<Settings>,
    cancel: CancellationToken,
    services: Arc<dyn ProcessServices>,
  ) -> Self {
    Self {
      key,
      settings,
      cancel,
      services,
    }
  }

  /// The same context for one split-run branch.
  pub fn for_branch(&self, branch: usize) -> Self {
    let mut ctx = self.clone();
    ctx.key.branch = Some(branch);
    ctx
  }

  pub fn key(&self) -> &ExecutionKey {
    &self.key
  }

  pub fn node_id(&self) -> &NodeId {
    &self.key.node_id
  }

  pub fn process_id(&self) -> ProcessId {
    self.key.process_id
  }

  /// Loop pass this execution belongs to (zero outside loops).
  pub fn iteration(&self) -> u32 {
    self.key.iteration
  }

  pub fn branch(&self) -> Option<usize> {
    self.key.branch
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  pub fn cancellation(&self) -> &CancellationToken {
    &self.cancel
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  pub fn project(&self) -> &Project {
    self.services.project()
  }

  pub fn attachment(&self, id: &str) -> Option<DataValue> {
    self.services.project().attachments.get(id).cloned()
  }

  pub fn graph_input(&self, id: &str) -> Option<DataValue> {
    self.services.graph_input(id)
  }

  pub fn context_value(&self, id: &str) -> Option<DataValue> {
    self.services.context_value(id)
  }

  pub fn emit_partial(&self, outputs: Outputs) {
    self.services.emit_partial(&self.key, outputs);
  }

  pub async fn run_subgraph(
    &self,
    graph_id: &GraphId,
    inputs: GraphInputs,
  ) -> Result<SubgraphOutcome, NodeError> {
    self
      .services
      .run_subgraph(&self.key, self.cancel.child_token(), graph_id, inputs)
      .await
  }

  pub async fn request_user_input(&self, questions: Vec<String>) -> Result<Vec<String>, NodeError> {
    self
      .services
      .request_user_input(&self.key, &self.cancel, questions)
      .await
  }

  pub fn global(&self, id: &str) -> Option<DataValue> {
    self.services.global(id)
  }

  pub fn set_global(&self, id: &str, value: DataValue) {
    self.services.set_global(&self.key, id, value);
  }

  pub async fn wait_for_global(&self, id: &str) -> Result<DataValue, NodeError> {
    self.services.wait_for_global(id, &self.cancel).await
  }

  pub fn raise_event(&self, name: &str, value: DataValue) {
    self.services.raise_event(name, value);
  }

  pub async fn wait_for_event(&self, name: &str) -> Result<DataValue, NodeError> {
    self.services.wait_for_event(name, &self.cancel).await
  }

  pub async fn call_external(&self, name: &str, args: Vec<DataValue>) -> Result<ExternalResult, NodeError> {
    let result = tokio::select! {
      result = self.services.call_external(name, args) => result?,
      _ = self.cancel.cancelled() => return Err(NodeError::Aborted),
    };
    if result.cost > 0.0 {
      self.record_usage(Usage {
        cost: result.cost,
        ..Default::default()
      });
    }
    Ok(result)
  }

  pub fn record_usage(&self, usage: Usage) {
    self.services.record_usage(usage);
  }

  pub fn abort_graph(&self, error: Option<String>) {
    self.services.abort_graph(&self.key, error);
  }

  /// Sleep unless cancelled first.
  pub async fn sleep(&self, duration: Duration) -> Result<(), NodeError> {
    tokio::select! {
      _ = tokio::time::sleep(duration) => Ok(()),
      _ = self.cancel.cancelled() => Err(NodeError::Aborted),
    }
  }
}

impl std::fmt::Debug for ExecutionContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ExecutionContext")
      .field("key", &self.key)
      .field("settings", &self.settings)
      .finish_non_exhaustive()
  }
}
