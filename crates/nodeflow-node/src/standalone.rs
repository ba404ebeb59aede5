//! Services for executing a single node outside a process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nodeflow_graph::{GraphId, Project};
use nodeflow_value::DataValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
  EchoFunction, ExecutionKey, ExternalFunction, ExternalResult, GraphInputs, NodeError, Outputs,
  ProcessServices, SubgraphOutcome, Usage,
};

/// A minimal [`ProcessServices`] with no scheduler behind it.
///
/// Graph inputs, context values, globals and external functions work.
/// Anything that needs a live process (subgraphs, user input, events) fails
/// with [`NodeError::Unsupported`].
pub struct StandaloneServices {
  project: Project,
  graph_inputs: GraphInputs,
  context_values: GraphInputs,
  globals: Mutex<HashMap<String, DataValue>>,
  externals: HashMap<String, Arc<dyn ExternalFunction>>,
  usage: Mutex<Usage>,
}

impl StandaloneServices {
  pub fn new(project: Project) -> Self {
    let mut externals: HashMap<String, Arc<dyn ExternalFunction>> = HashMap::new();
    externals.insert("echo".to_string(), Arc::new(EchoFunction));
    Self {
      project,
      graph_inputs: GraphInputs::new(),
      context_values: GraphInputs::new(),
      globals: Mutex::new(HashMap::new()),
      externals,
      usage: Mutex::new(Usage::default()),
    }
  }

  pub fn with_graph_inputs(mut self, inputs: GraphInputs) -> Self {
    self.graph_inputs = inputs;
    self
  }

  pub fn with_context_values(mut self, values: GraphInputs) -> Self {
    self.context_values = values;
    self
  }

  pub fn with_external_function(mut self, name: impl Into<String>, function: Arc<dyn ExternalFunction>) -> Self {
    self.externals.insert(name.into(), function);
    self
  }

  /// Usage recorded so far.
  pub fn usage(&self) -> Usage {
    self.usage.lock().map(|u| *u).unwrap_or_default()
  }
}

#[async_trait]
impl ProcessServices for StandaloneServices {
  fn project(&self) -> &Project {
    &self.project
  }

  fn graph_input(&self, id: &str) -> Option<DataValue> {
    self.graph_inputs.get(id).cloned()
  }

  fn context_value(&self, id: &str) -> Option<DataValue> {
    self.context_values.get(id).cloned()
  }

  fn emit_partial(&self, key: &ExecutionKey, outputs: Outputs) {
    debug!(key = %key, ports = outputs.len(), "partial_output");
  }

  async fn run_subgraph(
    &self,
    _caller: &ExecutionKey,
    _cancel: CancellationToken,
    graph_id: &GraphId,
    _inputs: GraphInputs,
  ) -> Result<SubgraphOutcome, NodeError> {
    Err(NodeError::Unsupported {
      what: format!("subgraph '{graph_id}'"),
    })
  }

  async fn request_user_input(
    &self,
    _caller: &ExecutionKey,
    _cancel: &CancellationToken,
    _questions: Vec<String>,
  ) -> Result<Vec<String>, NodeError> {
    Err(NodeError::Unsupported {
      what: "user input".to_string(),
    })
  }

  fn global(&self, id: &str) -> Option<DataValue> {
    self.globals.lock().ok()?.get(id).cloned()
  }

  fn set_global(&self, _caller: &ExecutionKey, id: &str, value: DataValue) {
    if let Ok(mut globals) = self.globals.lock() {
      globals.insert(id.to_string(), value);
    }
  }

  async fn wait_for_global(&self, id: &str, _cancel: &CancellationToken) -> Result<DataValue, NodeError> {
    self.global(id).ok_or_else(|| NodeError::Unsupported {
      what: format!("waiting for global '{id}'"),
    })
  }

  fn raise_event(&self, name: &str, _value: DataValue) {
    debug!(event = %name, "user_event_dropped");
  }

  async fn wait_for_event(&self, name: &str, _cancel: &CancellationToken) -> Result<DataValue, NodeError> {
    Err(NodeError::Unsupported {
      what: format!("waiting for event '{name}'"),
    })
  }

  async fn call_external(&self, name: &str, args: Vec<DataValue>) -> Result<ExternalResult, NodeError> {
    let function = self
      .externals
      .get(name)
      .ok_or_else(|| NodeError::UnknownFunction {
        name: name.to_string(),
      })?;
    function.call(args).await
  }

  fn record_usage(&self, usage: Usage) {
    if let Ok(mut total) = self.usage.lock() {
      *total += usage;
    }
  }

  fn abort_graph(&self, caller: &ExecutionKey, error: Option<String>) {
    warn!(key = %caller, error = ?error, "abort_graph_ignored");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{ExecutionContext, ProcessId, Settings};

  fn context(services: StandaloneServices) -> ExecutionContext {
    let key = ExecutionKey {
      node_id: "n".into(),
      process_id: ProcessId::new(),
      iteration: 0,
      branch: None,
    };
    ExecutionContext::new(
      key,
      Arc::new(Settings::new()),
      CancellationToken::new(),
      Arc::new(services),
    )
  }

  #[tokio::test]
  async fn test_echo_is_registered() {
    let ctx = context(StandaloneServices::new(Project::default()));
    let result = ctx
      .call_external("echo", vec![DataValue::from("ping")])
      .await
      .unwrap();
    assert_eq!(result.value, DataValue::from("ping"));
  }

  #[tokio::test]
  async fn test_subgraph_is_unsupported() {
    let ctx = context(StandaloneServices::new(Project::default()));
    let err = ctx
      .run_subgraph(&GraphId::from("other"), GraphInputs::new())
      .await
      .unwrap_err();
    assert!(matches!(err, NodeError::Unsupported { .. }));
  }

  #[tokio::test]
  async fn test_globals_round_trip() {
    let ctx = context(StandaloneServices::new(Project::default()));
    ctx.set_global("count", DataValue::Number(2.0));
    assert_eq!(ctx.wait_for_global("count").await.unwrap(), DataValue::Number(2.0));
  }

  #[tokio::test]
  async fn test_sleep_observes_cancellation() {
    let ctx = context(StandaloneServices::new(Project::default()));
    ctx.cancellation().cancel();
    let err = ctx.sleep(std::time::Duration::from_secs(5)).await.unwrap_err();
    assert!(err.is_aborted());
  }
}
