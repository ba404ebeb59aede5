use std::sync::Arc;

use nodeflow_graph::{NodeId, Project};
use nodeflow_node::{
  ExecutionContext, ExecutionKey, Inputs, NodeImpl, Outputs, ProcessId, Settings, StandaloneServices,
};
use nodeflow_value::DataValue;
use tokio_util::sync::CancellationToken;

pub(crate) fn context_with(services: StandaloneServices, iteration: u32) -> ExecutionContext {
  let key = ExecutionKey {
    node_id: NodeId::from("under-test"),
    process_id: ProcessId::new(),
    iteration,
    branch: None,
  };
  ExecutionContext::new(
    key,
    Arc::new(Settings::new()),
    CancellationToken::new(),
    Arc::new(services),
  )
}

pub(crate) fn context() -> ExecutionContext {
  context_with(StandaloneServices::new(Project::default()), 0)
}

pub(crate) fn inputs<'a>(pairs: impl IntoIterator<Item = (&'a str, DataValue)>) -> Inputs {
  pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

pub(crate) async fn run(node: &dyn NodeImpl, values: Inputs) -> Outputs {
  node.execute(values, &context()).await.unwrap()
}
