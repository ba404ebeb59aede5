//! Process-level errors.

use nodeflow_graph::{GraphError, GraphId, NodeId};
use nodeflow_node::{NodeError, ProcessId};

/// Errors that end a process.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
  #[error("graph '{graph_id}' not found in project")]
  GraphNotFound { graph_id: GraphId },

  /// The graph is malformed: missing nodes or ports, unconnected required
  /// inputs, nested loops.
  #[error("invalid graph in process {process_id}: {source}")]
  Structural {
    process_id: ProcessId,
    #[source]
    source: GraphError,
  },

  /// A node could not be instantiated from its definition.
  #[error("node '{node_id}' could not be created in process {process_id}: {source}")]
  NodeConfig {
    node_id: NodeId,
    process_id: ProcessId,
    #[source]
    source: NodeError,
  },

  /// Nothing is running or ready but these nodes never became ready.
  #[error("deadlock in process {process_id}: {} node(s) can never run", pending.len())]
  Deadlock {
    process_id: ProcessId,
    pending: Vec<NodeId>,
  },

  /// A node failed and no downstream node recovered from it.
  #[error("node '{node_id}' failed in process {process_id}: {source}")]
  NodeFailed {
    node_id: NodeId,
    process_id: ProcessId,
    #[source]
    source: NodeError,
  },

  #[error("no recorded output for node '{node_id}' iteration {iteration} in process {process_id}")]
  ReplayMismatch {
    node_id: NodeId,
    process_id: ProcessId,
    iteration: u32,
  },

  /// The caller aborted the run.
  #[error("process {process_id} was aborted")]
  Aborted { process_id: ProcessId },

  /// An `abortGraph` node ended the process with an error.
  #[error("graph aborted by node '{node_id}' in process {process_id}: {message}")]
  GraphAborted {
    node_id: NodeId,
    process_id: ProcessId,
    message: String,
  },

  #[error("process {process_id} exceeded its run timeout")]
  TimedOut { process_id: ProcessId },

  #[error("node '{node_id}' in process {process_id} timed out waiting for user input")]
  UserInputTimedOut {
    node_id: NodeId,
    process_id: ProcessId,
  },

  #[error("graph '{graph_id}' exceeds the subgraph depth limit of {limit}")]
  SubgraphDepthExceeded { graph_id: GraphId, limit: usize },

  #[error("scheduler has already been started")]
  AlreadyStarted,
}

impl ExecutionError {
  /// Whether this is the abort/timeout terminal state rather than a failure
  /// of the graph's logic.
  pub fn is_abort(&self) -> bool {
    matches!(
      self,
      ExecutionError::Aborted { .. }
        | ExecutionError::TimedOut { .. }
        | ExecutionError::UserInputTimedOut { .. }
    )
  }

  pub fn node_id(&self) -> Option<&NodeId> {
    match self {
      ExecutionError::Structural { source, .. } => source.node_id(),
      ExecutionError::NodeConfig { node_id, .. }
      | ExecutionError::NodeFailed { node_id, .. }
      | ExecutionError::ReplayMismatch { node_id, .. }
      | ExecutionError::GraphAborted { node_id, .. }
      | ExecutionError::UserInputTimedOut { node_id, .. } => Some(node_id),
      ExecutionError::Deadlock { pending, .. } => pending.first(),
      _ => None,
    }
  }

  pub fn process_id(&self) -> Option<ProcessId> {
    match self {
      ExecutionError::Structural { process_id, .. }
      | ExecutionError::NodeConfig { process_id, .. }
      | ExecutionError::Deadlock { process_id, .. }
      | ExecutionError::NodeFailed { process_id, .. }
      | ExecutionError::ReplayMismatch { process_id, .. }
      | ExecutionError::Aborted { process_id }
      | ExecutionError::GraphAborted { process_id, .. }
      | ExecutionError::TimedOut { process_id }
      | ExecutionError::UserInputTimedOut { process_id, .. } => Some(*process_id),
      _ => None,
    }
  }

  /// The innermost error, following failed subgraph nodes into their child
  /// processes.
  pub fn origin(&self) -> &ExecutionError {
    if let ExecutionError::NodeFailed {
      source: NodeError::Subgraph { source, .. },
      ..
    } = self
    {
      if let Some(inner) = source.downcast_ref::<ExecutionError>() {
        return inner.origin();
      }
    }
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_origin_walks_nested_subgraphs() {
    let leaf_process = ProcessId::new();
    let leaf = ExecutionError::NodeFailed {
      node_id: "boom".into(),
      process_id: leaf_process,
      source: NodeError::failed("kaput"),
    };
    let middle = ExecutionError::NodeFailed {
      node_id: "call_leaf".into(),
      process_id: ProcessId::new(),
      source: NodeError::Subgraph {
        graph_id: "leaf".into(),
        source: Box::new(leaf),
      },
    };
    let root = ExecutionError::NodeFailed {
      node_id: "call_middle".into(),
      process_id: ProcessId::new(),
      source: NodeError::Subgraph {
        graph_id: "middle".into(),
        source: Box::new(middle),
      },
    };

    let origin = root.origin();
    assert_eq!(origin.node_id().map(NodeId::as_str), Some("boom"));
    assert_eq!(origin.process_id(), Some(leaf_process));
    assert!(!root.is_abort());
  }

  #[test]
  fn test_abort_states() {
    let process_id = ProcessId::new();
    assert!(ExecutionError::Aborted { process_id }.is_abort());
    assert!(ExecutionError::TimedOut { process_id }.is_abort());
    assert!(!ExecutionError::AlreadyStarted.is_abort());
  }
}
