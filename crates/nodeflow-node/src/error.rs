//! Node execution errors.

use nodeflow_graph::{GraphId, PortId};
use nodeflow_value::ValueError;

/// Errors raised by a node's `execute`.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
  /// Generic failure reported by the node.
  #[error("{message}")]
  Failed { message: String },

  #[error("missing required input '{port_id}'")]
  MissingInput { port_id: PortId },

  #[error("invalid input '{port_id}'")]
  InvalidInput {
    port_id: PortId,
    #[source]
    source: ValueError,
  },

  #[error("invalid node configuration: {message}")]
  Config { message: String },

  #[error("unknown node type '{node_type}'")]
  UnknownNodeType { node_type: String },

  #[error("external function '{name}' is not registered")]
  UnknownFunction { name: String },

  #[error("{what} is not available outside a running process")]
  Unsupported { what: String },

  #[error(transparent)]
  Value(#[from] ValueError),

  /// The node observed cancellation.
  #[error("aborted")]
  Aborted,

  #[error("timed out waiting for {what}")]
  TimedOut { what: String },

  /// A child process failed. The source is the child's process error.
  #[error("subgraph '{graph_id}' failed")]
  Subgraph {
    graph_id: GraphId,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },
}

impl NodeError {
  pub fn failed(message: impl Into<String>) -> Self {
    NodeError::Failed {
      message: message.into(),
    }
  }

  pub fn config(message: impl Into<String>) -> Self {
    NodeError::Config {
      message: message.into(),
    }
  }

  pub fn is_aborted(&self) -> bool {
    matches!(self, NodeError::Aborted)
  }
}
