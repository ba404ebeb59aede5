use thiserror::Error;

use crate::{GraphId, NodeId, PortId};

/// Structural problems with a graph. These fail a whole process.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
  #[error("graph '{graph_id}' not found in project")]
  GraphNotFound { graph_id: GraphId },

  #[error("duplicate node id '{node_id}'")]
  DuplicateNode { node_id: NodeId },

  #[error("connection into '{input_node_id}' references missing node '{node_id}'")]
  MissingNode {
    node_id: NodeId,
    input_node_id: NodeId,
  },

  #[error("node '{node_id}' has no port '{port_id}'")]
  MissingPort { node_id: NodeId, port_id: PortId },

  #[error("input port '{port_id}' on node '{node_id}' has more than one producer")]
  DuplicateInput { node_id: NodeId, port_id: PortId },

  #[error("required input '{port_id}' on node '{node_id}' has no producer and no default")]
  RequiredInputUnconnected { node_id: NodeId, port_id: PortId },

  #[error("loop controller '{inner}' is nested inside the loop of '{outer}'; nested loops are not supported")]
  NestedLoop { outer: NodeId, inner: NodeId },
}

impl GraphError {
  /// The node the problem is attributed to, if any.
  pub fn node_id(&self) -> Option<&NodeId> {
    match self {
      GraphError::GraphNotFound { .. } => None,
      GraphError::DuplicateNode { node_id }
      | GraphError::MissingNode { node_id, .. }
      | GraphError::MissingPort { node_id, .. }
      | GraphError::DuplicateInput { node_id, .. }
      | GraphError::RequiredInputUnconnected { node_id, .. } => Some(node_id),
      GraphError::NestedLoop { inner, .. } => Some(inner),
    }
  }
}
