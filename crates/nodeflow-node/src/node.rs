use std::collections::BTreeMap;

use async_trait::async_trait;
use nodeflow_graph::{Connection, NodeId, PortId, Project};
use nodeflow_value::DataValue;

use crate::{ExecutionContext, NodeError, PortDef};

/// Resolved input values keyed by port id. Absent ports were unconnected and
/// had no default.
pub type Inputs = BTreeMap<PortId, DataValue>;

/// Output values keyed by port id.
pub type Outputs = BTreeMap<PortId, DataValue>;

/// Values passed into a graph, keyed by graph input id.
pub type GraphInputs = BTreeMap<String, DataValue>;

/// Values produced by a graph, keyed by graph output id.
pub type GraphOutputs = BTreeMap<String, DataValue>;

/// Output port a loop controller uses to signal that it broke.
pub const LOOP_BREAK_PORT: &str = "break";

/// How the scheduler treats a node beyond plain execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRole {
  Standard,
  /// Owns a loop: re-runs while its `break` port carries the
  /// loop-not-broken sentinel.
  LoopController,
  /// Runs as soon as one input delivers a value, aborting the other branches.
  RaceInputs,
  /// Designates one of the graph's final outputs.
  GraphOutput { output_id: String },
}

/// The interface every node kind implements.
#[async_trait]
pub trait NodeImpl: Send + Sync {
  /// Input ports given the connections touching this node.
  fn input_ports(&self, connections: &[Connection], project: &Project) -> Vec<PortDef>;

  /// Output ports given the connections touching this node.
  fn output_ports(&self, connections: &[Connection], project: &Project) -> Vec<PortDef>;

  /// Execute with resolved inputs.
  ///
  /// Returning the exclusion sentinel on an output port signals that the
  /// corresponding branch did not fire.
  async fn execute(&self, inputs: Inputs, ctx: &ExecutionContext) -> Result<Outputs, NodeError>;

  fn role(&self) -> NodeRole {
    NodeRole::Standard
  }

  /// Whether the node runs even when a connected input is excluded.
  fn accepts_excluded_inputs(&self) -> bool {
    false
  }

  /// Whether the node acts on its own process rather than producing data.
  /// Such nodes execute even while a run is replayed.
  fn steers_process(&self) -> bool {
    false
  }

  /// Whether a non-excluded result from this node absorbs upstream failures.
  fn recovers_failures(&self) -> bool {
    false
  }
}

/// Highest `N` among connected input ports named `{prefix}N` on `node_id`.
///
/// Nodes with a growing list of inputs (`input1`, `input2`, ...) expose one
/// more port than this so there is always a free slot.
pub fn dynamic_port_count(connections: &[Connection], node_id: &NodeId, prefix: &str) -> usize {
  connections
    .iter()
    .filter(|c| c.input_node_id == *node_id)
    .filter_map(|c| c.input_port_id.as_str().strip_prefix(prefix)?.parse::<usize>().ok())
    .max()
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_dynamic_port_count() {
    let node = NodeId::from("n");
    let connections = vec![
      Connection::new("a", "out", "n", "input1"),
      Connection::new("b", "out", "n", "input3"),
      Connection::new("c", "out", "n", "inputDefault"),
      Connection::new("n", "output1", "d", "input7"),
    ];

    assert_eq!(dynamic_port_count(&connections, &node, "input"), 3);
    assert_eq!(dynamic_port_count(&[], &node, "input"), 0);
  }
}
