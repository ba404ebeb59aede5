use std::time::Duration;

use nodeflow_graph::NodeId;
use nodeflow_node::Outputs;

/// How a replayed execution ends.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayedOutcome {
  Completed(Outputs),
  /// The node fails with this message.
  Failed(String),
  /// The node never finished; it waits until the scheduler aborts it.
  Aborted,
}

/// An execution to reproduce instead of running a node.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayedExecution {
  pub outcome: ReplayedOutcome,
  /// Wait this long before completing the node.
  pub delay: Option<Duration>,
}

impl ReplayedExecution {
  pub fn completed(outputs: Outputs) -> Self {
    Self {
      outcome: ReplayedOutcome::Completed(outputs),
      delay: None,
    }
  }
}

/// Supplies recorded node executions during a replay.
///
/// When a scheduler has a replay source, every node of the root process is
/// satisfied from it, keyed by node id and loop iteration. A missing entry
/// fails the run with [`crate::ExecutionError::ReplayMismatch`]. Nodes that
/// steer the process itself (`abortGraph`) still execute.
pub trait ReplaySource: Send + Sync {
  fn replay(&self, node_id: &NodeId, node_type: &str, iteration: u32) -> Option<ReplayedExecution>;
}
