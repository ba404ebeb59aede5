//! Per-process node state.

use std::collections::BTreeMap;

use nodeflow_graph::NodeId;
use nodeflow_node::Outputs;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Lifecycle of a node within one process.
///
/// ```text
/// pending ─► ready ─► running ─┬─► completed
///    │                 │  ▲    ├─► errored
///    │                 ▼  │    └─► aborted
///    │               waiting
///    └─► excluded
/// ```
///
/// Loop body nodes go back to `pending` for every pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
  Pending,
  Ready,
  Running,
  /// Running, but parked on user input.
  Waiting,
  Completed,
  Excluded,
  Errored,
  Aborted,
}

impl NodeStatus {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      NodeStatus::Completed | NodeStatus::Excluded | NodeStatus::Errored | NodeStatus::Aborted
    )
  }

  pub fn is_active(self) -> bool {
    matches!(self, NodeStatus::Running | NodeStatus::Waiting)
  }
}

/// Scheduler bookkeeping for one node.
#[derive(Debug)]
pub(crate) struct NodeRecord {
  pub status: NodeStatus,
  /// Outputs visible to consumers in the current pass. `None` until the
  /// node resolves. Excluded, errored and aborted nodes expose all-excluded
  /// outputs.
  pub outputs: Option<Outputs>,
  /// Cancels the running execution.
  pub token: Option<CancellationToken>,
}

impl NodeRecord {
  pub fn new() -> Self {
    Self {
      status: NodeStatus::Pending,
      outputs: None,
      token: None,
    }
  }
}

/// Runtime state of one loop region.
#[derive(Debug, Default)]
pub(crate) struct LoopState {
  /// Current pass, starting at 0.
  pub iteration: u32,
  /// The controller broke (or never looped). Nodes after the loop may read
  /// its values.
  pub finished: bool,
  /// Body outputs of every completed pass.
  pub history: Vec<BTreeMap<NodeId, Outputs>>,
}
