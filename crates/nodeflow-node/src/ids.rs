use std::fmt;

use nodeflow_graph::NodeId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one process: a single run of one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(Uuid);

impl ProcessId {
  pub fn new() -> Self {
    Self(Uuid::new_v4())
  }
}

impl Default for ProcessId {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for ProcessId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.fmt(f)
  }
}

/// Identifies one execution of a node: which process it belongs to, which
/// loop pass, and which split-run branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionKey {
  pub node_id: NodeId,
  pub process_id: ProcessId,
  pub iteration: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub branch: Option<usize>,
}

impl fmt::Display for ExecutionKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}@{}#{}", self.node_id, self.process_id, self.iteration)?;
    if let Some(branch) = self.branch {
      write!(f, "/{branch}")?;
    }
    Ok(())
  }
}
