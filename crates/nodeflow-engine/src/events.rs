//! Observation events and notifiers.
//!
//! Every process in a run reports to the same notifier, so a single consumer
//! sees the root process and all of its subgraph children in one ordered
//! stream. Events of one process are emitted from its scheduling loop and
//! arrive in the order that loop applied them.

use std::sync::Arc;

use nodeflow_graph::{GraphId, NodeId};
use nodeflow_node::{ExecutionKey, GraphOutputs, Inputs, Outputs, ProcessId, Usage};
use nodeflow_value::DataValue;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted while a graph runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
  /// The root process is about to start.
  Start {
    graph_id: GraphId,
    process_id: ProcessId,
  },

  /// A process (root or subgraph) started.
  GraphStart {
    graph_id: GraphId,
    process_id: ProcessId,
    parent: Option<ProcessId>,
  },

  /// A node was dispatched with these inputs.
  NodeStart {
    node_id: NodeId,
    process_id: ProcessId,
    iteration: u32,
    inputs: Inputs,
  },

  /// A node was skipped because a required input was excluded.
  NodeExcluded {
    node_id: NodeId,
    process_id: ProcessId,
    iteration: u32,
  },

  /// Outputs published before the node completed. Split-run branches carry
  /// their branch index.
  PartialOutput {
    node_id: NodeId,
    process_id: ProcessId,
    iteration: u32,
    branch: Option<usize>,
    outputs: Outputs,
  },

  NodeFinish {
    node_id: NodeId,
    process_id: ProcessId,
    iteration: u32,
    outputs: Outputs,
  },

  NodeError {
    node_id: NodeId,
    process_id: ProcessId,
    iteration: u32,
    error: String,
  },

  /// A node was cancelled by an abort or a lost race.
  NodeAborted {
    node_id: NodeId,
    process_id: ProcessId,
    iteration: u32,
  },

  /// A node is parked until answers are supplied for `key`.
  NeedsUserInput {
    key: ExecutionKey,
    questions: Vec<String>,
  },

  GlobalSet {
    id: String,
    value: DataValue,
  },

  UserEvent {
    name: String,
    value: DataValue,
  },

  GraphFinish {
    graph_id: GraphId,
    process_id: ProcessId,
    outputs: GraphOutputs,
    usage: Usage,
  },

  GraphError {
    graph_id: GraphId,
    process_id: ProcessId,
    error: String,
  },

  Pause,

  Resume,

  /// The run was aborted, either by the caller or by an `abortGraph` node.
  Abort {
    successful: bool,
  },

  /// The root process completed.
  Done {
    outputs: GraphOutputs,
    usage: Usage,
  },

  /// The root process failed.
  Error {
    error: String,
  },
}

/// Receives execution events.
///
/// The scheduler calls `notify` for each event; implementations decide what
/// to do with them (record, stream, log, ignore).
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

impl<T: ExecutionNotifier + ?Sized> ExecutionNotifier for Arc<T> {
  fn notify(&self, event: ExecutionEvent) {
    (**self).notify(event);
  }
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// Sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls the scheduling loop.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  /// A notifier together with the receiving end of its channel.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self { sender }, receiver)
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// Fans every event out to several notifiers, in order.
#[derive(Clone, Default)]
pub struct CompositeNotifier {
  notifiers: Vec<Arc<dyn ExecutionNotifier>>,
}

impl CompositeNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    self.notifiers.push(notifier);
    self
  }
}

impl ExecutionNotifier for CompositeNotifier {
  fn notify(&self, event: ExecutionEvent) {
    if let Some((last, rest)) = self.notifiers.split_last() {
      for notifier in rest {
        notifier.notify(event.clone());
      }
      last.notify(event);
    }
  }
}

impl std::fmt::Debug for CompositeNotifier {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CompositeNotifier")
      .field("notifiers", &self.notifiers.len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_event_wire_format() {
    let event = ExecutionEvent::NodeExcluded {
      node_id: "n".into(),
      process_id: ProcessId::new(),
      iteration: 0,
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "node_excluded");
    assert_eq!(json["node_id"], "n");

    let back: ExecutionEvent = serde_json::from_value(json).unwrap();
    assert_eq!(back, event);
  }

  #[test]
  fn test_composite_fans_out() {
    let (first, mut first_rx) = ChannelNotifier::channel();
    let (second, mut second_rx) = ChannelNotifier::channel();
    let composite = CompositeNotifier::new()
      .with(Arc::new(first))
      .with(Arc::new(second));

    composite.notify(ExecutionEvent::Pause);

    assert_eq!(first_rx.try_recv().unwrap(), ExecutionEvent::Pause);
    assert_eq!(second_rx.try_recv().unwrap(), ExecutionEvent::Pause);
  }
}
