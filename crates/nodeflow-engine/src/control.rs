//! The control surface of a running scheduler.

use nodeflow_graph::NodeId;
use nodeflow_node::{ExecutionKey, ProcessId};
use nodeflow_value::DataValue;
use tokio::sync::mpsc;

/// Which parked node an answer set is meant for.
#[derive(Debug, Clone)]
pub(crate) enum InputTarget {
  Key(ExecutionKey),
  /// Matches the single waiting execution of this node in this process.
  Node { node_id: NodeId, process_id: ProcessId },
}

#[derive(Debug)]
pub(crate) enum ControlMessage {
  Pause,
  Resume,
  Abort,
  UserInput {
    target: InputTarget,
    answers: Vec<String>,
  },
  RaiseEvent {
    name: String,
    value: DataValue,
  },
}

/// Steers a running [`crate::Scheduler`] from another task.
///
/// Messages are applied by the root process loop in the order sent. Every
/// method returns `false` once the run has ended, in which case the message
/// had no effect.
#[derive(Debug, Clone)]
pub struct ControlHandle {
  sender: mpsc::UnboundedSender<ControlMessage>,
}

impl ControlHandle {
  pub(crate) fn new(sender: mpsc::UnboundedSender<ControlMessage>) -> Self {
    Self { sender }
  }

  fn send(&self, message: ControlMessage) -> bool {
    self.sender.send(message).is_ok()
  }

  /// Cancel the whole process tree.
  pub fn abort(&self) -> bool {
    self.send(ControlMessage::Abort)
  }

  /// Stop dispatching newly ready nodes. Running nodes carry on.
  pub fn pause(&self) -> bool {
    self.send(ControlMessage::Pause)
  }

  pub fn resume(&self) -> bool {
    self.send(ControlMessage::Resume)
  }

  /// Answer the node waiting in `process_id`. When the same node waits in
  /// several loop iterations, use [`ControlHandle::supply_user_input_for`].
  pub fn supply_user_input(
    &self,
    node_id: impl Into<NodeId>,
    process_id: ProcessId,
    answers: Vec<String>,
  ) -> bool {
    self.send(ControlMessage::UserInput {
      target: InputTarget::Node {
        node_id: node_id.into(),
        process_id,
      },
      answers,
    })
  }

  /// Answer the execution identified by the key carried on
  /// [`crate::ExecutionEvent::NeedsUserInput`].
  pub fn supply_user_input_for(&self, key: ExecutionKey, answers: Vec<String>) -> bool {
    self.send(ControlMessage::UserInput {
      target: InputTarget::Key(key),
      answers,
    })
  }

  /// Deliver a user event to every `waitForEvent` node in the tree.
  pub fn raise_event(&self, name: impl Into<String>, value: DataValue) -> bool {
    self.send(ControlMessage::RaiseEvent {
      name: name.into(),
      value,
    })
  }
}
