use std::collections::HashMap;
use std::time::Duration;

use nodeflow_engine::{ReplaySource, ReplayedExecution, ReplayedOutcome};
use nodeflow_graph::NodeId;
use tracing::warn;

use crate::{RecordedEntry, RecordedOutcome, Recording};

/// How long each replayed node takes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Playback {
  /// Complete immediately.
  #[default]
  Instant,
  /// Every node takes the same time.
  Uniform(Duration),
  /// Each node takes as long as it did when recorded.
  Recorded,
}

/// Serves a [`Recording`] back to a scheduler.
#[derive(Debug)]
pub struct Replayer {
  entries: HashMap<(NodeId, u32), RecordedEntry>,
  playback: Playback,
  /// Overrides `playback` for specific node types.
  type_delays: HashMap<String, Duration>,
}

impl Replayer {
  pub fn new(recording: Recording) -> Self {
    let entries = recording
      .entries
      .into_iter()
      .map(|entry| ((entry.node_id.clone(), entry.iteration), entry))
      .collect();
    Self {
      entries,
      playback: Playback::Instant,
      type_delays: HashMap::new(),
    }
  }

  pub fn with_playback(mut self, playback: Playback) -> Self {
    self.playback = playback;
    self
  }

  pub fn with_type_delay(mut self, node_type: impl Into<String>, delay: Duration) -> Self {
    self.type_delays.insert(node_type.into(), delay);
    self
  }

  fn delay(&self, node_type: &str, entry: &RecordedEntry) -> Option<Duration> {
    if let Some(delay) = self.type_delays.get(node_type) {
      return Some(*delay);
    }
    match self.playback {
      Playback::Instant => None,
      Playback::Uniform(delay) => Some(delay),
      Playback::Recorded => Some(Duration::from_millis(entry.elapsed_ms)),
    }
  }
}

impl ReplaySource for Replayer {
  fn replay(&self, node_id: &NodeId, node_type: &str, iteration: u32) -> Option<ReplayedExecution> {
    let Some(entry) = self.entries.get(&(node_id.clone(), iteration)) else {
      warn!(node_id = %node_id, iteration, "replay_entry_missing");
      return None;
    };
    let outcome = match &entry.outcome {
      RecordedOutcome::Completed { outputs } => ReplayedOutcome::Completed(outputs.clone()),
      RecordedOutcome::Errored { error } => ReplayedOutcome::Failed(error.clone()),
      RecordedOutcome::Aborted => ReplayedOutcome::Aborted,
    };
    // An aborted node waits for cancellation anyway
    let delay = match outcome {
      ReplayedOutcome::Aborted => None,
      _ => self.delay(node_type, entry),
    };
    Some(ReplayedExecution { outcome, delay })
  }
}
