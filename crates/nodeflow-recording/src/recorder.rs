use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use nodeflow_engine::{ExecutionEvent, ExecutionNotifier};
use nodeflow_graph::{GraphId, NodeId};
use nodeflow_node::ProcessId;
use tracing::debug;

use crate::{RecordedEntry, RecordedOutcome, Recording};

#[derive(Debug)]
struct State {
  root: Option<ProcessId>,
  recording: Recording,
  started: HashMap<(NodeId, u32), Instant>,
  /// Failed executions whose `useDefaults` completion is not an entry of its own.
  failed: HashSet<(NodeId, u32)>,
}

impl State {
  fn record(&mut self, node_id: NodeId, iteration: u32, outcome: RecordedOutcome) {
    let elapsed_ms = self
      .started
      .remove(&(node_id.clone(), iteration))
      .map_or(0, |at| u64::try_from(at.elapsed().as_millis()).unwrap_or(u64::MAX));
    debug!(node_id = %node_id, iteration, elapsed_ms, "node_recorded");
    self.recording.entries.push(RecordedEntry {
      node_id,
      iteration,
      outcome,
      elapsed_ms,
    });
  }
}

/// Captures how each node of the root process ended as a [`Recording`].
///
/// Register it as (or inside a composite) notifier before the run starts.
/// Subgraph processes are not recorded; replay satisfies the `subGraph`
/// node itself.
#[derive(Debug)]
pub struct Recorder {
  state: Mutex<State>,
}

impl Recorder {
  pub fn new(graph_id: impl Into<GraphId>) -> Self {
    Self {
      state: Mutex::new(State {
        root: None,
        recording: Recording::new(graph_id.into()),
        started: HashMap::new(),
        failed: HashSet::new(),
      }),
    }
  }

  fn state(&self) -> MutexGuard<'_, State> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// The recording so far.
  pub fn finish(&self) -> Recording {
    self.state().recording.clone()
  }
}

impl ExecutionNotifier for Recorder {
  fn notify(&self, event: ExecutionEvent) {
    let mut state = self.state();
    match event {
      ExecutionEvent::Start { graph_id, process_id } => {
        state.root = Some(process_id);
        state.recording.graph_id = graph_id;
        state.recording.recorded_at = Utc::now();
      }
      ExecutionEvent::NodeStart {
        node_id,
        process_id,
        iteration,
        ..
      } if state.root == Some(process_id) => {
        state.started.insert((node_id, iteration), Instant::now());
      }
      ExecutionEvent::NodeFinish {
        node_id,
        process_id,
        iteration,
        outputs,
      } if state.root == Some(process_id) => {
        if !state.failed.remove(&(node_id.clone(), iteration)) {
          state.record(node_id, iteration, RecordedOutcome::Completed { outputs });
        }
      }
      ExecutionEvent::NodeError {
        node_id,
        process_id,
        iteration,
        error,
      } if state.root == Some(process_id) => {
        state.failed.insert((node_id.clone(), iteration));
        state.record(node_id, iteration, RecordedOutcome::Errored { error });
      }
      ExecutionEvent::NodeAborted {
        node_id,
        process_id,
        iteration,
      } if state.root == Some(process_id) => {
        state.record(node_id, iteration, RecordedOutcome::Aborted);
      }
      _ => {}
    }
  }
}
