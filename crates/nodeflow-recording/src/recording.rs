//! The recording artifact.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nodeflow_graph::{GraphId, NodeId};
use nodeflow_node::Outputs;
use serde::{Deserialize, Serialize};

/// Format version written by this crate.
pub const RECORDING_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
  #[error("unsupported recording version {found} (expected {RECORDING_VERSION})")]
  UnsupportedVersion { found: u32 },

  #[error("malformed recording: {source}")]
  Malformed {
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to access recording at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// How a recorded node execution ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordedOutcome {
  Completed { outputs: Outputs },
  /// The node failed. Its `onError` policy applies again on replay.
  Errored { error: String },
  /// The node was cancelled before it finished, e.g. a race loser.
  Aborted,
}

/// One node execution of the root process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEntry {
  pub node_id: NodeId,
  pub iteration: u32,
  pub outcome: RecordedOutcome,
  /// Wall time between the node starting and ending.
  pub elapsed_ms: u64,
}

impl RecordedEntry {
  /// Outputs of a completed execution.
  pub fn outputs(&self) -> Option<&Outputs> {
    match &self.outcome {
      RecordedOutcome::Completed { outputs } => Some(outputs),
      _ => None,
    }
  }
}

/// Every node execution of one root process, in the order they ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
  pub version: u32,
  pub recorded_at: DateTime<Utc>,
  pub graph_id: GraphId,
  pub entries: Vec<RecordedEntry>,
}

impl Recording {
  pub fn new(graph_id: GraphId) -> Self {
    Self {
      version: RECORDING_VERSION,
      recorded_at: Utc::now(),
      graph_id,
      entries: Vec::new(),
    }
  }

  pub fn to_json(&self) -> Result<String, RecordingError> {
    serde_json::to_string_pretty(self).map_err(|source| RecordingError::Malformed { source })
  }

  pub fn from_json(json: &str) -> Result<Self, RecordingError> {
    // Check the version before the shape so old files get a useful error.
    let raw: serde_json::Value =
      serde_json::from_str(json).map_err(|source| RecordingError::Malformed { source })?;
    let found = raw
      .get("version")
      .and_then(serde_json::Value::as_u64)
      .unwrap_or(0);
    if found != u64::from(RECORDING_VERSION) {
      return Err(RecordingError::UnsupportedVersion {
        found: u32::try_from(found).unwrap_or(u32::MAX),
      });
    }
    serde_json::from_value(raw).map_err(|source| RecordingError::Malformed { source })
  }

  pub fn save(&self, path: impl AsRef<Path>) -> Result<(), RecordingError> {
    let path = path.as_ref();
    std::fs::write(path, self.to_json()?).map_err(|source| RecordingError::Io {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, RecordingError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| RecordingError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&json)
  }

  /// The entry for a node's execution in a given loop iteration.
  pub fn entry(&self, node_id: &str, iteration: u32) -> Option<&RecordedEntry> {
    self
      .entries
      .iter()
      .find(|e| e.node_id == node_id && e.iteration == iteration)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use nodeflow_value::DataValue;

  #[test]
  fn test_rejects_other_versions() {
    let json = r#"{"version": 2, "recorded_at": "2026-01-01T00:00:00Z", "graph_id": "g", "entries": []}"#;
    assert!(matches!(
      Recording::from_json(json),
      Err(RecordingError::UnsupportedVersion { found: 2 })
    ));
  }

  #[test]
  fn test_rejects_garbage() {
    assert!(matches!(
      Recording::from_json("not json"),
      Err(RecordingError::Malformed { .. })
    ));
  }

  #[test]
  fn test_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.json");

    let mut recording = Recording::new(GraphId::from("main"));
    recording.entries.push(RecordedEntry {
      node_id: NodeId::from("n"),
      iteration: 2,
      outcome: RecordedOutcome::Completed {
        outputs: [("output".into(), DataValue::Number(f64::INFINITY))]
          .into_iter()
          .collect(),
      },
      elapsed_ms: 15,
    });
    recording.entries.push(RecordedEntry {
      node_id: NodeId::from("bad"),
      iteration: 0,
      outcome: RecordedOutcome::Errored {
        error: "boom".to_string(),
      },
      elapsed_ms: 3,
    });
    recording.entries.push(RecordedEntry {
      node_id: NodeId::from("slow"),
      iteration: 0,
      outcome: RecordedOutcome::Aborted,
      elapsed_ms: 40,
    });
    recording.save(&path).unwrap();

    let loaded = Recording::load(&path).unwrap();
    assert_eq!(loaded, recording);
    assert_eq!(loaded.entry("n", 2).map(|e| e.elapsed_ms), Some(15));
    assert!(loaded.entry("n", 0).is_none());
    assert_eq!(
      loaded.entry("n", 2).and_then(RecordedEntry::outputs).map(|o| &o["output"]),
      Some(&DataValue::Number(f64::INFINITY))
    );
    assert_eq!(loaded.entry("slow", 0).map(|e| &e.outcome), Some(&RecordedOutcome::Aborted));
  }

  #[test]
  fn test_outcome_is_tagged_by_status() {
    let entry = RecordedEntry {
      node_id: NodeId::from("bad"),
      iteration: 0,
      outcome: RecordedOutcome::Errored {
        error: "boom".to_string(),
      },
      elapsed_ms: 0,
    };
    let json = serde_json::to_value(&entry).unwrap();
    assert_eq!(json["outcome"], serde_json::json!({"status": "errored", "error": "boom"}));
  }

  #[test]
  fn test_missing_file() {
    let err = Recording::load("/definitely/not/here.json").unwrap_err();
    assert!(matches!(err, RecordingError::Io { .. }));
  }
}
