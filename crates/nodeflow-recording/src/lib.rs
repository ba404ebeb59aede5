//! Nodeflow Recording
//!
//! Captures how each node of a run ended and plays the run back without
//! executing the nodes.
//!
//! ```text
//! Scheduler ── events ──► Recorder ──finish()──► Recording ──► JSON file
//!                                                    │
//! Scheduler ◄── ReplaySource ── Replayer ◄───────────┘
//! ```
//!
//! Entries are keyed by node id and loop iteration, so a replay of the same
//! graph reproduces the original outputs exactly, loops included. Failures and
//! cancelled race losers are recorded too, so error recovery and races take
//! the same path on replay.

mod recorder;
mod recording;
mod replayer;

pub use recorder::Recorder;
pub use recording::{RECORDING_VERSION, RecordedEntry, RecordedOutcome, Recording, RecordingError};
pub use replayer::{Playback, Replayer};
