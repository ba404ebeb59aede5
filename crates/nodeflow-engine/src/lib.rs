//! Nodeflow Engine
//!
//! Runs a graph of a [`nodeflow_graph::Project`] as a dataflow process.
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//! ├── run(inputs, context) -> GraphOutputs
//! ├── control()            -> ControlHandle (pause, resume, abort, user input, events)
//! └── statuses() / usage()
//!
//! Process (one per graph run, subgraphs nest)
//! ├── Plan      - ports, wiring checks, loop regions
//! ├── loop      - propagate readiness, dispatch, apply results
//! └── tasks     - one per running node (split-run fans out inside)
//!
//! ExecutionNotifier <- every event of every process in the tree
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use nodeflow_engine::{ChannelNotifier, Scheduler};
//!
//! let (notifier, mut events) = ChannelNotifier::channel();
//! let scheduler = Scheduler::new(project, "main", builtin_registry())
//!   .with_notifier(Arc::new(notifier));
//! let outputs = scheduler.run(inputs, GraphInputs::new()).await?;
//! ```

mod config;
mod control;
mod error;
mod events;
mod plan;
mod process;
mod replay;
mod scheduler;
mod services;
mod state;
mod task;

pub use config::{ConfigError, DEFAULT_MAX_SUBGRAPH_DEPTH, SchedulerConfig};
pub use control::ControlHandle;
pub use error::ExecutionError;
pub use events::{ChannelNotifier, CompositeNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use replay::{ReplaySource, ReplayedExecution, ReplayedOutcome};
pub use scheduler::Scheduler;
pub use state::NodeStatus;
