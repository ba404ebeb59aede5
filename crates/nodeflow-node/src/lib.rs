//! Nodeflow Node
//!
//! The contract every node kind satisfies, independent of the scheduler that
//! drives it.
//!
//! ```text
//! NodeImpl
//! ├── input_ports(connections, project)  -> [PortDef]
//! ├── output_ports(connections, project) -> [PortDef]
//! └── execute(inputs, &ExecutionContext) -> Outputs
//!
//! ExecutionContext
//! ├── settings, cancellation, execution key (node, process, iteration, branch)
//! └── ProcessServices: partial outputs, subgraphs, user input, globals, events
//! ```
//!
//! Port lists are a pure function of the node's config and the connections
//! touching it, so the scheduler may recompute them at any time.

mod context;
mod error;
mod ids;
mod node;
mod port;
mod registry;
mod settings;
mod standalone;

pub use context::{
  EchoFunction, ExecutionContext, ExternalFunction, ExternalResult, ProcessServices,
  SubgraphOutcome, Usage,
};
pub use error::NodeError;
pub use ids::{ExecutionKey, ProcessId};
pub use node::{
  GraphInputs, GraphOutputs, Inputs, LOOP_BREAK_PORT, NodeImpl, NodeRole, Outputs, dynamic_port_count,
};
pub use port::PortDef;
pub use registry::{NodeFactory, NodeRegistry, parse_config};
pub use settings::Settings;
pub use standalone::StandaloneServices;
