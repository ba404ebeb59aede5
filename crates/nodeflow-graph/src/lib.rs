//! Nodeflow Graph
//!
//! The serializable project model (projects, graphs, nodes, connections) and
//! the [`GraphIndex`] used by the scheduler for traversal: adjacency in both
//! directions, per-port connection lookup, and strongly connected components
//! for loop detection.
//!
//! Projects are plain data. Loading them from disk or a database is the
//! caller's business; the engine only reads them.

mod error;
mod ids;
mod index;
mod model;

pub use error::GraphError;
pub use ids::{GraphId, NodeId, PortId};
pub use index::GraphIndex;
pub use model::{Connection, Graph, Node, OnError, Project};
