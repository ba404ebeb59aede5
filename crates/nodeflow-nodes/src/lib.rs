//! Nodeflow Nodes
//!
//! The built-in node kinds. Each kind deserializes its `data` into a typed
//! config when the node is instantiated and computes its ports from that
//! config plus the connections touching the node.
//!
//! ```text
//! io        graphInput, graphOutput
//! logic     compare, evaluate
//! branch    if, ifElse, match, coalesce, raceInputs
//! loops     loopController
//! flow      passthrough, delay, abortGraph, text
//! process   subGraph, userInput, externalCall
//! globals   getGlobal, setGlobal, raiseEvent, waitForEvent
//! ```
//!
//! [`builtin_registry`] maps every `type` string above to its factory.

mod branch;
mod flow;
mod globals;
mod io;
mod logic;
mod loops;
mod ports;
mod process;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use nodeflow_graph::Node;
use nodeflow_node::{NodeError, NodeImpl, NodeRegistry};

pub use branch::{CoalesceNode, IfElseNode, IfNode, MatchNode, RaceInputsNode};
pub use flow::{AbortGraphNode, DelayNode, PassthroughNode, TextNode};
pub use globals::{GetGlobalNode, RaiseEventNode, SetGlobalNode, WaitForEventNode};
pub use io::{GraphInputConfig, GraphInputNode, GraphOutputConfig, GraphOutputNode};
pub use logic::{CompareNode, ComparisonFunction, EvaluateNode, Operation};
pub use loops::{AtMaxIterations, LoopControllerNode};
pub use process::{ExternalCallNode, SubGraphNode, UserInputNode};

fn factory<N, F>(build: F) -> impl Fn(&Node) -> Result<Arc<dyn NodeImpl>, NodeError> + Send + Sync + 'static
where
  N: NodeImpl + 'static,
  F: Fn(&Node) -> Result<N, NodeError> + Send + Sync + 'static,
{
  move |node| Ok(Arc::new(build(node)?) as Arc<dyn NodeImpl>)
}

/// A registry with every built-in node kind.
pub fn builtin_registry() -> NodeRegistry {
  NodeRegistry::new()
    .with("graphInput", factory(GraphInputNode::from_node))
    .with("graphOutput", factory(GraphOutputNode::from_node))
    .with("compare", factory(CompareNode::from_node))
    .with("evaluate", factory(EvaluateNode::from_node))
    .with("if", factory(IfNode::from_node))
    .with("ifElse", factory(IfElseNode::from_node))
    .with("match", factory(MatchNode::from_node))
    .with("coalesce", factory(CoalesceNode::from_node))
    .with("raceInputs", factory(RaceInputsNode::from_node))
    .with("loopController", factory(LoopControllerNode::from_node))
    .with("passthrough", factory(PassthroughNode::from_node))
    .with("delay", factory(DelayNode::from_node))
    .with("abortGraph", factory(AbortGraphNode::from_node))
    .with("text", factory(TextNode::from_node))
    .with("subGraph", factory(SubGraphNode::from_node))
    .with("userInput", factory(UserInputNode::from_node))
    .with("externalCall", factory(ExternalCallNode::from_node))
    .with("getGlobal", factory(GetGlobalNode::from_node))
    .with("setGlobal", factory(SetGlobalNode::from_node))
    .with("raiseEvent", factory(RaiseEventNode::from_node))
    .with("waitForEvent", factory(WaitForEventNode::from_node))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_registry_knows_every_kind() {
    let registry = builtin_registry();
    for kind in [
      "graphInput",
      "graphOutput",
      "compare",
      "evaluate",
      "if",
      "ifElse",
      "match",
      "coalesce",
      "raceInputs",
      "loopController",
      "passthrough",
      "delay",
      "abortGraph",
      "text",
      "subGraph",
      "userInput",
      "externalCall",
      "getGlobal",
      "setGlobal",
      "raiseEvent",
      "waitForEvent",
    ] {
      assert!(registry.contains(kind), "missing {kind}");
    }
  }

  #[test]
  fn test_bad_config_is_reported() {
    let registry = builtin_registry();
    let node = Node::new("m", "match", json!({"cases": ["("]}));
    assert!(matches!(registry.create(&node), Err(NodeError::Config { .. })));
  }
}
