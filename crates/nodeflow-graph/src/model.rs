use std::collections::BTreeMap;

use nodeflow_value::DataValue;
use serde::{Deserialize, Serialize};

use crate::{GraphId, NodeId, PortId};

/// What happens to a node's outputs when its execution fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnError {
  /// The node errors; its outputs become excluded downstream.
  #[default]
  Fail,
  /// The node completes with each output port's default value.
  UseDefaults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
  pub id: NodeId,
  #[serde(rename = "type")]
  pub node_type: String,
  #[serde(default)]
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  /// Kind-specific configuration.
  #[serde(default)]
  pub data: serde_json::Value,
  /// Layout only. Never read by the engine.
  #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
  pub visual_data: serde_json::Value,
  #[serde(default)]
  pub is_split_run: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub split_run_max: Option<usize>,
  #[serde(default)]
  pub is_split_sequential: bool,
  #[serde(default)]
  pub split_isolate_errors: bool,
  #[serde(default)]
  pub on_error: OnError,
}

impl Node {
  pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>, data: serde_json::Value) -> Self {
    let id = id.into();
    Self {
      title: id.to_string(),
      id,
      node_type: node_type.into(),
      description: None,
      data,
      visual_data: serde_json::Value::Null,
      is_split_run: false,
      split_run_max: None,
      is_split_sequential: false,
      split_isolate_errors: false,
      on_error: OnError::Fail,
    }
  }

  /// Marks the node as a split-run consumer.
  pub fn split(mut self) -> Self {
    self.is_split_run = true;
    self
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
  pub output_node_id: NodeId,
  pub output_port_id: PortId,
  pub input_node_id: NodeId,
  pub input_port_id: PortId,
}

impl Connection {
  pub fn new(
    output_node_id: impl Into<NodeId>,
    output_port_id: impl Into<PortId>,
    input_node_id: impl Into<NodeId>,
    input_port_id: impl Into<PortId>,
  ) -> Self {
    Self {
      output_node_id: output_node_id.into(),
      output_port_id: output_port_id.into(),
      input_node_id: input_node_id.into(),
      input_port_id: input_port_id.into(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
  pub id: GraphId,
  #[serde(default)]
  pub name: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub description: String,
  #[serde(default)]
  pub nodes: Vec<Node>,
  #[serde(default)]
  pub connections: Vec<Connection>,
}

impl Graph {
  pub fn new(id: impl Into<GraphId>) -> Self {
    let id = id.into();
    Self {
      name: id.to_string(),
      id,
      description: String::new(),
      nodes: Vec::new(),
      connections: Vec::new(),
    }
  }

  pub fn with_node(mut self, node: Node) -> Self {
    self.nodes.push(node);
    self
  }

  /// Adds a connection `from.port -> to.port`.
  pub fn connect(
    mut self,
    from: impl Into<NodeId>,
    from_port: impl Into<PortId>,
    to: impl Into<NodeId>,
    to_port: impl Into<PortId>,
  ) -> Self {
    self
      .connections
      .push(Connection::new(from, from_port, to, to_port));
    self
  }

  pub fn node(&self, id: &str) -> Option<&Node> {
    self.nodes.iter().find(|n| n.id == *id)
  }

  /// All nodes of a given kind.
  pub fn nodes_of_type<'a>(&'a self, node_type: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
    self.nodes.iter().filter(move |n| n.node_type == node_type)
  }

  /// Connections with the node on either end.
  pub fn connections_touching(&self, id: &str) -> Vec<Connection> {
    self
      .connections
      .iter()
      .filter(|c| c.input_node_id == *id || c.output_node_id == *id)
      .cloned()
      .collect()
  }
}

/// A named collection of graphs plus shared attachments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
  #[serde(default)]
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub main_graph_id: Option<GraphId>,
  #[serde(default)]
  pub graphs: BTreeMap<GraphId, Graph>,
  /// Shared data blobs referenced by id from node configs.
  #[serde(default)]
  pub attachments: BTreeMap<String, DataValue>,
}

impl Project {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Default::default()
    }
  }

  pub fn with_graph(mut self, graph: Graph) -> Self {
    if self.main_graph_id.is_none() {
      self.main_graph_id = Some(graph.id.clone());
    }
    self.graphs.insert(graph.id.clone(), graph);
    self
  }

  pub fn graph(&self, id: &str) -> Option<&Graph> {
    self.graphs.get(id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_node_deserializes_with_defaults() {
    let node: Node = serde_json::from_value(json!({
      "id": "n1",
      "type": "text",
      "data": {"text": "hi"},
      "visualData": {"x": 10, "y": 20}
    }))
    .unwrap();

    assert_eq!(node.id, "n1");
    assert_eq!(node.node_type, "text");
    assert!(!node.is_split_run);
    assert_eq!(node.on_error, OnError::Fail);
  }

  #[test]
  fn test_connection_uses_camel_case() {
    let conn = Connection::new("a", "output", "b", "input");
    assert_eq!(
      serde_json::to_value(&conn).unwrap(),
      json!({
        "outputNodeId": "a",
        "outputPortId": "output",
        "inputNodeId": "b",
        "inputPortId": "input"
      })
    );
  }

  #[test]
  fn test_project_first_graph_is_main() {
    let project = Project::new("demo")
      .with_graph(Graph::new("main"))
      .with_graph(Graph::new("helper"));
    assert_eq!(project.main_graph_id, Some(GraphId::from("main")));
    assert!(project.graph("helper").is_some());
  }
}
