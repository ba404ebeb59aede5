use std::collections::HashMap;
use std::sync::Arc;

use nodeflow_graph::Node;
use serde::de::DeserializeOwned;

use crate::{NodeError, NodeImpl};

/// Builds a node implementation from its graph definition.
pub type NodeFactory = Arc<dyn Fn(&Node) -> Result<Arc<dyn NodeImpl>, NodeError> + Send + Sync>;

/// Maps node `type` strings to factories.
#[derive(Clone, Default)]
pub struct NodeRegistry {
  factories: HashMap<String, NodeFactory>,
}

impl NodeRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register<F>(&mut self, node_type: impl Into<String>, factory: F)
  where
    F: Fn(&Node) -> Result<Arc<dyn NodeImpl>, NodeError> + Send + Sync + 'static,
  {
    self.factories.insert(node_type.into(), Arc::new(factory));
  }

  /// Builder form of [`NodeRegistry::register`].
  pub fn with<F>(mut self, node_type: impl Into<String>, factory: F) -> Self
  where
    F: Fn(&Node) -> Result<Arc<dyn NodeImpl>, NodeError> + Send + Sync + 'static,
  {
    self.register(node_type, factory);
    self
  }

  pub fn contains(&self, node_type: &str) -> bool {
    self.factories.contains_key(node_type)
  }

  pub fn node_types(&self) -> impl Iterator<Item = &str> {
    self.factories.keys().map(String::as_str)
  }

  /// Instantiate the implementation for a node.
  pub fn create(&self, node: &Node) -> Result<Arc<dyn NodeImpl>, NodeError> {
    let factory = self
      .factories
      .get(&node.node_type)
      .ok_or_else(|| NodeError::UnknownNodeType {
        node_type: node.node_type.clone(),
      })?;
    factory(node)
  }
}

impl std::fmt::Debug for NodeRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let mut types: Vec<_> = self.node_types().collect();
    types.sort_unstable();
    f.debug_struct("NodeRegistry").field("types", &types).finish()
  }
}

/// Deserialize a node's `data` into its typed config. Missing data yields
/// the config's default.
pub fn parse_config<T: DeserializeOwned + Default>(node: &Node) -> Result<T, NodeError> {
  if node.data.is_null() {
    return Ok(T::default());
  }
  serde_json::from_value(node.data.clone()).map_err(|e| NodeError::Config {
    message: format!("node '{}' ({}): {}", node.id, node.node_type, e),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;
  use serde_json::json;

  #[derive(Debug, Default, Deserialize)]
  #[serde(rename_all = "camelCase")]
  struct DemoConfig {
    #[serde(default)]
    max_items: usize,
  }

  #[test]
  fn test_parse_config_defaults_on_null() {
    let node = Node::new("n", "demo", serde_json::Value::Null);
    let config: DemoConfig = parse_config(&node).unwrap();
    assert_eq!(config.max_items, 0);
  }

  #[test]
  fn test_parse_config_reports_node() {
    let node = Node::new("n", "demo", json!({"maxItems": "lots"}));
    let err = parse_config::<DemoConfig>(&node).unwrap_err();
    assert!(err.to_string().contains("node 'n'"));
  }

  #[test]
  fn test_unknown_type() {
    let registry = NodeRegistry::new();
    let node = Node::new("n", "mystery", serde_json::Value::Null);
    assert!(matches!(
      registry.create(&node),
      Err(NodeError::UnknownNodeType { .. })
    ));
  }
}
