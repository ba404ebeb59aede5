//! Graph boundary nodes.

use async_trait::async_trait;
use nodeflow_graph::{Connection, Node, NodeId, Project};
use nodeflow_node::{
  ExecutionContext, Inputs, NodeError, NodeImpl, NodeRole, Outputs, PortDef, parse_config,
};
use nodeflow_value::coerce::{coerce, coerce_optional};
use nodeflow_value::{DataType, DataValue};
use serde::Deserialize;

use crate::ports::outputs;

fn any_type() -> DataType {
  DataType::ANY
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphInputConfig {
  #[serde(default)]
  pub id: String,
  #[serde(default = "any_type")]
  pub data_type: DataType,
  #[serde(default)]
  pub default_value: Option<serde_json::Value>,
  #[serde(default)]
  pub use_default_value_input: bool,
}

impl Default for GraphInputConfig {
  fn default() -> Self {
    Self {
      id: String::new(),
      data_type: DataType::ANY,
      default_value: None,
      use_default_value_input: false,
    }
  }
}

/// Reads one of the process's graph inputs.
#[derive(Debug)]
pub struct GraphInputNode {
  config: GraphInputConfig,
}

impl GraphInputNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    Ok(Self {
      config: parse_config(node)?,
    })
  }

  fn resolve(&self, inputs: &Inputs, ctx: &ExecutionContext) -> Result<DataValue, NodeError> {
    let ty = self.config.data_type;
    if let Some(value) = coerce_optional(ctx.graph_input(&self.config.id).as_ref(), ty)? {
      return Ok(value);
    }
    if self.config.use_default_value_input {
      if let Some(value) = coerce_optional(inputs.get("default"), ty)? {
        return Ok(value);
      }
    }
    if let Some(json) = &self.config.default_value {
      return Ok(coerce(&DataValue::infer(json.clone()), ty)?);
    }
    Ok(ty.default_value())
  }
}

#[async_trait]
impl NodeImpl for GraphInputNode {
  fn input_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    if self.config.use_default_value_input {
      vec![PortDef::new("default", self.config.data_type)]
    } else {
      Vec::new()
    }
  }

  fn output_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![PortDef::new("data", self.config.data_type).with_title(self.config.id.clone())]
  }

  async fn execute(&self, inputs: Inputs, ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    let value = self.resolve(&inputs, ctx)?;
    Ok(outputs([("data", value)]))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphOutputConfig {
  #[serde(default)]
  pub id: String,
  #[serde(default = "any_type")]
  pub data_type: DataType,
}

impl Default for GraphOutputConfig {
  fn default() -> Self {
    Self {
      id: String::new(),
      data_type: DataType::ANY,
    }
  }
}

/// Publishes its input as one of the graph's final outputs.
///
/// Runs even when its input is excluded so that the final output map can
/// carry the sentinel for branches that did not fire.
#[derive(Debug)]
pub struct GraphOutputNode {
  id: NodeId,
  config: GraphOutputConfig,
}

impl GraphOutputNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    Ok(Self {
      id: node.id.clone(),
      config: parse_config(node)?,
    })
  }
}

#[async_trait]
impl NodeImpl for GraphOutputNode {
  fn input_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![PortDef::new("value", self.config.data_type)]
  }

  fn output_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![PortDef::new("valueOutput", self.config.data_type)]
  }

  async fn execute(&self, inputs: Inputs, _ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    let value = match inputs.get("value") {
      Some(value) if value.is_excluded() => DataValue::excluded(),
      Some(value) => coerce(value, self.config.data_type).map_err(|source| NodeError::InvalidInput {
        port_id: "value".into(),
        source,
      })?,
      None => DataValue::Any(serde_json::Value::Null),
    };
    tracing::debug!(node_id = %self.id, output_id = %self.config.id, "graph_output_resolved");
    Ok(outputs([("valueOutput", value)]))
  }

  fn role(&self) -> NodeRole {
    NodeRole::GraphOutput {
      output_id: self.config.id.clone(),
    }
  }

  fn accepts_excluded_inputs(&self) -> bool {
    true
  }
}
