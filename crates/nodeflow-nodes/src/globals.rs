//! Process-tree globals and user events.

use async_trait::async_trait;
use nodeflow_graph::{Connection, Node, Project};
use nodeflow_node::{ExecutionContext, Inputs, NodeError, NodeImpl, Outputs, PortDef, parse_config};
use nodeflow_value::{DataType, DataValue};
use serde::Deserialize;

use crate::ports::{outputs, present};

fn any_type() -> DataType {
  DataType::ANY
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetGlobalConfig {
  #[serde(default)]
  id: String,
  #[serde(default = "any_type")]
  data_type: DataType,
  /// Block until another node sets the global.
  #[serde(default)]
  wait: bool,
}

impl Default for GetGlobalConfig {
  fn default() -> Self {
    Self {
      id: String::new(),
      data_type: DataType::ANY,
      wait: false,
    }
  }
}

#[derive(Debug)]
pub struct GetGlobalNode {
  config: GetGlobalConfig,
}

impl GetGlobalNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    Ok(Self {
      config: parse_config(node)?,
    })
  }
}

#[async_trait]
impl NodeImpl for GetGlobalNode {
  fn input_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    Vec::new()
  }

  fn output_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![PortDef::new("value", self.config.data_type)]
  }

  async fn execute(&self, _inputs: Inputs, ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    let value = if self.config.wait {
      ctx.wait_for_global(&self.config.id).await?
    } else {
      ctx
        .global(&self.config.id)
        .unwrap_or_else(|| self.config.data_type.default_value())
    };
    Ok(outputs([("value", value)]))
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetGlobalConfig {
  #[serde(default)]
  id: String,
}

#[derive(Debug)]
pub struct SetGlobalNode {
  config: SetGlobalConfig,
}

impl SetGlobalNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    Ok(Self {
      config: parse_config(node)?,
    })
  }
}

#[async_trait]
impl NodeImpl for SetGlobalNode {
  fn input_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![PortDef::new("value", DataType::ANY).required()]
  }

  fn output_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![
      PortDef::new("savedValue", DataType::ANY),
      PortDef::new("previousValue", DataType::ANY),
    ]
  }

  async fn execute(&self, inputs: Inputs, ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    let value = present(&inputs, "value")
      .cloned()
      .ok_or_else(|| NodeError::MissingInput {
        port_id: "value".into(),
      })?;
    let previous = ctx
      .global(&self.config.id)
      .unwrap_or(DataValue::Any(serde_json::Value::Null));
    ctx.set_global(&self.config.id, value.clone());
    Ok(outputs([("savedValue", value), ("previousValue", previous)]))
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventConfig {
  #[serde(default)]
  event_name: String,
}

/// Broadcasts `data` to every `waitForEvent` listening on the same name.
#[derive(Debug)]
pub struct RaiseEventNode {
  config: EventConfig,
}

impl RaiseEventNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    Ok(Self {
      config: parse_config(node)?,
    })
  }
}

#[async_trait]
impl NodeImpl for RaiseEventNode {
  fn input_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![PortDef::new("data", DataType::ANY)]
  }

  fn output_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![PortDef::new("result", DataType::ANY)]
  }

  async fn execute(&self, inputs: Inputs, ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    let data = present(&inputs, "data")
      .cloned()
      .unwrap_or(DataValue::Any(serde_json::Value::Null));
    ctx.raise_event(&self.config.event_name, data.clone());
    Ok(outputs([("result", data)]))
  }
}

/// Suspends until the named event is raised, then forwards `inputData`
/// alongside the event payload.
#[derive(Debug)]
pub struct WaitForEventNode {
  config: EventConfig,
}

impl WaitForEventNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    Ok(Self {
      config: parse_config(node)?,
    })
  }
}

#[async_trait]
impl NodeImpl for WaitForEventNode {
  fn input_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![PortDef::new("inputData", DataType::ANY)]
  }

  fn output_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![
      PortDef::new("outputData", DataType::ANY),
      PortDef::new("eventData", DataType::ANY),
    ]
  }

  async fn execute(&self, inputs: Inputs, ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    let event = ctx.wait_for_event(&self.config.event_name).await?;
    let passthrough = inputs
      .get("inputData")
      .cloned()
      .unwrap_or(DataValue::Any(serde_json::Value::Null));
    Ok(outputs([("outputData", passthrough), ("eventData", event)]))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{context, inputs};
  use serde_json::json;

  #[tokio::test]
  async fn test_set_then_get() {
    let ctx = context();
    let set = SetGlobalNode::from_node(&Node::new("s", "setGlobal", json!({"id": "count"}))).unwrap();
    let get = GetGlobalNode::from_node(&Node::new("g", "getGlobal", json!({"id": "count", "wait": true}))).unwrap();

    let out = set
      .execute(inputs([("value", DataValue::Number(4.0))]), &ctx)
      .await
      .unwrap();
    assert_eq!(out["previousValue"], DataValue::Any(serde_json::Value::Null));

    let out = get.execute(Inputs::new(), &ctx).await.unwrap();
    assert_eq!(out["value"], DataValue::Number(4.0));
  }

  #[tokio::test]
  async fn test_unset_global_uses_type_default() {
    let get = GetGlobalNode::from_node(&Node::new(
      "g",
      "getGlobal",
      json!({"id": "missing", "dataType": "string[]"}),
    ))
    .unwrap();
    let out = get.execute(Inputs::new(), &context()).await.unwrap();
    assert_eq!(out["value"], DataValue::StringArray(vec![]));
  }
}
