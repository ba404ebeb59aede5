//! Pass-through, timing, text and early exit.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use minijinja::Environment;
use nodeflow_graph::{Connection, Node, NodeId, Project};
use nodeflow_node::{
  ExecutionContext, Inputs, NodeError, NodeImpl, Outputs, PortDef, dynamic_port_count, parse_config,
};
use nodeflow_value::coerce::to_string;
use nodeflow_value::{DataType, DataValue};
use serde::Deserialize;
use tracing::debug;

use crate::ports::{numbered_inputs, numbered_ports, outputs, present};

fn forward(inputs: &Inputs) -> Outputs {
  numbered_inputs(inputs, "input")
    .into_iter()
    .map(|(i, value)| (format!("output{i}").into(), value.clone()))
    .collect()
}

/// Forwards `inputN` to `outputN` unchanged.
#[derive(Debug)]
pub struct PassthroughNode {
  id: NodeId,
}

impl PassthroughNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    Ok(Self { id: node.id.clone() })
  }
}

#[async_trait]
impl NodeImpl for PassthroughNode {
  fn input_ports(&self, connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    let count = dynamic_port_count(connections, &self.id, "input");
    numbered_ports("input", count + 1, DataType::ANY)
  }

  fn output_ports(&self, connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    let count = dynamic_port_count(connections, &self.id, "input");
    numbered_ports("output", count, DataType::ANY)
  }

  async fn execute(&self, inputs: Inputs, _ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    Ok(forward(&inputs))
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelayConfig {
  #[serde(default)]
  delay_ms: u64,
}

/// Forwards its inputs after a cancellable sleep.
#[derive(Debug)]
pub struct DelayNode {
  id: NodeId,
  delay: Duration,
}

impl DelayNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    let config: DelayConfig = parse_config(node)?;
    Ok(Self {
      id: node.id.clone(),
      delay: Duration::from_millis(config.delay_ms),
    })
  }
}

#[async_trait]
impl NodeImpl for DelayNode {
  fn input_ports(&self, connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    let count = dynamic_port_count(connections, &self.id, "input");
    numbered_ports("input", count + 1, DataType::ANY)
  }

  fn output_ports(&self, connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    let count = dynamic_port_count(connections, &self.id, "input");
    numbered_ports("output", count, DataType::ANY)
  }

  async fn execute(&self, inputs: Inputs, ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    ctx.sleep(self.delay).await?;
    Ok(forward(&inputs))
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbortGraphConfig {
  #[serde(default)]
  successfully: bool,
  #[serde(default)]
  error_message: Option<String>,
}

/// Ends the whole process, either successfully with the outputs produced so
/// far or with an error taken from `data` or the configured message.
#[derive(Debug)]
pub struct AbortGraphNode {
  id: NodeId,
  config: AbortGraphConfig,
}

impl AbortGraphNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    Ok(Self {
      id: node.id.clone(),
      config: parse_config(node)?,
    })
  }
}

#[async_trait]
impl NodeImpl for AbortGraphNode {
  fn input_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![PortDef::new("data", DataType::ANY)]
  }

  fn output_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    Vec::new()
  }

  async fn execute(&self, inputs: Inputs, ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    if self.config.successfully {
      debug!(node_id = %self.id, "abort_graph_success");
      ctx.abort_graph(None);
      return Ok(Outputs::new());
    }

    let message = present(&inputs, "data")
      .and_then(to_string)
      .map(|s| s.trim().to_string())
      .filter(|s| !s.is_empty())
      .or_else(|| self.config.error_message.clone())
      .unwrap_or_else(|| "Graph aborted with error".to_string());
    debug!(node_id = %self.id, error = %message, "abort_graph_error");
    ctx.abort_graph(Some(message));
    Ok(Outputs::new())
  }

  fn steers_process(&self) -> bool {
    true
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextConfig {
  #[serde(default)]
  text: String,
}

/// Renders a template. Every variable the template reads becomes an input
/// port of the same name.
#[derive(Debug)]
pub struct TextNode {
  text: String,
  variables: Vec<String>,
}

impl TextNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    let config: TextConfig = parse_config(node)?;
    let env = Environment::new();
    let template = env
      .template_from_str(&config.text)
      .map_err(|e| NodeError::config(format!("node '{}': {}", node.id, e)))?;
    let mut variables: Vec<String> = template.undeclared_variables(false).into_iter().collect();
    variables.sort();
    Ok(Self {
      text: config.text,
      variables,
    })
  }
}

#[async_trait]
impl NodeImpl for TextNode {
  fn input_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    self
      .variables
      .iter()
      .map(|name| PortDef::new(name.as_str(), DataType::STRING))
      .collect()
  }

  fn output_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![PortDef::new("output", DataType::STRING)]
  }

  async fn execute(&self, inputs: Inputs, _ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    let context: BTreeMap<&str, String> = self
      .variables
      .iter()
      .map(|name| {
        let value = present(&inputs, name).and_then(to_string).unwrap_or_default();
        (name.as_str(), value)
      })
      .collect();
    let rendered = Environment::new()
      .render_str(&self.text, context)
      .map_err(|e| NodeError::failed(format!("template error: {e}")))?;
    Ok(outputs([("output", DataValue::String(rendered))]))
  }
}
