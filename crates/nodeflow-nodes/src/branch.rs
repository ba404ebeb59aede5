//! Branching nodes. Branches that do not fire produce the exclusion sentinel
//! on their ports.

use async_trait::async_trait;
use nodeflow_graph::{Connection, Node, NodeId, Project};
use nodeflow_node::{
  ExecutionContext, Inputs, NodeError, NodeImpl, NodeRole, Outputs, PortDef, dynamic_port_count,
  parse_config,
};
use nodeflow_value::coerce::{to_bool, to_string};
use nodeflow_value::{DataType, DataValue};
use regex::Regex;
use serde::Deserialize;

use crate::ports::{numbered_inputs, numbered_ports, outputs, present};

/// Routes `value` to `output` when `if` is truthy, otherwise to
/// `falseOutput`. The other port is excluded.
#[derive(Debug)]
pub struct IfNode;

impl IfNode {
  pub fn from_node(_node: &Node) -> Result<Self, NodeError> {
    Ok(Self)
  }
}

#[async_trait]
impl NodeImpl for IfNode {
  fn input_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![
      PortDef::new("if", DataType::ANY).required(),
      PortDef::new("value", DataType::ANY),
    ]
  }

  fn output_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![
      PortDef::new("output", DataType::ANY),
      PortDef::new("falseOutput", DataType::ANY),
    ]
  }

  async fn execute(&self, inputs: Inputs, _ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    let Some(condition) = present(&inputs, "if") else {
      return Ok(outputs([
        ("output", DataValue::excluded()),
        ("falseOutput", DataValue::excluded()),
      ]));
    };
    let value = inputs.get("value").unwrap_or(condition).clone();
    let (taken, skipped) = if to_bool(condition) {
      ("output", "falseOutput")
    } else {
      ("falseOutput", "output")
    };
    Ok(outputs([(taken, value), (skipped, DataValue::excluded())]))
  }

  fn accepts_excluded_inputs(&self) -> bool {
    true
  }
}

/// Selects between `true` and `false` by the truthiness of `if`. A missing
/// or excluded condition selects `false`.
#[derive(Debug)]
pub struct IfElseNode;

impl IfElseNode {
  pub fn from_node(_node: &Node) -> Result<Self, NodeError> {
    Ok(Self)
  }
}

#[async_trait]
impl NodeImpl for IfElseNode {
  fn input_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![
      PortDef::new("if", DataType::ANY).required(),
      PortDef::new("true", DataType::ANY),
      PortDef::new("false", DataType::ANY),
    ]
  }

  fn output_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![PortDef::new("output", DataType::ANY)]
  }

  async fn execute(&self, inputs: Inputs, _ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    let branch = if present(&inputs, "if").is_some_and(to_bool) {
      "true"
    } else {
      "false"
    };
    let value = inputs.get(branch).cloned().unwrap_or_else(DataValue::excluded);
    Ok(outputs([("output", value)]))
  }

  fn accepts_excluded_inputs(&self) -> bool {
    true
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchConfig {
  #[serde(default)]
  cases: Vec<String>,
  #[serde(default)]
  exclusive: bool,
}

/// Tests `input` against each case pattern. Matching cases forward `value`
/// (or the input text); the rest are excluded. `unmatched` fires when no
/// case did.
#[derive(Debug)]
pub struct MatchNode {
  cases: Vec<Regex>,
  exclusive: bool,
}

impl MatchNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    let config: MatchConfig = parse_config(node)?;
    let cases = config
      .cases
      .iter()
      .enumerate()
      .map(|(i, pattern)| {
        Regex::new(pattern)
          .map_err(|e| NodeError::config(format!("node '{}' case {}: {}", node.id, i + 1, e)))
      })
      .collect::<Result<Vec<_>, NodeError>>()?;
    Ok(Self {
      cases,
      exclusive: config.exclusive,
    })
  }
}

#[async_trait]
impl NodeImpl for MatchNode {
  fn input_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![
      PortDef::new("input", DataType::STRING).required(),
      PortDef::new("value", DataType::ANY),
    ]
  }

  fn output_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    let mut ports = numbered_ports("case", self.cases.len(), DataType::ANY);
    ports.push(PortDef::new("unmatched", DataType::ANY));
    ports
  }

  async fn execute(&self, inputs: Inputs, _ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    let text = present(&inputs, "input").and_then(to_string).unwrap_or_default();
    let value = present(&inputs, "value")
      .cloned()
      .unwrap_or_else(|| DataValue::String(text.clone()));

    let mut out = Outputs::new();
    let mut matched = false;
    for (i, case) in self.cases.iter().enumerate() {
      let fires = case.is_match(&text) && !(self.exclusive && matched);
      matched |= fires;
      let port = format!("case{}", i + 1);
      let result = if fires { value.clone() } else { DataValue::excluded() };
      out.insert(port.into(), result);
    }
    let unmatched = if matched { DataValue::excluded() } else { value };
    out.insert("unmatched".into(), unmatched);
    Ok(out)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoalesceConfig {
  #[serde(default)]
  default_value: Option<serde_json::Value>,
}

/// Forwards the first non-excluded `inputN`.
///
/// An excluded `conditional` excludes the output outright. When every input
/// is excluded the configured default is used, and without one the node
/// fails.
#[derive(Debug)]
pub struct CoalesceNode {
  id: NodeId,
  config: CoalesceConfig,
}

impl CoalesceNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    Ok(Self {
      id: node.id.clone(),
      config: parse_config(node)?,
    })
  }
}

#[async_trait]
impl NodeImpl for CoalesceNode {
  fn input_ports(&self, connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    let count = dynamic_port_count(connections, &self.id, "input");
    let mut ports = vec![PortDef::new("conditional", DataType::BOOLEAN)];
    ports.extend(numbered_ports("input", count + 1, DataType::ANY));
    ports
  }

  fn output_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![PortDef::new("output", DataType::ANY)]
  }

  async fn execute(&self, inputs: Inputs, _ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    if inputs.get("conditional").is_some_and(DataValue::is_excluded) {
      return Ok(outputs([("output", DataValue::excluded())]));
    }

    let first = numbered_inputs(&inputs, "input")
      .into_iter()
      .map(|(_, value)| value)
      .find(|value| !value.is_excluded());
    let value = match (first, &self.config.default_value) {
      (Some(value), _) => value.clone(),
      (None, Some(default)) => DataValue::infer(default.clone()),
      (None, None) => return Err(NodeError::failed("all coalesce inputs were excluded")),
    };
    Ok(outputs([("output", value)]))
  }

  fn accepts_excluded_inputs(&self) -> bool {
    true
  }

  fn recovers_failures(&self) -> bool {
    true
  }
}

/// Forwards whichever `inputN` delivers a value first. The scheduler runs
/// it early and aborts the losing branches.
#[derive(Debug)]
pub struct RaceInputsNode {
  id: NodeId,
}

impl RaceInputsNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    Ok(Self { id: node.id.clone() })
  }
}

#[async_trait]
impl NodeImpl for RaceInputsNode {
  fn input_ports(&self, connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    let count = dynamic_port_count(connections, &self.id, "input");
    numbered_ports("input", count + 1, DataType::ANY)
  }

  fn output_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![PortDef::new("result", DataType::ANY)]
  }

  async fn execute(&self, inputs: Inputs, _ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    let winner = numbered_inputs(&inputs, "input")
      .into_iter()
      .map(|(_, value)| value)
      .find(|value| !value.is_excluded())
      .cloned()
      .unwrap_or_else(DataValue::excluded);
    Ok(outputs([("result", winner)]))
  }

  fn role(&self) -> NodeRole {
    NodeRole::RaceInputs
  }

  fn accepts_excluded_inputs(&self) -> bool {
    true
  }

  fn recovers_failures(&self) -> bool {
    true
  }
}
