//! The loop controller.

use async_trait::async_trait;
use nodeflow_graph::{Connection, Node, NodeId, Project};
use nodeflow_node::{
  ExecutionContext, Inputs, LOOP_BREAK_PORT, NodeError, NodeImpl, NodeRole, Outputs, PortDef,
  dynamic_port_count, parse_config,
};
use nodeflow_value::coerce::to_bool;
use nodeflow_value::{DataType, DataValue};
use serde::Deserialize;
use tracing::debug;

const DEFAULT_MAX_ITERATIONS: u32 = 100;

fn default_max_iterations() -> u32 {
  DEFAULT_MAX_ITERATIONS
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AtMaxIterations {
  Break,
  #[default]
  Error,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoopControllerConfig {
  #[serde(default = "default_max_iterations")]
  max_iterations: u32,
  #[serde(default)]
  at_max_iterations_action: AtMaxIterations,
}

impl Default for LoopControllerConfig {
  fn default() -> Self {
    Self {
      max_iterations: DEFAULT_MAX_ITERATIONS,
      at_max_iterations_action: AtMaxIterations::Error,
    }
  }
}

/// Head of a loop.
///
/// Each `inputK` is paired with `inputKDefault`: the first pass reads the
/// default, later passes read the value fed back from the loop body. Every
/// pass forwards the current values on `outputK`. While `continue` is truthy
/// (or unconnected) `break` carries the loop-not-broken sentinel and the
/// scheduler runs the body again. Once it breaks, `break` carries the final
/// values as an array and `outputK` keep them for nodes after the loop.
#[derive(Debug)]
pub struct LoopControllerNode {
  id: NodeId,
  config: LoopControllerConfig,
}

impl LoopControllerNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    Ok(Self {
      id: node.id.clone(),
      config: parse_config(node)?,
    })
  }

  fn pairs(&self, inputs: &Inputs) -> usize {
    inputs
      .keys()
      .filter_map(|id| {
        let rest = id.as_str().strip_prefix("input")?;
        rest.strip_suffix("Default").unwrap_or(rest).parse::<usize>().ok()
      })
      .max()
      .unwrap_or(0)
  }
}

#[async_trait]
impl NodeImpl for LoopControllerNode {
  fn input_ports(&self, connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    let count = dynamic_port_count(connections, &self.id, "input");
    let mut ports = vec![PortDef::new("continue", DataType::ANY)];
    for i in 1..=count + 1 {
      ports.push(PortDef::new(format!("input{i}"), DataType::ANY));
      ports.push(PortDef::new(format!("input{i}Default"), DataType::ANY).with_title(format!("Input {i} Default")));
    }
    ports
  }

  fn output_ports(&self, connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    let count = dynamic_port_count(connections, &self.id, "input");
    let mut ports = vec![
      PortDef::new(LOOP_BREAK_PORT, DataType::ANY),
      PortDef::new("iteration", DataType::NUMBER),
    ];
    ports.extend((1..=count).map(|i| PortDef::new(format!("output{i}"), DataType::ANY)));
    ports
  }

  async fn execute(&self, inputs: Inputs, ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    let count = self.pairs(&inputs);
    let mut out = Outputs::new();

    let default_excluded = (1..=count).any(|i| {
      inputs
        .get(format!("input{i}Default").as_str())
        .is_some_and(DataValue::is_excluded)
    });
    if default_excluded {
      out.insert(LOOP_BREAK_PORT.into(), DataValue::excluded());
      for i in 1..=count {
        out.insert(format!("output{i}").into(), DataValue::excluded());
      }
      return Ok(out);
    }

    let iteration = ctx.iteration();
    let at_max = iteration >= self.config.max_iterations;
    if at_max && self.config.at_max_iterations_action == AtMaxIterations::Error {
      return Err(NodeError::failed(format!(
        "loop exceeded max iterations of {}",
        self.config.max_iterations
      )));
    }

    let keep_going = match inputs.get("continue") {
      None => true,
      Some(value) if value.is_excluded() => false,
      Some(value) => to_bool(value),
    } && !at_max;

    let values: Vec<DataValue> = (1..=count)
      .map(|i| {
        let fed_back = inputs
          .get(format!("input{i}").as_str())
          .filter(|v| !v.is_excluded());
        fed_back
          .or_else(|| inputs.get(format!("input{i}Default").as_str()))
          .cloned()
          .unwrap_or(DataValue::Any(serde_json::Value::Null))
      })
      .collect();

    debug!(node_id = %self.id, iteration, keep_going, "loop_controller_evaluated");

    let signal = if keep_going {
      DataValue::loop_not_broken()
    } else {
      DataValue::AnyArray(values.iter().map(DataValue::to_json).collect())
    };
    out.insert(LOOP_BREAK_PORT.into(), signal);
    out.insert("iteration".into(), DataValue::Number(f64::from(iteration + 1)));
    for (i, value) in values.into_iter().enumerate() {
      out.insert(format!("output{}", i + 1).into(), value);
    }
    Ok(out)
  }

  fn role(&self) -> NodeRole {
    NodeRole::LoopController
  }

  fn accepts_excluded_inputs(&self) -> bool {
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{context_with, inputs};
  use nodeflow_node::StandaloneServices;
  use serde_json::json;

  fn controller(data: serde_json::Value) -> LoopControllerNode {
    LoopControllerNode::from_node(&Node::new("loop", "loopController", data)).unwrap()
  }

  async fn pass(node: &LoopControllerNode, values: Inputs, iteration: u32) -> Result<Outputs, NodeError> {
    let ctx = context_with(StandaloneServices::new(Project::default()), iteration);
    node.execute(values, &ctx).await
  }

  #[tokio::test]
  async fn test_first_pass_uses_defaults() {
    let node = controller(serde_json::Value::Null);
    let out = pass(&node, inputs([("input1Default", DataValue::Number(0.0))]), 0)
      .await
      .unwrap();
    assert!(out[LOOP_BREAK_PORT].is_loop_not_broken());
    assert_eq!(out["output1"], DataValue::Number(0.0));
    assert_eq!(out["iteration"], DataValue::Number(1.0));
  }

  #[tokio::test]
  async fn test_break_latches_values() {
    let node = controller(serde_json::Value::Null);
    let out = pass(
      &node,
      inputs([
        ("continue", DataValue::Boolean(false)),
        ("input1", DataValue::Number(3.0)),
        ("input1Default", DataValue::Number(0.0)),
      ]),
      3,
    )
    .await
    .unwrap();
    assert_eq!(out[LOOP_BREAK_PORT], DataValue::AnyArray(vec![json!(3.0)]));
    assert_eq!(out["output1"], DataValue::Number(3.0));
  }

  #[tokio::test]
  async fn test_excluded_default_excludes_everything() {
    let node = controller(serde_json::Value::Null);
    let out = pass(&node, inputs([("input1Default", DataValue::excluded())]), 0)
      .await
      .unwrap();
    assert!(out[LOOP_BREAK_PORT].is_excluded());
    assert!(!out[LOOP_BREAK_PORT].is_loop_not_broken());
    assert!(out["output1"].is_excluded());
  }

  #[tokio::test]
  async fn test_max_iterations() {
    let failing = controller(json!({"maxIterations": 2}));
    let err = pass(&failing, inputs([("input1Default", DataValue::Number(0.0))]), 2)
      .await
      .unwrap_err();
    assert!(err.to_string().contains("max iterations"));

    let breaking = controller(json!({"maxIterations": 2, "atMaxIterationsAction": "break"}));
    let out = pass(&breaking, inputs([("input1Default", DataValue::Number(0.0))]), 2)
      .await
      .unwrap();
    assert!(!out[LOOP_BREAK_PORT].is_excluded());
  }

  #[test]
  fn test_ports_follow_connections() {
    let node = controller(serde_json::Value::Null);
    let connections = vec![
      Connection::new("body", "output", "loop", "input1"),
      Connection::new("seed", "data", "loop", "input1Default"),
    ];
    let inputs = node.input_ports(&connections, &Project::default());
    assert_eq!(inputs.len(), 5);
    let outputs = node.output_ports(&connections, &Project::default());
    assert_eq!(outputs.len(), 3);
  }
}
