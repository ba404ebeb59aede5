//! Comparison and arithmetic.

use std::cmp::Ordering;

use async_trait::async_trait;
use nodeflow_graph::{Connection, Node, Project};
use nodeflow_node::{ExecutionContext, Inputs, NodeError, NodeImpl, Outputs, PortDef, parse_config};
use nodeflow_value::coerce::{coerce_optional, to_bool, to_number, to_string};
use nodeflow_value::{DataType, DataValue, ScalarType};
use serde::Deserialize;

use crate::ports::{outputs, present};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ComparisonFunction {
  #[default]
  #[serde(rename = "==")]
  Eq,
  #[serde(rename = "!=")]
  Ne,
  #[serde(rename = "<")]
  Lt,
  #[serde(rename = ">")]
  Gt,
  #[serde(rename = "<=")]
  Le,
  #[serde(rename = ">=")]
  Ge,
  #[serde(rename = "and")]
  And,
  #[serde(rename = "or")]
  Or,
  #[serde(rename = "xor")]
  Xor,
  #[serde(rename = "nand")]
  Nand,
  #[serde(rename = "nor")]
  Nor,
  #[serde(rename = "xnor")]
  Xnor,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompareConfig {
  #[serde(default)]
  comparison_function: ComparisonFunction,
  #[serde(default)]
  use_comparison_function_input: bool,
}

/// Compares `a` with `b`, coercing `b` to the type of `a`.
#[derive(Debug)]
pub struct CompareNode {
  config: CompareConfig,
}

impl CompareNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    Ok(Self {
      config: parse_config(node)?,
    })
  }

  fn function(&self, inputs: &Inputs) -> Result<ComparisonFunction, NodeError> {
    if !self.config.use_comparison_function_input {
      return Ok(self.config.comparison_function);
    }
    let name = present(inputs, "comparisonFunction")
      .and_then(to_string)
      .unwrap_or_default();
    serde_json::from_value(serde_json::Value::String(name.clone()))
      .map_err(|_| NodeError::failed(format!("unknown comparison function '{name}'")))
  }
}

fn ordering(a: &DataValue, b: &DataValue) -> Option<Ordering> {
  match a.data_type().scalar {
    ScalarType::Number | ScalarType::Boolean => to_number(a)?.partial_cmp(&to_number(b)?),
    _ => Some(to_string(a)?.cmp(&to_string(b)?)),
  }
}

pub(crate) fn compare(function: ComparisonFunction, a: Option<&DataValue>, b: Option<&DataValue>) -> bool {
  use ComparisonFunction as F;

  let Some(a) = a else {
    return match function {
      F::Eq => b.is_none(),
      F::Ne => b.is_some(),
      _ => false,
    };
  };
  let b = coerce_optional(b, a.data_type()).ok().flatten();

  let (x, y) = (to_bool(a), b.as_ref().is_some_and(to_bool));
  match function {
    F::Eq => b.is_some_and(|b| a.to_json() == b.to_json()),
    F::Ne => b.is_none_or(|b| a.to_json() != b.to_json()),
    F::Lt => b.and_then(|b| ordering(a, &b)) == Some(Ordering::Less),
    F::Gt => b.and_then(|b| ordering(a, &b)) == Some(Ordering::Greater),
    F::Le => matches!(b.and_then(|b| ordering(a, &b)), Some(Ordering::Less | Ordering::Equal)),
    F::Ge => matches!(b.and_then(|b| ordering(a, &b)), Some(Ordering::Greater | Ordering::Equal)),
    F::And => x && y,
    F::Or => x || y,
    F::Xor => x != y,
    F::Nand => !(x && y),
    F::Nor => !(x || y),
    F::Xnor => x == y,
  }
}

#[async_trait]
impl NodeImpl for CompareNode {
  fn input_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    let mut ports = vec![PortDef::new("a", DataType::ANY), PortDef::new("b", DataType::ANY)];
    if self.config.use_comparison_function_input {
      ports.push(PortDef::new("comparisonFunction", DataType::STRING).required());
    }
    ports
  }

  fn output_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![PortDef::new("output", DataType::BOOLEAN)]
  }

  async fn execute(&self, inputs: Inputs, _ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    let function = self.function(&inputs)?;
    let result = compare(function, present(&inputs, "a"), present(&inputs, "b"));
    Ok(outputs([("output", DataValue::Boolean(result))]))
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum Operation {
  #[default]
  #[serde(rename = "+")]
  Add,
  #[serde(rename = "-")]
  Subtract,
  #[serde(rename = "*")]
  Multiply,
  #[serde(rename = "/")]
  Divide,
  #[serde(rename = "^")]
  Power,
  #[serde(rename = "%")]
  Modulo,
  #[serde(rename = "abs")]
  Abs,
  #[serde(rename = "negate")]
  Negate,
}

impl Operation {
  fn is_unary(&self) -> bool {
    matches!(self, Operation::Abs | Operation::Negate)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateConfig {
  #[serde(default)]
  operation: Operation,
  /// Constant used for `b` when that port is unconnected.
  #[serde(default)]
  b: Option<f64>,
}

/// Numeric operation on `a` and `b`.
#[derive(Debug)]
pub struct EvaluateNode {
  config: EvaluateConfig,
}

impl EvaluateNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    Ok(Self {
      config: parse_config(node)?,
    })
  }
}

fn number(inputs: &Inputs, port: &str) -> Result<f64, NodeError> {
  let value = present(inputs, port).ok_or_else(|| NodeError::MissingInput { port_id: port.into() })?;
  to_number(value).ok_or_else(|| NodeError::failed(format!("input '{port}' is not a number")))
}

#[async_trait]
impl NodeImpl for EvaluateNode {
  fn input_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    let a = PortDef::new("a", DataType::NUMBER).required();
    let b = match self.config.b {
      Some(b) => PortDef::new("b", DataType::NUMBER).with_default(DataValue::Number(b)),
      None => PortDef::new("b", DataType::NUMBER),
    };
    if self.config.operation.is_unary() {
      vec![a]
    } else {
      vec![a, b]
    }
  }

  fn output_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![PortDef::new("output", DataType::NUMBER)]
  }

  async fn execute(&self, inputs: Inputs, _ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    let a = number(&inputs, "a")?;
    let b = || number(&inputs, "b");
    let result = match self.config.operation {
      Operation::Abs => a.abs(),
      Operation::Negate => -a,
      Operation::Add => a + b()?,
      Operation::Subtract => a - b()?,
      Operation::Multiply => a * b()?,
      Operation::Divide => a / b()?,
      Operation::Power => a.powf(b()?),
      Operation::Modulo => a % b()?,
    };
    Ok(outputs([("output", DataValue::Number(result))]))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{inputs, run};
  use serde_json::json;

  #[test]
  fn test_compare_coerces_b_to_type_of_a() {
    let five = DataValue::Number(5.0);
    let text = DataValue::from("5");
    assert!(compare(ComparisonFunction::Eq, Some(&five), Some(&text)));
    assert!(compare(ComparisonFunction::Gt, Some(&five), Some(&DataValue::from("0"))));
    assert!(!compare(ComparisonFunction::Lt, Some(&five), Some(&DataValue::Number(2.0))));
    assert!(compare(ComparisonFunction::Ge, Some(&five), Some(&five)));
  }

  #[test]
  fn test_compare_missing_a() {
    assert!(compare(ComparisonFunction::Eq, None, None));
    assert!(compare(ComparisonFunction::Ne, None, Some(&DataValue::Number(1.0))));
    assert!(!compare(ComparisonFunction::Gt, None, Some(&DataValue::Number(1.0))));
  }

  #[test]
  fn test_compare_logical() {
    let t = DataValue::Boolean(true);
    let f = DataValue::Boolean(false);
    assert!(compare(ComparisonFunction::Xor, Some(&t), Some(&f)));
    assert!(compare(ComparisonFunction::Nand, Some(&t), Some(&f)));
    assert!(!compare(ComparisonFunction::And, Some(&t), Some(&f)));
    assert!(compare(ComparisonFunction::Xnor, Some(&f), Some(&f)));
  }

  #[tokio::test]
  async fn test_compare_function_from_input() {
    let node = CompareNode::from_node(&Node::new(
      "c",
      "compare",
      json!({"useComparisonFunctionInput": true}),
    ))
    .unwrap();
    let out = run(
      &node,
      inputs([
        ("a", DataValue::Number(1.0)),
        ("b", DataValue::Number(2.0)),
        ("comparisonFunction", DataValue::from("<")),
      ]),
    )
    .await;
    assert_eq!(out["output"], DataValue::Boolean(true));
  }

  #[tokio::test]
  async fn test_evaluate_uses_constant_b() {
    let node = EvaluateNode::from_node(&Node::new("e", "evaluate", json!({"operation": "+", "b": 1}))).unwrap();
    let ports = node.input_ports(&[], &Project::default());
    assert_eq!(ports[1].default, Some(DataValue::Number(1.0)));

    // The scheduler fills unconnected ports from their defaults.
    let out = run(&node, inputs([("a", DataValue::Number(2.0)), ("b", DataValue::Number(1.0))])).await;
    assert_eq!(out["output"], DataValue::Number(3.0));
  }

  #[tokio::test]
  async fn test_evaluate_unary_and_missing_b() {
    let negate = EvaluateNode::from_node(&Node::new("e", "evaluate", json!({"operation": "negate"}))).unwrap();
    let out = run(&negate, inputs([("a", DataValue::from("4"))])).await;
    assert_eq!(out["output"], DataValue::Number(-4.0));

    let divide = EvaluateNode::from_node(&Node::new("e", "evaluate", json!({"operation": "/"}))).unwrap();
    let err = divide
      .execute(inputs([("a", DataValue::Number(4.0))]), &crate::testing::context())
      .await
      .unwrap_err();
    assert!(matches!(err, NodeError::MissingInput { .. }));
  }
}
