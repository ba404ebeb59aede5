//! Nodes that reach outside their own inputs: child processes, the user
//! and host functions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use nodeflow_graph::{Connection, GraphId, Node, NodeId, Project};
use nodeflow_node::{
  ExecutionContext, GraphInputs, Inputs, NodeError, NodeImpl, Outputs, PortDef, dynamic_port_count,
  parse_config,
};
use nodeflow_value::coerce::{coerce, to_string};
use nodeflow_value::{DataType, DataValue};
use serde::Deserialize;

use crate::io::{GraphInputConfig, GraphOutputConfig};
use crate::ports::{numbered_inputs, numbered_ports, outputs, present};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubGraphConfig {
  #[serde(default)]
  graph_id: String,
  #[serde(default)]
  use_error_output: bool,
  #[serde(default)]
  output_cost_duration: bool,
  /// Values for graph inputs whose port is unconnected.
  #[serde(default)]
  input_data: BTreeMap<String, serde_json::Value>,
}

/// Runs another graph of the project as a child process.
///
/// Its ports mirror the target graph: one input per `graphInput` id and one
/// output per `graphOutput` id.
#[derive(Debug)]
pub struct SubGraphNode {
  id: NodeId,
  graph_id: GraphId,
  config: SubGraphConfig,
}

impl SubGraphNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    let config: SubGraphConfig = parse_config(node)?;
    Ok(Self {
      id: node.id.clone(),
      graph_id: GraphId::from(config.graph_id.as_str()),
      config,
    })
  }

  fn boundary<T: Default + serde::de::DeserializeOwned>(
    &self,
    project: &Project,
    node_type: &str,
    id_of: impl Fn(&T) -> (String, DataType),
  ) -> Vec<(String, DataType)> {
    let Some(graph) = project.graph(self.graph_id.as_str()) else {
      return Vec::new();
    };
    let mut seen = BTreeMap::new();
    for node in graph.nodes_of_type(node_type) {
      if let Ok(config) = parse_config::<T>(node) {
        let (id, ty) = id_of(&config);
        seen.entry(id).or_insert(ty);
      }
    }
    seen.into_iter().collect()
  }

  fn graph_inputs(&self, project: &Project) -> Vec<(String, DataType)> {
    self.boundary(project, "graphInput", |c: &GraphInputConfig| (c.id.clone(), c.data_type))
  }

  fn graph_outputs(&self, project: &Project) -> Vec<(String, DataType)> {
    self.boundary(project, "graphOutput", |c: &GraphOutputConfig| (c.id.clone(), c.data_type))
  }

  fn failed_outputs(&self, project: &Project, message: String) -> Outputs {
    let mut out: Outputs = self
      .graph_outputs(project)
      .into_iter()
      .map(|(id, _)| (id.into(), DataValue::excluded()))
      .collect();
    out.insert("error".into(), DataValue::String(message));
    if self.config.output_cost_duration {
      out.insert("cost".into(), DataValue::Number(0.0));
      out.insert("duration".into(), DataValue::Number(0.0));
    }
    out
  }
}

#[async_trait]
impl NodeImpl for SubGraphNode {
  fn input_ports(&self, _connections: &[Connection], project: &Project) -> Vec<PortDef> {
    self
      .graph_inputs(project)
      .into_iter()
      .map(|(id, ty)| PortDef::new(id, ty))
      .collect()
  }

  fn output_ports(&self, _connections: &[Connection], project: &Project) -> Vec<PortDef> {
    let mut ports: Vec<PortDef> = self
      .graph_outputs(project)
      .into_iter()
      .map(|(id, ty)| PortDef::new(id, ty))
      .collect();
    if self.config.use_error_output {
      ports.push(PortDef::new("error", DataType::STRING));
    }
    if self.config.output_cost_duration {
      ports.push(PortDef::new("cost", DataType::NUMBER));
      ports.push(PortDef::new("duration", DataType::NUMBER));
    }
    ports
  }

  async fn execute(&self, inputs: Inputs, ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    let mut graph_inputs = GraphInputs::new();
    for (id, _) in self.graph_inputs(ctx.project()) {
      let value = present(&inputs, &id)
        .cloned()
        .or_else(|| self.config.input_data.get(&id).cloned().map(DataValue::infer));
      if let Some(value) = value {
        graph_inputs.insert(id, value);
      }
    }

    let outcome = match ctx.run_subgraph(&self.graph_id, graph_inputs).await {
      Ok(outcome) => outcome,
      Err(err) if self.config.use_error_output && !err.is_aborted() => {
        tracing::debug!(node_id = %self.id, error = %err, "subgraph_error_output");
        let message = match &err {
          NodeError::Subgraph { source, .. } => source.to_string(),
          other => other.to_string(),
        };
        return Ok(self.failed_outputs(ctx.project(), message));
      }
      Err(err) => return Err(err),
    };

    let mut out: Outputs = outcome
      .outputs
      .into_iter()
      .map(|(id, value)| (id.into(), value))
      .collect();
    if self.config.use_error_output {
      out.insert("error".into(), DataValue::excluded());
    }
    if self.config.output_cost_duration {
      out.insert("cost".into(), DataValue::Number(outcome.usage.cost));
      out.insert(
        "duration".into(),
        DataValue::Number(outcome.duration.as_millis() as f64),
      );
    }
    Ok(out)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserInputConfig {
  #[serde(default)]
  prompt: String,
  #[serde(default)]
  use_input: bool,
}

/// Suspends until the caller answers one or more questions.
#[derive(Debug)]
pub struct UserInputNode {
  config: UserInputConfig,
}

impl UserInputNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    Ok(Self {
      config: parse_config(node)?,
    })
  }

  fn questions(&self, inputs: &Inputs) -> Result<Vec<String>, NodeError> {
    if !self.config.use_input {
      return Ok(vec![self.config.prompt.clone()]);
    }
    let Some(value) = present(inputs, "questions") else {
      return Err(NodeError::MissingInput {
        port_id: "questions".into(),
      });
    };
    let list = coerce(value, DataType::STRING_ARRAY).map_err(|source| NodeError::InvalidInput {
      port_id: "questions".into(),
      source,
    })?;
    Ok(
      list
        .items()
        .unwrap_or_default()
        .iter()
        .filter_map(to_string)
        .collect(),
    )
  }
}

#[async_trait]
impl NodeImpl for UserInputNode {
  fn input_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    if self.config.use_input {
      vec![PortDef::new("questions", DataType::STRING_ARRAY).required()]
    } else {
      Vec::new()
    }
  }

  fn output_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![
      PortDef::new("output", DataType::STRING_ARRAY),
      PortDef::new("questionsAndAnswers", DataType::STRING_ARRAY),
    ]
  }

  async fn execute(&self, inputs: Inputs, ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    let questions = self.questions(&inputs)?;
    let answers = ctx.request_user_input(questions.clone()).await?;
    let pairs = questions
      .iter()
      .zip(answers.iter())
      .map(|(q, a)| format!("{q}\n{a}"))
      .collect::<Vec<_>>();
    Ok(outputs([
      ("output", DataValue::StringArray(answers)),
      ("questionsAndAnswers", DataValue::StringArray(pairs)),
    ]))
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExternalCallConfig {
  #[serde(default)]
  function_name: String,
}

/// Calls a host-registered function with `argumentN` in order.
#[derive(Debug)]
pub struct ExternalCallNode {
  id: NodeId,
  config: ExternalCallConfig,
}

impl ExternalCallNode {
  pub fn from_node(node: &Node) -> Result<Self, NodeError> {
    Ok(Self {
      id: node.id.clone(),
      config: parse_config(node)?,
    })
  }
}

#[async_trait]
impl NodeImpl for ExternalCallNode {
  fn input_ports(&self, connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    let count = dynamic_port_count(connections, &self.id, "argument");
    numbered_ports("argument", count + 1, DataType::ANY)
  }

  fn output_ports(&self, _connections: &[Connection], _project: &Project) -> Vec<PortDef> {
    vec![
      PortDef::new("result", DataType::ANY),
      PortDef::new("cost", DataType::NUMBER),
    ]
  }

  async fn execute(&self, inputs: Inputs, ctx: &ExecutionContext) -> Result<Outputs, NodeError> {
    let args = numbered_inputs(&inputs, "argument")
      .into_iter()
      .map(|(_, value)| value.clone())
      .collect();
    let result = ctx.call_external(&self.config.function_name, args).await?;
    Ok(outputs([
      ("result", result.value),
      ("cost", DataValue::Number(result.cost)),
    ]))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{context, inputs, run};
  use nodeflow_graph::Graph;
  use serde_json::json;

  fn helper_project() -> Project {
    Project::new("demo").with_graph(
      Graph::new("helper")
        .with_node(Node::new("in", "graphInput", json!({"id": "text", "dataType": "string"})))
        .with_node(Node::new("out", "graphOutput", json!({"id": "shout", "dataType": "string"}))),
    )
  }

  #[test]
  fn test_subgraph_ports_mirror_target() {
    let node = SubGraphNode::from_node(&Node::new(
      "s",
      "subGraph",
      json!({"graphId": "helper", "useErrorOutput": true, "outputCostDuration": true}),
    ))
    .unwrap();
    let project = helper_project();

    let inputs: Vec<_> = node.input_ports(&[], &project).into_iter().map(|p| p.id.to_string()).collect();
    assert_eq!(inputs, vec!["text"]);
    let outputs: Vec<_> = node.output_ports(&[], &project).into_iter().map(|p| p.id.to_string()).collect();
    assert_eq!(outputs, vec!["shout", "error", "cost", "duration"]);
  }

  #[tokio::test]
  async fn test_subgraph_error_output_outside_process() {
    let node = SubGraphNode::from_node(&Node::new(
      "s",
      "subGraph",
      json!({"graphId": "helper", "useErrorOutput": true}),
    ))
    .unwrap();
    let out = run(&node, Inputs::new()).await;
    assert!(matches!(out["error"], DataValue::String(_)));
  }

  #[tokio::test]
  async fn test_user_input_needs_a_process() {
    let node = UserInputNode::from_node(&Node::new("u", "userInput", json!({"prompt": "Name?"}))).unwrap();
    let err = node.execute(Inputs::new(), &context()).await.unwrap_err();
    assert!(matches!(err, NodeError::Unsupported { .. }));
  }

  #[test]
  fn test_user_input_questions_from_port() {
    let node = UserInputNode::from_node(&Node::new("u", "userInput", json!({"useInput": true}))).unwrap();
    let questions = node
      .questions(&inputs([("questions", DataValue::from(vec!["a?".to_string(), "b?".to_string()]))]))
      .unwrap();
    assert_eq!(questions, vec!["a?", "b?"]);
  }

  #[tokio::test]
  async fn test_external_call_echo() {
    let node = ExternalCallNode::from_node(&Node::new("x", "externalCall", json!({"functionName": "echo"}))).unwrap();
    let out = run(&node, inputs([("argument1", DataValue::from("hi"))])).await;
    assert_eq!(out["result"], DataValue::from("hi"));
    assert_eq!(out["cost"], DataValue::Number(0.0));
  }
}
