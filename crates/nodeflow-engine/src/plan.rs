//! Static analysis of a graph before any node runs.
//!
//! A plan instantiates every node, resolves its port lists against the
//! connections touching it, checks that the wiring is sound, and carves out
//! loop regions: each cycle must contain exactly one loop controller, and the
//! region is that controller's strongly connected component.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use nodeflow_graph::{Graph, GraphError, GraphIndex, Node, NodeId, Project};
use nodeflow_node::{NodeError, NodeImpl, NodeRegistry, NodeRole, PortDef};

/// One instantiated node.
pub(crate) struct PlannedNode {
  pub node: Node,
  pub imp: Arc<dyn NodeImpl>,
  pub inputs: Vec<PortDef>,
  pub outputs: Vec<PortDef>,
  pub role: NodeRole,
}

/// A loop controller and the nodes it re-runs.
#[derive(Debug, Clone)]
pub(crate) struct LoopRegion {
  pub controller: NodeId,
  /// Every other member of the controller's cycle.
  pub body: Vec<NodeId>,
}

#[derive(Debug)]
pub(crate) enum PlanError {
  Graph(GraphError),
  Node { node_id: NodeId, source: NodeError },
}

impl From<GraphError> for PlanError {
  fn from(err: GraphError) -> Self {
    PlanError::Graph(err)
  }
}

pub(crate) struct Plan {
  pub index: GraphIndex,
  pub nodes: HashMap<NodeId, PlannedNode>,
  pub loops: Vec<LoopRegion>,
  /// Loop region of each of the index's cycles, if it has a controller.
  cycle_regions: Vec<Option<usize>>,
}

impl Plan {
  pub fn build(graph: &Graph, project: &Project, registry: &NodeRegistry) -> Result<Self, PlanError> {
    let index = GraphIndex::new(graph)?;

    let mut nodes = HashMap::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
      let imp = registry.create(node).map_err(|source| PlanError::Node {
        node_id: node.id.clone(),
        source,
      })?;
      let touching = index.touching(node.id.as_str());
      let inputs = imp.input_ports(&touching, project);
      let outputs = imp.output_ports(&touching, project);
      let role = imp.role();
      nodes.insert(
        node.id.clone(),
        PlannedNode {
          node: node.clone(),
          imp,
          inputs,
          outputs,
          role,
        },
      );
    }

    validate_ports(graph, &index, &nodes)?;
    let (loops, cycle_regions) = loop_regions(&index, &nodes)?;

    Ok(Self {
      index,
      nodes,
      loops,
      cycle_regions,
    })
  }

  /// Node ids in graph order.
  pub fn order(&self) -> &[NodeId] {
    self.index.nodes()
  }

  pub fn node(&self, id: &str) -> Option<&PlannedNode> {
    self.nodes.get(id)
  }

  /// Loop region of a controller or body node.
  pub fn region_of(&self, id: &str) -> Option<usize> {
    let cycle = self.index.cycle_index(id)?;
    self.cycle_regions.get(cycle).copied().flatten()
  }

  /// Nodes whose only reason to exist is to feed `target`: every path out
  /// of them leads into `target` or into another such node.
  pub fn exclusive_ancestors(&self, target: &NodeId) -> HashSet<NodeId> {
    let mut exclusive = self.index.ancestors(target.as_str());
    exclusive.remove(target);
    loop {
      let escaping: Vec<NodeId> = exclusive
        .iter()
        .filter(|id| {
          self
            .index
            .downstream(id.as_str())
            .iter()
            .any(|down| down != target && !exclusive.contains(down))
        })
        .cloned()
        .collect();
      if escaping.is_empty() {
        return exclusive;
      }
      for id in escaping {
        exclusive.remove(&id);
      }
    }
  }
}

fn validate_ports(
  graph: &Graph,
  index: &GraphIndex,
  nodes: &HashMap<NodeId, PlannedNode>,
) -> Result<(), GraphError> {
  let has_port = |ports: &[PortDef], id: &str| ports.iter().any(|p| p.id == *id);

  for conn in &graph.connections {
    let producer = &nodes[&conn.output_node_id];
    if !has_port(&producer.outputs, conn.output_port_id.as_str()) {
      return Err(GraphError::MissingPort {
        node_id: conn.output_node_id.clone(),
        port_id: conn.output_port_id.clone(),
      });
    }
    let consumer = &nodes[&conn.input_node_id];
    if !has_port(&consumer.inputs, conn.input_port_id.as_str()) {
      return Err(GraphError::MissingPort {
        node_id: conn.input_node_id.clone(),
        port_id: conn.input_port_id.clone(),
      });
    }
  }

  for id in index.nodes() {
    let planned = &nodes[id];
    for port in &planned.inputs {
      let connected = index.producer_of(id.as_str(), port.id.as_str()).is_some();
      if port.required && !connected && port.default.is_none() {
        return Err(GraphError::RequiredInputUnconnected {
          node_id: id.clone(),
          port_id: port.id.clone(),
        });
      }
    }
  }
  Ok(())
}

type Regions = (Vec<LoopRegion>, Vec<Option<usize>>);

fn loop_regions(index: &GraphIndex, nodes: &HashMap<NodeId, PlannedNode>) -> Result<Regions, GraphError> {
  let mut loops = Vec::new();
  let mut cycle_regions = Vec::with_capacity(index.cycles().len());

  for cycle in index.cycles() {
    let mut controllers = cycle
      .iter()
      .filter(|id| nodes[*id].role == NodeRole::LoopController);
    // A cycle without a controller is left alone; it deadlocks at runtime.
    let Some(controller) = controllers.next() else {
      cycle_regions.push(None);
      continue;
    };
    if let Some(inner) = controllers.next() {
      return Err(GraphError::NestedLoop {
        outer: controller.clone(),
        inner: inner.clone(),
      });
    }

    cycle_regions.push(Some(loops.len()));
    loops.push(LoopRegion {
      controller: controller.clone(),
      body: cycle.iter().filter(|id| *id != controller).cloned().collect(),
    });
  }

  Ok((loops, cycle_regions))
}

#[cfg(test)]
mod tests {
  use super::*;
  use nodeflow_nodes::builtin_registry;
  use serde_json::json;

  fn plan(graph: Graph) -> Result<Plan, PlanError> {
    let project = Project::new("p").with_graph(graph.clone());
    Plan::build(&graph, &project, &builtin_registry())
  }

  #[test]
  fn test_missing_port_is_structural() {
    let graph = Graph::new("g")
      .with_node(Node::new("in", "graphInput", json!({"id": "x"})))
      .with_node(Node::new("out", "graphOutput", json!({"id": "y"})))
      .connect("in", "nope", "out", "value");
    let Err(PlanError::Graph(err)) = plan(graph) else {
      panic!("expected a structural error");
    };
    assert_eq!(
      err,
      GraphError::MissingPort {
        node_id: "in".into(),
        port_id: "nope".into()
      }
    );
  }

  #[test]
  fn test_required_input_without_producer() {
    let graph = Graph::new("g").with_node(Node::new("add", "evaluate", json!({"operation": "+"})));
    let Err(PlanError::Graph(err)) = plan(graph) else {
      panic!("expected a structural error");
    };
    assert!(matches!(err, GraphError::RequiredInputUnconnected { .. }));
  }

  #[test]
  fn test_unknown_node_type() {
    let graph = Graph::new("g").with_node(Node::new("x", "teleport", json!({})));
    assert!(matches!(plan(graph), Err(PlanError::Node { .. })));
  }

  #[test]
  fn test_loop_region_is_the_controllers_cycle() {
    let graph = Graph::new("g")
      .with_node(Node::new("seed", "graphInput", json!({"id": "n", "dataType": "number"})))
      .with_node(Node::new("loop", "loopController", json!({})))
      .with_node(Node::new("add", "evaluate", json!({"operation": "+", "b": 1})))
      .with_node(Node::new("after", "graphOutput", json!({"id": "out"})))
      .connect("seed", "data", "loop", "input1Default")
      .connect("loop", "output1", "add", "a")
      .connect("add", "output", "loop", "input1")
      .connect("loop", "output1", "after", "value");
    let plan = plan(graph).unwrap_or_else(|_| panic!("plan failed"));

    assert_eq!(plan.loops.len(), 1);
    assert_eq!(plan.loops[0].controller, NodeId::from("loop"));
    assert_eq!(plan.loops[0].body, vec![NodeId::from("add")]);
    assert_eq!(plan.region_of("add"), Some(0));
    assert_eq!(plan.region_of("loop"), Some(0));
    assert_eq!(plan.region_of("after"), None);
    assert_eq!(plan.region_of("seed"), None);
  }

  #[test]
  fn test_cycle_without_controller_has_no_region() {
    let graph = Graph::new("g")
      .with_node(Node::new("a", "passthrough", json!({})))
      .with_node(Node::new("b", "passthrough", json!({})))
      .connect("a", "output1", "b", "input1")
      .connect("b", "output1", "a", "input1");
    let plan = plan(graph).unwrap_or_else(|_| panic!("plan failed"));
    assert!(plan.loops.is_empty());
    assert_eq!(plan.region_of("a"), None);
  }

  #[test]
  fn test_two_controllers_in_one_cycle() {
    let graph = Graph::new("g")
      .with_node(Node::new("outer", "loopController", json!({})))
      .with_node(Node::new("inner", "loopController", json!({})))
      .connect("outer", "output1", "inner", "input1")
      .connect("inner", "output1", "outer", "input1");
    let Err(PlanError::Graph(err)) = plan(graph) else {
      panic!("expected a structural error");
    };
    assert!(matches!(err, GraphError::NestedLoop { .. }));
  }

  #[test]
  fn test_exclusive_ancestors_stop_at_shared_nodes() {
    // shared feeds both the race and a sibling output, so it is not exclusive.
    let graph = Graph::new("g")
      .with_node(Node::new("shared", "graphInput", json!({"id": "a"})))
      .with_node(Node::new("slow", "delay", json!({"delayMs": 10})))
      .with_node(Node::new("fast", "graphInput", json!({"id": "b"})))
      .with_node(Node::new("race", "raceInputs", json!({})))
      .with_node(Node::new("other", "graphOutput", json!({"id": "other"})))
      .connect("shared", "data", "slow", "input1")
      .connect("shared", "data", "other", "value")
      .connect("slow", "output1", "race", "input1")
      .connect("fast", "data", "race", "input2");
    let plan = plan(graph).unwrap_or_else(|_| panic!("plan failed"));

    let exclusive = plan.exclusive_ancestors(&NodeId::from("race"));
    assert!(exclusive.contains("slow"));
    assert!(exclusive.contains("fast"));
    assert!(!exclusive.contains("shared"));
  }
}
