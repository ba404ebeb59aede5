use std::collections::{HashMap, HashSet, VecDeque};

use crate::{Connection, Graph, GraphError, NodeId};

/// Graph structure for traversal and analysis.
///
/// Built once per process from an immutable [`Graph`]. Besides plain
/// adjacency it keeps the connections feeding each node and the strongly
/// connected components, which is how loops are recognised.
#[derive(Debug, Clone)]
pub struct GraphIndex {
  /// Node ids in graph order.
  order: Vec<NodeId>,
  /// node_id -> downstream node_ids (deduplicated).
  adjacency: HashMap<NodeId, Vec<NodeId>>,
  /// node_id -> upstream node_ids (deduplicated).
  reverse_adjacency: HashMap<NodeId, Vec<NodeId>>,
  inbound: HashMap<NodeId, Vec<Connection>>,
  outbound: HashMap<NodeId, Vec<Connection>>,
  /// Strongly connected components that form a cycle.
  cycles: Vec<Vec<NodeId>>,
  cycle_of: HashMap<NodeId, usize>,
}

impl GraphIndex {
  /// Index a graph, rejecting duplicate node ids, connections to missing
  /// nodes and input ports with more than one producer.
  pub fn new(graph: &Graph) -> Result<Self, GraphError> {
    let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut reverse_adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut inbound: HashMap<NodeId, Vec<Connection>> = HashMap::new();
    let mut outbound: HashMap<NodeId, Vec<Connection>> = HashMap::new();
    let mut order = Vec::with_capacity(graph.nodes.len());

    for node in &graph.nodes {
      if adjacency.contains_key(&node.id) {
        return Err(GraphError::DuplicateNode {
          node_id: node.id.clone(),
        });
      }
      order.push(node.id.clone());
      adjacency.insert(node.id.clone(), Vec::new());
      reverse_adjacency.insert(node.id.clone(), Vec::new());
      inbound.insert(node.id.clone(), Vec::new());
      outbound.insert(node.id.clone(), Vec::new());
    }

    for conn in &graph.connections {
      for endpoint in [&conn.output_node_id, &conn.input_node_id] {
        if !adjacency.contains_key(endpoint) {
          return Err(GraphError::MissingNode {
            node_id: endpoint.clone(),
            input_node_id: conn.input_node_id.clone(),
          });
        }
      }

      let feeds = inbound.entry(conn.input_node_id.clone()).or_default();
      if feeds.iter().any(|c| c.input_port_id == conn.input_port_id) {
        return Err(GraphError::DuplicateInput {
          node_id: conn.input_node_id.clone(),
          port_id: conn.input_port_id.clone(),
        });
      }
      feeds.push(conn.clone());
      outbound
        .entry(conn.output_node_id.clone())
        .or_default()
        .push(conn.clone());

      let down = adjacency.entry(conn.output_node_id.clone()).or_default();
      if !down.contains(&conn.input_node_id) {
        down.push(conn.input_node_id.clone());
      }
      let up = reverse_adjacency
        .entry(conn.input_node_id.clone())
        .or_default();
      if !up.contains(&conn.output_node_id) {
        up.push(conn.output_node_id.clone());
      }
    }

    let mut index = Self {
      order,
      adjacency,
      reverse_adjacency,
      inbound,
      outbound,
      cycles: Vec::new(),
      cycle_of: HashMap::new(),
    };
    index.cycles = index.strongly_connected_cycles();
    for (i, cycle) in index.cycles.iter().enumerate() {
      for id in cycle {
        index.cycle_of.insert(id.clone(), i);
      }
    }
    Ok(index)
  }

  /// All node ids in graph order.
  pub fn nodes(&self) -> &[NodeId] {
    &self.order
  }

  pub fn downstream(&self, node_id: &str) -> &[NodeId] {
    self
      .adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  fn upstream(&self, node_id: &str) -> &[NodeId] {
    self
      .reverse_adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Connections feeding the node's input ports.
  pub fn inbound(&self, node_id: &str) -> &[Connection] {
    self
      .inbound
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Connections leaving the node's output ports.
  pub fn outbound(&self, node_id: &str) -> &[Connection] {
    self
      .outbound
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Connections with the node on either end.
  pub fn touching(&self, node_id: &str) -> Vec<Connection> {
    let mut conns = self.inbound(node_id).to_vec();
    conns.extend(
      self
        .outbound(node_id)
        .iter()
        .filter(|c| c.input_node_id != *node_id)
        .cloned(),
    );
    conns
  }

  /// The connection feeding a specific input port.
  pub fn producer_of(&self, node_id: &str, port_id: &str) -> Option<&Connection> {
    self
      .inbound(node_id)
      .iter()
      .find(|c| c.input_port_id == *port_id)
  }

  /// Cycles (strongly connected components with a back edge).
  pub fn cycles(&self) -> &[Vec<NodeId>] {
    &self.cycles
  }

  /// Position in [`GraphIndex::cycles`] of the cycle containing the node.
  pub fn cycle_index(&self, node_id: &str) -> Option<usize> {
    self.cycle_of.get(node_id).copied()
  }

  /// Every node reachable downstream, excluding the start node unless it
  /// sits on a cycle through itself.
  pub fn descendants(&self, node_id: &str) -> HashSet<NodeId> {
    self.reach(node_id, |id| self.downstream(id))
  }

  /// Every node that can reach this one.
  pub fn ancestors(&self, node_id: &str) -> HashSet<NodeId> {
    self.reach(node_id, |id| self.upstream(id))
  }

  fn reach<'a>(&'a self, start: &str, next: impl Fn(&str) -> &'a [NodeId]) -> HashSet<NodeId> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<&NodeId> = next(start).iter().collect();
    while let Some(id) = queue.pop_front() {
      if seen.insert(id.clone()) {
        queue.extend(next(id.as_str()));
      }
    }
    seen
  }

  /// Tarjan's algorithm, iterative. Only components that actually cycle
  /// (more than one node, or a node feeding itself) are returned.
  fn strongly_connected_cycles(&self) -> Vec<Vec<NodeId>> {
    let mut counter = 0usize;
    let mut indices: HashMap<&NodeId, usize> = HashMap::new();
    let mut lowlink: HashMap<&NodeId, usize> = HashMap::new();
    let mut stack: Vec<&NodeId> = Vec::new();
    let mut on_stack: HashSet<&NodeId> = HashSet::new();
    let mut cycles = Vec::new();

    for root in &self.order {
      if indices.contains_key(root) {
        continue;
      }

      let mut calls: Vec<(&NodeId, usize)> = vec![(root, 0)];
      indices.insert(root, counter);
      lowlink.insert(root, counter);
      counter += 1;
      stack.push(root);
      on_stack.insert(root);

      while let Some(&(node, next)) = calls.last() {
        let children = self.downstream(node.as_str());
        if next < children.len() {
          if let Some(top) = calls.last_mut() {
            top.1 += 1;
          }
          let child = &children[next];
          if !indices.contains_key(child) {
            indices.insert(child, counter);
            lowlink.insert(child, counter);
            counter += 1;
            stack.push(child);
            on_stack.insert(child);
            calls.push((child, 0));
          } else if on_stack.contains(child) {
            let low = lowlink[node].min(indices[child]);
            lowlink.insert(node, low);
          }
          continue;
        }

        calls.pop();
        if let Some(&(parent, _)) = calls.last() {
          let low = lowlink[parent].min(lowlink[node]);
          lowlink.insert(parent, low);
        }

        if lowlink[node] == indices[node] {
          let mut component = Vec::new();
          while let Some(member) = stack.pop() {
            on_stack.remove(member);
            component.push(member.clone());
            if member == node {
              break;
            }
          }
          let self_loop = self.downstream(node.as_str()).contains(node);
          if component.len() > 1 || self_loop {
            component.reverse();
            cycles.push(component);
          }
        }
      }
    }

    cycles
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::Node;
  use serde_json::Value;

  fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> Graph {
    let mut graph = Graph::new("g");
    for id in nodes {
      graph = graph.with_node(Node::new(*id, "passthrough", Value::Null));
    }
    for (i, (from, to)) in edges.iter().enumerate() {
      graph = graph.connect(*from, "output1", *to, format!("input{}", i + 1));
    }
    graph
  }

  #[test]
  fn test_adjacency() {
    let index = GraphIndex::new(&graph(&["a", "b", "c"], &[("a", "b"), ("a", "c"), ("b", "c")])).unwrap();

    assert_eq!(index.downstream("a").len(), 2);
    assert_eq!(index.upstream("c").len(), 2);
    assert!(index.cycles().is_empty());
  }

  #[test]
  fn test_detects_cycle() {
    let index = GraphIndex::new(&graph(
      &["start", "loop", "body", "after"],
      &[("start", "loop"), ("loop", "body"), ("body", "loop"), ("loop", "after")],
    ))
    .unwrap();

    let cycle = index.cycle_index("loop").unwrap();
    assert_eq!(index.cycle_index("body"), Some(cycle));
    assert_eq!(index.cycle_index("after"), None);
    assert_eq!(index.cycles()[cycle].len(), 2);
  }

  #[test]
  fn test_self_loop_is_a_cycle() {
    let index = GraphIndex::new(&graph(&["a"], &[("a", "a")])).unwrap();
    assert_eq!(index.cycle_index("a"), Some(0));
  }

  #[test]
  fn test_rejects_two_producers_for_one_input() {
    let graph = Graph::new("g")
      .with_node(Node::new("a", "passthrough", Value::Null))
      .with_node(Node::new("b", "passthrough", Value::Null))
      .with_node(Node::new("c", "passthrough", Value::Null))
      .connect("a", "output1", "c", "input1")
      .connect("b", "output1", "c", "input1");

    let err = GraphIndex::new(&graph).unwrap_err();
    assert!(matches!(err, GraphError::DuplicateInput { .. }));
  }

  #[test]
  fn test_rejects_missing_node() {
    let graph = Graph::new("g")
      .with_node(Node::new("a", "passthrough", Value::Null))
      .connect("a", "output1", "ghost", "input1");

    let err = GraphIndex::new(&graph).unwrap_err();
    assert_eq!(err.node_id(), Some(&NodeId::from("ghost")));
  }

  #[test]
  fn test_ancestors_and_descendants() {
    let index = GraphIndex::new(&graph(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("d", "c")])).unwrap();

    let ancestors = index.ancestors("c");
    assert_eq!(ancestors.len(), 3);
    assert!(index.descendants("a").contains("c"));
    assert!(!index.descendants("a").contains("d"));
  }
}
