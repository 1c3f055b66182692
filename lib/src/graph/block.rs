///
/// A recovered dynamic control-flow region: one node from the outside, one
/// graph from the inside. Membership is fixed at construction by the
/// recovery pass; boundary inputs/outputs and source/sink sets are derived
/// on demand from the shared tensor arena.
///
use std::collections::{BTreeSet, HashMap};

use crate::graph::{GraphNode, Node, OpContainer};
use crate::ops::OpKind;
use crate::symbolic::Expr;
use crate::tensor::TensorMap;
use crate::Error;

#[derive(Debug, Clone)]
pub struct ControlBlockOp {
  name: String,
  // the control-identifying member, e.g. the loop-condition op
  root: String,
  nodes: HashMap<String, Node>,
}

impl ControlBlockOp {
  pub fn new(
    name: impl Into<String>,
    root: impl Into<String>,
    members: Vec<Node>,
  ) -> Result<Self, Error> {
    let mut block = ControlBlockOp {
      name: name.into(),
      root: root.into(),
      nodes: HashMap::new(),
    };
    for member in members {
      block.add_node(member)?;
    }
    if !block.nodes.contains_key(&block.root) {
      return Err(Error::structural(
        &block.name,
        format!("root op {} is not a member of the block", block.root),
      ));
    }
    Ok(block)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn root(&self) -> &str {
    &self.root
  }

  pub fn members(&self) -> impl Iterator<Item = &Node> {
    self.nodes.values()
  }

  pub fn member_names(&self) -> impl Iterator<Item = &str> {
    self.nodes.keys().map(|s| s.as_str())
  }

  /// Whether `op` lives in this block, at any nesting depth.
  pub fn contains_op(&self, op: &str) -> bool {
    if self.nodes.contains_key(op) {
      return true;
    }
    self.nodes.values().any(|n| match n {
      Node::Block(b) => b.contains_op(op),
      Node::Prim(_) => false,
    })
  }

  /// Members with no inputs or with at least one input produced outside the
  /// block.
  pub fn source_ops(&self, tensors: &TensorMap) -> BTreeSet<String> {
    let mut sources = BTreeSet::new();
    for node in self.nodes.values() {
      let inputs = node.as_graph_node().node_inputs(tensors);
      let external = inputs.is_empty()
        || inputs.iter().any(|t| {
          tensors
            .get(t)
            .map_or(false, |t| !self.contains_op(t.producer()))
        });
      if external {
        sources.insert(node.name().to_string());
      }
    }
    sources
  }

  /// Members with a terminal output or with at least one output consumed
  /// outside the block.
  pub fn sink_ops(&self, tensors: &TensorMap) -> BTreeSet<String> {
    let mut sinks = BTreeSet::new();
    for node in self.nodes.values() {
      let outputs = node.as_graph_node().node_outputs(tensors);
      let escapes = outputs.iter().any(|t| {
        tensors.get(t).map_or(false, |t| {
          !t.has_consumers() || t.consumers().any(|c| !self.contains_op(c))
        })
      });
      if escapes {
        sinks.insert(node.name().to_string());
      }
    }
    sinks
  }
}

impl GraphNode for ControlBlockOp {
  fn node_name(&self) -> &str {
    &self.name
  }

  /// Exactly the tensors crossing the boundary inward: consumed by a member,
  /// produced by a non-member.
  fn node_inputs(&self, tensors: &TensorMap) -> Vec<String> {
    let mut inputs = BTreeSet::new();
    for source in self.source_ops(tensors) {
      let node = match self.nodes.get(&source) {
        Some(n) => n,
        None => continue,
      };
      for t in node.as_graph_node().node_inputs(tensors) {
        let external = tensors
          .get(&t)
          .map_or(false, |t| !self.contains_op(t.producer()));
        if external {
          inputs.insert(t);
        }
      }
    }
    inputs.into_iter().collect()
  }

  /// Exactly the tensors crossing the boundary outward: produced by a
  /// member, consumed by at least one non-member.
  fn node_outputs(&self, tensors: &TensorMap) -> Vec<String> {
    let mut outputs = BTreeSet::new();
    for sink in self.sink_ops(tensors) {
      let node = match self.nodes.get(&sink) {
        Some(n) => n,
        None => continue,
      };
      for t in node.as_graph_node().node_outputs(tensors) {
        let escapes = tensors
          .get(&t)
          .map_or(false, |t| t.consumers().any(|c| !self.contains_op(c)));
        if escapes {
          outputs.insert(t);
        }
      }
    }
    outputs.into_iter().collect()
  }

  /// Shape propagation runs over the flattened op set, so there is nothing
  /// left for the block itself to do.
  fn propagate_shapes(&self, _tensors: &mut TensorMap) -> Result<(), Error> {
    Ok(())
  }

  /// Aggregate member cost under a fresh symbolic iteration count scoped to
  /// this block's name. Only loop regions have that repetition semantics;
  /// anything else rooted here is not modeled yet.
  fn calc_alg_flops(&self, tensors: &TensorMap) -> Result<Expr, Error> {
    match self.nodes.get(&self.root) {
      Some(Node::Prim(op)) if op.kind == OpKind::LoopCondition => {}
      Some(_) => {
        return Err(Error::unsupported(
          &self.name,
          format!("block root {} is not a loop condition", self.root),
        ));
      }
      None => {
        return Err(Error::structural(
          &self.name,
          format!("block root {} missing from members", self.root),
        ));
      }
    }
    let iters = Expr::symbol(format!("{}::iters", self.name));
    Ok(iters * self.total_alg_flops(tensors)?)
  }
}

impl OpContainer for ControlBlockOp {
  fn add_node(&mut self, node: Node) -> Result<(), Error> {
    if self.nodes.contains_key(node.name()) {
      return Err(Error::structural(node.name(), "duplicate op name in block"));
    }
    self.nodes.insert(node.name().to_string(), node);
    Ok(())
  }

  fn node(&self, name: &str) -> Result<&Node, Error> {
    self
      .nodes
      .get(name)
      .ok_or_else(|| Error::structural(name, format!("no such op in block {}", self.name)))
  }

  fn total_alg_flops(&self, tensors: &TensorMap) -> Result<Expr, Error> {
    let mut total = Expr::zero();
    for node in self.nodes.values() {
      total += node.as_graph_node().calc_alg_flops(tensors)?;
    }
    Ok(total)
  }
}
