///
/// The graph container: a single arena owning every tensor by name, plus the
/// top-level nodes. Producer/consumer links are plain names into the arena,
/// so the op->tensor->op cycles carry no ownership. Recovered control-flow
/// regions appear here as [ControlBlockOp] nodes that replaced their member
/// ops at the top level.
///
pub mod block;
pub mod recover;

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use itertools::Itertools;
use tracing::{debug, instrument};

pub use block::ControlBlockOp;
pub use recover::recover_control_blocks;

use crate::ops::Op;
use crate::symbolic::Expr;
use crate::tensor::{Tensor, TensorMap};
use crate::Error;

/// What a graph node looks like from the outside, whether it is a plain op
/// or a whole recovered region.
pub trait GraphNode {
  fn node_name(&self) -> &str;
  fn is_control_op(&self) -> bool {
    false
  }
  /// Tensor names read by this node from outside itself.
  fn node_inputs(&self, tensors: &TensorMap) -> Vec<String>;
  /// Tensor names this node makes visible to the outside.
  fn node_outputs(&self, tensors: &TensorMap) -> Vec<String>;
  fn propagate_shapes(&self, tensors: &mut TensorMap) -> Result<(), Error>;
  fn calc_alg_flops(&self, tensors: &TensorMap) -> Result<Expr, Error>;
}

/// What a graph looks like from the inside: a named collection of nodes with
/// an aggregate cost.
pub trait OpContainer {
  fn add_node(&mut self, node: Node) -> Result<(), Error>;
  fn node(&self, name: &str) -> Result<&Node, Error>;
  /// Plain sum of the held nodes' costs; repetition multipliers are applied
  /// by the nodes themselves (see [ControlBlockOp::calc_alg_flops]), never
  /// here, so they can only be applied once.
  fn total_alg_flops(&self, tensors: &TensorMap) -> Result<Expr, Error>;
}

impl GraphNode for Op {
  fn node_name(&self) -> &str {
    self.name()
  }

  fn is_control_op(&self) -> bool {
    Op::is_control_op(self)
  }

  fn node_inputs(&self, _tensors: &TensorMap) -> Vec<String> {
    self.inputs().to_vec()
  }

  fn node_outputs(&self, _tensors: &TensorMap) -> Vec<String> {
    self.outputs().to_vec()
  }

  fn propagate_shapes(&self, tensors: &mut TensorMap) -> Result<(), Error> {
    Op::propagate_shapes(self, tensors)
  }

  fn calc_alg_flops(&self, tensors: &TensorMap) -> Result<Expr, Error> {
    Op::calc_alg_flops(self, tensors)
  }
}

#[derive(Debug, Clone)]
pub enum Node {
  Prim(Op),
  Block(ControlBlockOp),
}

impl Node {
  pub fn name(&self) -> &str {
    match self {
      Node::Prim(op) => op.name(),
      Node::Block(b) => b.name(),
    }
  }

  pub fn as_graph_node(&self) -> &dyn GraphNode {
    match self {
      Node::Prim(op) => op,
      Node::Block(b) => b,
    }
  }

  pub fn as_prim(&self) -> Option<&Op> {
    match self {
      Node::Prim(op) => Some(op),
      Node::Block(_) => None,
    }
  }
}

#[derive(Debug, Default)]
pub struct Graph {
  // invariant: node names unique; member ops of blocks are not in this map
  pub(crate) nodes: HashMap<String, Node>,
  pub(crate) tensors: TensorMap,
}

impl Graph {
  pub fn new() -> Self {
    Graph::default()
  }

  /// Register an op together with the tensors it produces. Name collisions
  /// on either the op or a tensor are structural errors.
  pub fn add_op(&mut self, mut op: Op, outputs: Vec<Tensor>) -> Result<(), Error> {
    if self.nodes.contains_key(op.name()) {
      return Err(Error::structural(op.name(), "duplicate op name"));
    }
    for mut tensor in outputs {
      if self.tensors.contains_key(tensor.name()) {
        return Err(Error::structural(tensor.name(), "duplicate tensor name"));
      }
      tensor.set_producer(op.name());
      op.outputs.push(tensor.name().to_string());
      self.tensors.insert(tensor.name().to_string(), tensor);
    }
    self.nodes.insert(op.name().to_string(), Node::Prim(op));
    Ok(())
  }

  /// Declare `tensor` as consumed by `op`: the op gains an input, the
  /// tensor gains a consumer. The tensor must already be registered as some
  /// op's output.
  pub fn add_input_to_op(&mut self, op: &str, tensor: &str) -> Result<(), Error> {
    if !self.tensors.contains_key(tensor) {
      return Err(Error::structural(
        tensor,
        format!("unknown input tensor wired to op {}", op),
      ));
    }
    match self.nodes.get_mut(op) {
      Some(Node::Prim(o)) => o.inputs.push(tensor.to_string()),
      Some(Node::Block(_)) => {
        return Err(Error::structural(op, "cannot wire inputs into a control block"));
      }
      None => return Err(Error::structural(op, "unknown op")),
    }
    if let Some(t) = self.tensors.get_mut(tensor) {
      t.add_consumer(op);
    }
    Ok(())
  }

  /// Exact-name lookup; internal wiring only ever references names that
  /// were previously created, so a miss is a hard error.
  pub fn op_by_name(&self, name: &str) -> Result<&Node, Error> {
    self
      .nodes
      .get(name)
      .ok_or_else(|| Error::structural(name, "no op with this name"))
  }

  pub fn tensor(&self, name: &str) -> Result<&Tensor, Error> {
    self
      .tensors
      .get(name)
      .ok_or_else(|| Error::structural(name, "no tensor with this name"))
  }

  pub fn nodes(&self) -> impl Iterator<Item = &Node> {
    self.nodes.values()
  }

  pub fn tensors(&self) -> &TensorMap {
    &self.tensors
  }

  /// All primitive ops, recursing through control blocks. Shape propagation
  /// is defined over this flattened set, so regions never re-derive shapes.
  pub fn flat_ops(&self) -> Vec<&Op> {
    let mut out = Vec::new();
    collect_prims(self.nodes.values(), &mut out);
    out
  }

  /// Worklist shape propagation in dataflow-readiness order. Merge ops
  /// unblock on their first ready input, which is what lets the pass cross
  /// loop back-edges. A pass that stops making progress before the worklist
  /// empties means the wiring is malformed.
  #[instrument(skip(self))]
  pub fn propagate_shapes(&mut self) -> Result<(), Error> {
    let Graph { nodes, tensors } = self;
    let mut remaining: Vec<&Op> = Vec::new();
    collect_prims(nodes.values(), &mut remaining);
    remaining.sort_by(|a, b| a.name().cmp(b.name()));

    let mut visited: HashSet<String> = HashSet::new();
    while !remaining.is_empty() {
      let mut next = Vec::new();
      let mut progressed = false;
      for op in remaining {
        if op.can_visit(&visited, tensors) {
          debug!(op = op.name(), "propagating shapes");
          op.propagate_shapes(tensors)?;
          visited.insert(op.name().to_string());
          progressed = true;
        } else {
          next.push(op);
        }
      }
      if !progressed {
        let stuck = next.iter().map(|o| o.name()).sorted().join(", ");
        return Err(Error::structural(
          "graph",
          format!("shape propagation cannot reach: {}", stuck),
        ));
      }
      remaining = next;
    }
    Ok(())
  }

  /// Aggregate algorithmic flops over the whole graph. Control blocks weigh
  /// in through their own cost rule, i.e. multiplied by their symbolic
  /// iteration count.
  pub fn calc_alg_flops(&self) -> Result<Expr, Error> {
    self.total_alg_flops(&self.tensors)
  }

  /// Debugging export of the wired graph (flattened) as graphviz dot.
  pub fn save_graphviz(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    use petgraph::dot::Dot;
    let mut g: petgraph::Graph<String, String> = petgraph::Graph::new();
    let mut index = HashMap::new();
    for op in self.flat_ops() {
      index.insert(
        op.name().to_string(),
        g.add_node(format!("{} ({:?})", op.name(), op.kind)),
      );
    }
    for tensor in self.tensors.values() {
      let producer = match index.get(tensor.producer()) {
        Some(p) => *p,
        None => continue,
      };
      for consumer in tensor.consumers() {
        if let Some(c) = index.get(consumer) {
          g.add_edge(producer, *c, tensor.name().to_string());
        }
      }
    }
    let dot = Dot::with_config(&g, &[]);
    let mut file = File::create(path)?;
    write!(file, "{:?}", dot)?;
    Ok(())
  }
}

fn collect_prims<'a>(nodes: impl Iterator<Item = &'a Node>, out: &mut Vec<&'a Op>) {
  for node in nodes {
    match node {
      Node::Prim(op) => out.push(op),
      Node::Block(b) => collect_prims(b.members(), out),
    }
  }
}

impl OpContainer for Graph {
  fn add_node(&mut self, node: Node) -> Result<(), Error> {
    if self.nodes.contains_key(node.name()) {
      return Err(Error::structural(node.name(), "duplicate op name"));
    }
    self.nodes.insert(node.name().to_string(), node);
    Ok(())
  }

  fn node(&self, name: &str) -> Result<&Node, Error> {
    self.op_by_name(name)
  }

  fn total_alg_flops(&self, tensors: &TensorMap) -> Result<Expr, Error> {
    let mut total = Expr::zero();
    for node in self.nodes.values() {
      total += node.as_graph_node().calc_alg_flops(tensors)?;
    }
    Ok(total)
  }
}

#[cfg(test)]
mod tests {
  use crate::api;
  use crate::tensor::TensorShape;
  use crate::{Error, Graph, Op, OpKind, Tensor};
  use crate::tensor::DataType;

  #[test]
  fn duplicate_op_names_are_rejected() {
    let mut g = Graph::new();
    api::placeholder(&mut g, "x", TensorShape::known(&[2])).unwrap();
    let err = api::placeholder(&mut g, "x", TensorShape::known(&[2])).unwrap_err();
    assert!(matches!(err, Error::Structural { .. }));
  }

  #[test]
  fn wiring_an_unregistered_tensor_is_structural() {
    let mut g = Graph::new();
    api::placeholder(&mut g, "x", TensorShape::known(&[2])).unwrap();
    let err = g.add_input_to_op("x", "nope").unwrap_err();
    match err {
      Error::Structural { subject, .. } => assert_eq!(subject, "nope"),
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn lookup_by_missing_name_is_structural() {
    let g = Graph::new();
    assert!(matches!(
      g.op_by_name("ghost"),
      Err(Error::Structural { .. })
    ));
  }

  #[test]
  fn end_to_end_matmul_cost() {
    let mut g = Graph::new();
    let x = api::placeholder(&mut g, "x", TensorShape::known(&[10, 10])).unwrap();
    let w = api::variable(&mut g, "w", TensorShape::known(&[10, 10])).unwrap();
    api::matmul(&mut g, "y", TensorShape::unknown_rank(), &x, &w).unwrap();
    g.propagate_shapes().unwrap();
    assert_eq!(g.tensor("y").unwrap().shape, TensorShape::known(&[10, 10]));
    // documented convention: one multiply-add = 2 flops
    assert_eq!(g.calc_alg_flops().unwrap().as_constant(), Some(2000));
  }

  #[test]
  fn propagation_reports_unreachable_ops() {
    let mut g = Graph::new();
    // two ops consuming each other's outputs without a merge never become
    // visitable
    g.add_op(
      Op::new("a", OpKind::Identity),
      vec![Tensor::new("a_out", TensorShape::known(&[1]), DataType::Float32)],
    )
    .unwrap();
    g.add_op(
      Op::new("b", OpKind::Identity),
      vec![Tensor::new("b_out", TensorShape::known(&[1]), DataType::Float32)],
    )
    .unwrap();
    g.add_input_to_op("a", "b_out").unwrap();
    g.add_input_to_op("b", "a_out").unwrap();
    let err = g.propagate_shapes().unwrap_err();
    match err {
      Error::Structural { reason, .. } => {
        assert!(reason.contains("a") && reason.contains("b"));
      }
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn graphviz_smoke() {
    let dir = std::env::temp_dir().join("graphcost_dot_test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("g.dot");
    let mut g = Graph::new();
    let x = api::placeholder(&mut g, "x", TensorShape::known(&[2])).unwrap();
    api::pointwise(&mut g, "relu", TensorShape::unknown_rank(), &x, None).unwrap();
    g.save_graphviz(&path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("digraph"));
    assert!(text.contains("relu"));
  }
}
