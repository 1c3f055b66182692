///
/// Control-flow region recovery. Imported graphs encode loops as a dataflow
/// pattern of gating ops (Enter/Exit, Switch/Merge, NextIteration) fanned
/// out from a loop-condition op; this pass walks the wired graph to find
/// every op belonging to such a cluster and contracts the cluster into a
/// single [ControlBlockOp] at the top level.
///
/// Any invariant violation aborts the import: a half-recovered region would
/// silently corrupt every downstream cost and shape figure.
///
use std::collections::{BTreeSet, VecDeque};

use itertools::Itertools;
use tracing::{debug, info, instrument};

use crate::graph::{ControlBlockOp, Graph, Node, OpContainer};
use crate::ops::{Op, OpKind};
use crate::Error;

/// Discover and contract every control region reachable from a top-level
/// control op. Returns how many regions were extracted; running the pass on
/// its own output finds nothing new, since extracted blocks are not control
/// ops.
#[instrument(skip(graph))]
pub fn recover_control_blocks(graph: &mut Graph) -> Result<usize, Error> {
  let control_ops: Vec<String> = graph
    .nodes
    .values()
    .filter(|n| n.as_graph_node().is_control_op())
    .map(|n| n.name().to_string())
    .sorted()
    .collect();

  let mut recovered = 0;
  for root in control_ops {
    let members = collect_region(graph, &root)?;
    debug!(root = %root, members = members.len(), "control region found");

    let block_name = format!("{}_block", root);
    let mut moved = Vec::with_capacity(members.len());
    for name in &members {
      let node = graph
        .nodes
        .remove(name)
        .ok_or_else(|| Error::structural(name, "region member is not a top-level op"))?;
      moved.push(node);
    }
    let block = ControlBlockOp::new(&block_name, &root, moved)?;
    graph.add_node(Node::Block(block))?;
    recovered += 1;
  }
  if recovered > 0 {
    info!(recovered, "control regions extracted");
  }
  Ok(recovered)
}

fn prim<'a>(graph: &'a Graph, name: &str) -> Result<&'a Op, Error> {
  match graph.op_by_name(name)? {
    Node::Prim(op) => Ok(op),
    Node::Block(_) => Err(Error::unsupported(
      name,
      "walked into an already-extracted control block; nested control flow is not supported",
    )),
  }
}

/// Both traversal phases for one control op, returning the member set.
fn collect_region(graph: &Graph, root: &str) -> Result<BTreeSet<String>, Error> {
  let mut visited: BTreeSet<String> = BTreeSet::new();
  visited.insert(root.to_string());

  // every direct consumer of the control op's outputs must be a switch; the
  // switches and (later) the merges seed both walks
  let mut gates: Vec<String> = Vec::new();
  let root_op = prim(graph, root)?;
  for out in root_op.outputs() {
    for consumer in graph.tensor(out)?.consumers() {
      if prim(graph, consumer)?.kind != OpKind::Switch {
        return Err(Error::structural(
          consumer,
          format!("consumer of control op {} output is not a switch", root),
        ));
      }
      gates.push(consumer.to_string());
    }
  }

  // backward phase: walk producer edges from the switches. Enter and
  // NextIteration ops join the region but their far side belongs to an
  // enclosing scope, so expansion stops there. Merges are where the loop
  // body rejoins the condition path; queue them as forward seeds.
  let mut backward: VecDeque<String> = gates.iter().cloned().collect();
  while let Some(name) = backward.pop_front() {
    if visited.contains(&name) {
      continue;
    }
    let op = prim(graph, &name)?;
    if op.is_control_op() {
      return Err(Error::unsupported(
        &name,
        format!(
          "control op upstream of {}; nested control flow is not supported",
          root
        ),
      ));
    }
    visited.insert(name.clone());
    if matches!(op.kind, OpKind::Enter | OpKind::NextIteration) {
      continue;
    }
    if op.kind == OpKind::Merge {
      gates.push(name.clone());
    }
    for input in op.inputs() {
      backward.push_back(graph.tensor(input)?.producer().to_string());
    }
  }

  // forward phase: walk consumer edges from the gates down through the loop
  // body. Exits join the region but gate its boundary, so expansion stops
  // there.
  let mut forward: VecDeque<String> = VecDeque::new();
  for name in &gates {
    for out in prim(graph, name)?.outputs() {
      for consumer in graph.tensor(out)?.consumers() {
        forward.push_back(consumer.to_string());
      }
    }
  }
  while let Some(name) = forward.pop_front() {
    if visited.contains(&name) {
      continue;
    }
    let op = prim(graph, &name)?;
    if op.is_control_op() {
      return Err(Error::unsupported(
        &name,
        format!(
          "control op in the body of {}; nested control flow is not supported",
          root
        ),
      ));
    }
    visited.insert(name.clone());
    if op.kind == OpKind::Exit {
      continue;
    }
    for out in op.outputs() {
      for consumer in graph.tensor(out)?.consumers() {
        forward.push_back(consumer.to_string());
      }
    }
  }

  Ok(visited)
}

#[cfg(test)]
mod tests {
  use super::recover_control_blocks;
  use crate::graph::{GraphNode, Node};
  use crate::symbolic::Expr;
  use crate::tensor::{DataType, Tensor, TensorShape};
  use crate::{ControlBlockOp, Error, Graph, Op, OpKind};

  fn add(g: &mut Graph, name: &str, kind: OpKind, outputs: &[(&str, TensorShape)]) {
    let tensors = outputs
      .iter()
      .map(|(n, s)| Tensor::new(*n, s.clone(), DataType::Float32))
      .collect();
    g.add_op(Op::new(name, kind), tensors).unwrap();
  }

  fn wire(g: &mut Graph, op: &str, tensors: &[&str]) {
    for t in tensors {
      g.add_input_to_op(op, t).unwrap();
    }
  }

  /// The five-op loop skeleton: enter -> merge -> loop condition -> switch,
  /// with the switch's taken branch looping back through a next-iteration
  /// op into the merge.
  fn minimal_loop() -> Graph {
    let mut g = Graph::new();
    add(&mut g, "init", OpKind::Placeholder, &[("init_out", TensorShape::scalar())]);
    add(&mut g, "e", OpKind::Enter, &[("e_out", TensorShape::scalar())]);
    add(
      &mut g,
      "m",
      OpKind::Merge,
      &[("m_out", TensorShape::scalar()), ("m_idx", TensorShape::scalar())],
    );
    add(&mut g, "lc", OpKind::LoopCondition, &[("lc_out", TensorShape::scalar())]);
    add(
      &mut g,
      "s",
      OpKind::Switch,
      &[("s_true", TensorShape::scalar()), ("s_false", TensorShape::scalar())],
    );
    add(&mut g, "ni", OpKind::NextIteration, &[("ni_out", TensorShape::scalar())]);
    wire(&mut g, "e", &["init_out"]);
    wire(&mut g, "m", &["e_out", "ni_out"]);
    wire(&mut g, "lc", &["m_out"]);
    wire(&mut g, "s", &["m_out", "lc_out"]);
    wire(&mut g, "ni", &["s_true"]);
    g
  }

  /// The skeleton plus a body op on the taken branch and an exit with a
  /// downstream consumer outside the loop.
  fn loop_with_body() -> Graph {
    let mut g = Graph::new();
    add(&mut g, "init", OpKind::Placeholder, &[("init_out", TensorShape::scalar())]);
    add(&mut g, "e", OpKind::Enter, &[("e_out", TensorShape::scalar())]);
    add(
      &mut g,
      "m",
      OpKind::Merge,
      &[("m_out", TensorShape::scalar()), ("m_idx", TensorShape::scalar())],
    );
    add(&mut g, "lc", OpKind::LoopCondition, &[("lc_out", TensorShape::scalar())]);
    add(
      &mut g,
      "s",
      OpKind::Switch,
      &[("s_true", TensorShape::scalar()), ("s_false", TensorShape::scalar())],
    );
    add(&mut g, "body", OpKind::Pointwise, &[("body_out", TensorShape::known(&[10]))]);
    add(&mut g, "ni", OpKind::NextIteration, &[("ni_out", TensorShape::scalar())]);
    add(&mut g, "ex", OpKind::Exit, &[("ex_out", TensorShape::scalar())]);
    add(&mut g, "after", OpKind::Identity, &[("after_out", TensorShape::scalar())]);
    wire(&mut g, "e", &["init_out"]);
    wire(&mut g, "m", &["e_out", "ni_out"]);
    wire(&mut g, "lc", &["m_out"]);
    wire(&mut g, "s", &["m_out", "lc_out"]);
    wire(&mut g, "body", &["s_true"]);
    wire(&mut g, "ni", &["body_out"]);
    wire(&mut g, "ex", &["s_false"]);
    wire(&mut g, "after", &["ex_out"]);
    g
  }

  #[test]
  fn recovers_exactly_the_gating_cluster() {
    let mut g = minimal_loop();
    assert_eq!(recover_control_blocks(&mut g).unwrap(), 1);

    let block = match g.op_by_name("lc_block").unwrap() {
      Node::Block(b) => b,
      other => panic!("expected a block, got {:?}", other),
    };
    assert_eq!(block.root(), "lc");
    let mut members: Vec<&str> = block.member_names().collect();
    members.sort();
    assert_eq!(members, vec!["e", "lc", "m", "ni", "s"]);
    // the placeholder stayed outside
    assert!(matches!(g.op_by_name("init").unwrap(), Node::Prim(_)));
  }

  #[test]
  fn recovery_is_idempotent_on_its_own_output() {
    let mut g = loop_with_body();
    assert_eq!(recover_control_blocks(&mut g).unwrap(), 1);
    assert_eq!(recover_control_blocks(&mut g).unwrap(), 0);
    assert!(g.op_by_name("lc_block").is_ok());
  }

  #[test]
  fn block_boundary_holds() {
    let mut g = loop_with_body();
    recover_control_blocks(&mut g).unwrap();
    let block = match g.op_by_name("lc_block").unwrap() {
      Node::Block(b) => b,
      _ => unreachable!(),
    };
    // inward: only the tensor produced outside and consumed by a member
    assert_eq!(block.node_inputs(g.tensors()), vec!["init_out"]);
    // outward: only the tensor consumed outside; terminal (m_idx) and
    // wholly-internal tensors stay out of both lists
    assert_eq!(block.node_outputs(g.tensors()), vec!["ex_out"]);
    let sources = block.source_ops(g.tensors());
    assert!(sources.contains("e"));
    let sinks = block.sink_ops(g.tensors());
    assert!(sinks.contains("ex"));
    assert!(sinks.contains("m"), "terminal m_idx makes the merge a sink");
  }

  #[test]
  fn block_cost_is_iterations_times_member_cost() {
    let mut g = loop_with_body();
    recover_control_blocks(&mut g).unwrap();
    // only the body op costs anything: 10 elements, 1 flop each
    let expected = Expr::symbol("lc_block::iters") * Expr::from(10);
    assert_eq!(g.calc_alg_flops().unwrap(), expected);
  }

  #[test]
  fn non_switch_consumer_of_a_control_op_is_fatal() {
    let mut g = Graph::new();
    add(&mut g, "src", OpKind::Placeholder, &[("src_out", TensorShape::scalar())]);
    add(&mut g, "lc", OpKind::LoopCondition, &[("lc_out", TensorShape::scalar())]);
    add(&mut g, "odd", OpKind::Identity, &[("odd_out", TensorShape::scalar())]);
    wire(&mut g, "lc", &["src_out"]);
    wire(&mut g, "odd", &["lc_out"]);
    let err = recover_control_blocks(&mut g).unwrap_err();
    match err {
      Error::Structural { subject, .. } => assert_eq!(subject, "odd"),
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn nested_control_op_in_the_body_is_unsupported() {
    let mut g = minimal_loop();
    // a second loop condition fed from inside the first loop's body
    add(&mut g, "lc2", OpKind::LoopCondition, &[("lc2_out", TensorShape::scalar())]);
    add(
      &mut g,
      "s2",
      OpKind::Switch,
      &[("s2_true", TensorShape::scalar()), ("s2_false", TensorShape::scalar())],
    );
    wire(&mut g, "lc2", &["s_true"]);
    wire(&mut g, "s2", &["s_true", "lc2_out"]);
    let err = recover_control_blocks(&mut g).unwrap_err();
    assert!(matches!(err, Error::Unsupported { .. }));
  }

  #[test]
  fn conditional_only_block_cost_is_unsupported() {
    let mut g = Graph::new();
    add(&mut g, "v", OpKind::Placeholder, &[("v_out", TensorShape::scalar())]);
    add(&mut g, "pred", OpKind::Placeholder, &[("pred_out", TensorShape::scalar())]);
    add(
      &mut g,
      "sw",
      OpKind::Switch,
      &[("sw_true", TensorShape::scalar()), ("sw_false", TensorShape::scalar())],
    );
    wire(&mut g, "sw", &["v_out", "pred_out"]);
    let sw = match g.op_by_name("sw").unwrap() {
      Node::Prim(op) => op.clone(),
      _ => unreachable!(),
    };
    let block = ControlBlockOp::new("cond_block", "sw", vec![Node::Prim(sw)]).unwrap();
    let err = block.calc_alg_flops(g.tensors()).unwrap_err();
    assert!(matches!(err, Error::Unsupported { .. }));
  }
}
