///
/// The op vocabulary. One struct, one closed kind enum, and a single
/// dispatch point per contract method: shape propagation, algorithmic flop
/// cost, control-op marking and dataflow readiness. The kind set is fixed by
/// the adapter's registry, so a tagged enum beats open subclassing here.
///
use std::collections::HashSet;

use crate::symbolic::Expr;
use crate::tensor::{Tensor, TensorMap, TensorShape};
use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
  // sources
  Constant,
  Variable,
  Placeholder,
  // math
  Pointwise,
  MatMul,
  Reduce { axes: Option<Vec<usize>> },
  Concat,
  Split { num_splits: usize, axis: Option<usize> },
  // plumbing
  Identity,
  NoOp,
  // dynamic control flow gates
  Enter,
  Exit,
  LoopCondition,
  Merge,
  NextIteration,
  Switch,
  // adapter fallback for unrecognized kinds
  Unknown,
}

#[derive(Debug, Clone)]
pub struct Op {
  name: String,
  pub kind: OpKind,
  pub(crate) inputs: Vec<String>,
  pub(crate) outputs: Vec<String>,
}

impl Op {
  pub fn new(name: impl Into<String>, kind: OpKind) -> Self {
    Op {
      name: name.into(),
      kind,
      inputs: Vec::new(),
      outputs: Vec::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn inputs(&self) -> &[String] {
    &self.inputs
  }

  pub fn outputs(&self) -> &[String] {
    &self.outputs
  }

  /// Loop-condition ops are the canonical root markers of dynamic control
  /// regions; everything else is plain dataflow.
  pub fn is_control_op(&self) -> bool {
    self.kind == OpKind::LoopCondition
  }

  /// Dataflow readiness given already-visited producer ops. The default
  /// requires every input's producer; Merge joins on first-ready, which is
  /// what lets traversal enter a loop body without waiting for the
  /// looped-back value.
  pub fn can_visit(&self, visited: &HashSet<String>, tensors: &TensorMap) -> bool {
    let producer_visited = |t: &String| {
      tensors
        .get(t)
        .map_or(false, |t| visited.contains(t.producer()))
    };
    match self.kind {
      OpKind::Merge => self.inputs.iter().any(producer_visited),
      _ => self.inputs.iter().all(producer_visited),
    }
  }

  fn arity(&self, inputs: usize, outputs: usize) -> Result<(), Error> {
    if self.inputs.len() != inputs || self.outputs.len() != outputs {
      return Err(Error::structural(
        &self.name,
        format!(
          "expected {} inputs / {} outputs, found {} / {}",
          inputs,
          outputs,
          self.inputs.len(),
          self.outputs.len()
        ),
      ));
    }
    Ok(())
  }

  fn in_tensor<'a>(&self, i: usize, tensors: &'a TensorMap) -> Result<&'a Tensor, Error> {
    let name = self
      .inputs
      .get(i)
      .ok_or_else(|| Error::structural(&self.name, format!("missing input {}", i)))?;
    tensors
      .get(name)
      .ok_or_else(|| Error::structural(name, "input tensor not registered"))
  }

  fn out_tensor<'a>(&self, i: usize, tensors: &'a TensorMap) -> Result<&'a Tensor, Error> {
    let name = self
      .outputs
      .get(i)
      .ok_or_else(|| Error::structural(&self.name, format!("missing output {}", i)))?;
    tensors
      .get(name)
      .ok_or_else(|| Error::structural(name, "output tensor not registered"))
  }

  fn known_in_shape(&self, i: usize, tensors: &TensorMap) -> Result<TensorShape, Error> {
    let t = self.in_tensor(i, tensors)?;
    if t.shape.is_unknown() {
      return Err(Error::shape(
        &self.name,
        format!("unknown input shape on tensor {}", t.name()),
      ));
    }
    Ok(t.shape.clone())
  }

  fn merge_into_output(
    &self,
    i: usize,
    shape: &TensorShape,
    tensors: &mut TensorMap,
  ) -> Result<(), Error> {
    let name = self
      .outputs
      .get(i)
      .ok_or_else(|| Error::structural(&self.name, format!("missing output {}", i)))?
      .clone();
    let out = tensors
      .get_mut(&name)
      .ok_or_else(|| Error::structural(&name, "output tensor not registered"))?;
    if !out.shape.compatible_with(shape) {
      return Err(Error::shape(
        &self.name,
        format!(
          "inferred shape {} conflicts with output {} shape {}",
          shape, name, out.shape
        ),
      ));
    }
    out
      .shape
      .merge_shape(shape)
      .map_err(|c| Error::shape(&self.name, format!("output {}: {}", name, c)))
  }

  fn passthrough(&self, tensors: &mut TensorMap) -> Result<(), Error> {
    self.arity(1, 1)?;
    let shape = self.known_in_shape(0, tensors)?;
    self.merge_into_output(0, &shape, tensors)
  }

  /// Fill unknown output dimensions from the known input shapes; loud on
  /// arity mismatch and on any shape needed for inference being unknown.
  pub fn propagate_shapes(&self, tensors: &mut TensorMap) -> Result<(), Error> {
    match &self.kind {
      OpKind::Constant | OpKind::Variable | OpKind::Placeholder | OpKind::NoOp => Ok(()),
      OpKind::Identity | OpKind::Enter | OpKind::Exit | OpKind::NextIteration => {
        self.passthrough(tensors)
      }
      OpKind::LoopCondition => self.propagate_loop_condition(tensors),
      OpKind::Switch => self.propagate_switch(tensors),
      OpKind::Merge => self.propagate_merge(tensors),
      OpKind::Pointwise => self.propagate_pointwise(tensors),
      OpKind::MatMul => self.propagate_matmul(tensors),
      OpKind::Concat => self.propagate_concat(tensors),
      OpKind::Split { num_splits, axis } => self.propagate_split(*num_splits, *axis, tensors),
      OpKind::Reduce { axes } => self.propagate_reduce(axes.clone(), tensors),
      OpKind::Unknown => self.propagate_unknown(tensors),
    }
  }

  fn propagate_loop_condition(&self, tensors: &mut TensorMap) -> Result<(), Error> {
    if self.inputs.len() != 1 || self.outputs.is_empty() {
      return Err(Error::structural(
        &self.name,
        "loop condition takes one input and at least one output",
      ));
    }
    let cond = self.in_tensor(0, tensors)?;
    if cond.shape.known_num_elements() != Some(1) {
      return Err(Error::shape(
        &self.name,
        format!("loop condition input {} is not scalar", cond.name()),
      ));
    }
    for i in 0..self.outputs.len() {
      let out = self.out_tensor(i, tensors)?;
      if out.shape.known_num_elements() != Some(1) {
        return Err(Error::shape(
          &self.name,
          format!("loop condition output {} is not scalar", out.name()),
        ));
      }
    }
    Ok(())
  }

  fn propagate_switch(&self, tensors: &mut TensorMap) -> Result<(), Error> {
    self.arity(2, 2)?;
    let selector = self.in_tensor(1, tensors)?;
    if !selector.shape.is_scalar() {
      return Err(Error::shape(
        &self.name,
        format!("switch selector {} must be scalar", selector.name()),
      ));
    }
    // both outputs carry the value shape; the op only gates dataflow
    let value = self.known_in_shape(0, tensors)?;
    self.merge_into_output(0, &value, tensors)?;
    self.merge_into_output(1, &value, tensors)
  }

  fn propagate_merge(&self, tensors: &mut TensorMap) -> Result<(), Error> {
    if self.inputs.is_empty() || self.outputs.len() != 2 {
      return Err(Error::structural(
        &self.name,
        "merge takes at least one input and exactly two outputs",
      ));
    }
    // any input can still be unknown mid-loop; pick one that is known and
    // require the rest to be broadcast-compatible with it
    let mut known: Option<TensorShape> = None;
    for i in 0..self.inputs.len() {
      let t = self.in_tensor(i, tensors)?;
      if t.shape.is_unknown() {
        continue;
      }
      match &known {
        Some(shape) => {
          if !t.shape.can_broadcast_together(shape) {
            return Err(Error::shape(
              &self.name,
              format!("merge input {} is not broadcast-compatible", t.name()),
            ));
          }
        }
        None => known = Some(t.shape.clone()),
      }
    }
    let shape = known.ok_or_else(|| Error::shape(&self.name, "no input with a known shape"))?;
    self.merge_into_output(0, &shape, tensors)
  }

  fn propagate_pointwise(&self, tensors: &mut TensorMap) -> Result<(), Error> {
    if !(1..=2).contains(&self.inputs.len()) || self.outputs.len() != 1 {
      return Err(Error::structural(
        &self.name,
        "pointwise ops take one or two inputs and one output",
      ));
    }
    let a = self.known_in_shape(0, tensors)?;
    let shape = if self.inputs.len() == 2 {
      let b = self.known_in_shape(1, tensors)?;
      if !a.can_broadcast_together(&b) {
        return Err(Error::shape(
          &self.name,
          format!("inputs {} and {} do not broadcast", a, b),
        ));
      }
      broadcast_shapes(&a, &b)
    } else {
      a
    };
    self.merge_into_output(0, &shape, tensors)
  }

  fn propagate_matmul(&self, tensors: &mut TensorMap) -> Result<(), Error> {
    self.arity(2, 1)?;
    let a = self.known_in_shape(0, tensors)?;
    let b = self.known_in_shape(1, tensors)?;
    let (a, b) = match (a.dims(), b.dims()) {
      (Some(a), Some(b)) if a.len() == 2 && b.len() == 2 => (a.to_vec(), b.to_vec()),
      _ => {
        return Err(Error::shape(
          &self.name,
          format!("matmul expects rank-2 inputs, found {} and {}", a, b),
        ));
      }
    };
    if a[1] != b[0] {
      return Err(Error::shape(
        &self.name,
        format!(
          "matmul inner dimensions disagree: {:?} vs {:?}",
          a[1], b[0]
        ),
      ));
    }
    self.merge_into_output(0, &TensorShape::new(vec![a[0], b[1]]), tensors)
  }

  fn propagate_concat(&self, tensors: &mut TensorMap) -> Result<(), Error> {
    if self.inputs.len() < 2 || self.outputs.len() != 1 {
      return Err(Error::structural(
        &self.name,
        "concat takes data inputs plus an axis input, and one output",
      ));
    }
    // the trailing input is the rank-0 axis tensor and must carry an
    // integer constant
    let axis_tensor = self.in_tensor(self.inputs.len() - 1, tensors)?;
    let axis = axis_tensor
      .value
      .as_ref()
      .and_then(|v| v.as_int())
      .ok_or_else(|| {
        Error::unsupported(
          &self.name,
          format!("concat axis {} is not an integer constant", axis_tensor.name()),
        )
      })?;
    let data = self.inputs.len() - 1;
    let first = self.in_tensor(0, tensors)?;
    let rank = first.shape.rank().ok_or_else(|| {
      Error::shape(&self.name, format!("unknown rank on input {}", first.name()))
    })?;
    let axis = if axis < 0 { axis + rank as i64 } else { axis };
    if axis < 0 || axis as usize >= rank {
      return Err(Error::shape(
        &self.name,
        format!("concat axis {} out of range for rank {}", axis, rank),
      ));
    }
    let axis = axis as usize;
    let mut dims: Vec<Option<u64>> = vec![None; rank];
    let mut axis_sum = Some(0u64);
    for i in 0..data {
      let t = self.in_tensor(i, tensors)?;
      let in_dims = match t.shape.dims() {
        Some(d) if d.len() == rank => d,
        _ => {
          return Err(Error::shape(
            &self.name,
            format!("concat input {} rank mismatch", t.name()),
          ));
        }
      };
      for (j, d) in in_dims.iter().enumerate() {
        if j == axis {
          axis_sum = match (axis_sum, d) {
            (Some(acc), Some(d)) => Some(acc + d),
            _ => None,
          };
        } else if let Some(d) = d {
          if let Some(prev) = dims[j] {
            if prev != *d {
              return Err(Error::shape(
                &self.name,
                format!("concat inputs disagree on dimension {}", j),
              ));
            }
          }
          dims[j] = Some(*d);
        }
      }
    }
    dims[axis] = axis_sum;
    self.merge_into_output(0, &TensorShape::new(dims), tensors)
  }

  fn propagate_split(
    &self,
    num_splits: usize,
    axis: Option<usize>,
    tensors: &mut TensorMap,
  ) -> Result<(), Error> {
    if self.inputs.len() != 1 || self.outputs.len() != num_splits {
      return Err(Error::structural(
        &self.name,
        format!("split expects 1 input and {} outputs", num_splits),
      ));
    }
    let axis = match axis {
      Some(axis) => axis,
      None => {
        // imported splits carry no axis attribute; accept pre-set output
        // shapes, anything else is not inferable
        for i in 0..num_splits {
          if self.out_tensor(i, tensors)?.shape.is_unknown() {
            return Err(Error::unsupported(
              &self.name,
              "split without a known axis and without preset output shapes",
            ));
          }
        }
        return Ok(());
      }
    };
    let shape = self.known_in_shape(0, tensors)?;
    let mut dims = match shape.dims() {
      Some(d) if axis < d.len() => d.to_vec(),
      _ => {
        return Err(Error::shape(
          &self.name,
          format!("split axis {} out of range for {}", axis, shape),
        ));
      }
    };
    let whole = match dims[axis] {
      Some(w) => w,
      None => {
        return Err(Error::shape(
          &self.name,
          format!("split axis {} dimension unknown", axis),
        ));
      }
    };
    if whole % num_splits as u64 != 0 {
      return Err(Error::shape(
        &self.name,
        format!("dimension {} does not split into {} parts", whole, num_splits),
      ));
    }
    dims[axis] = Some(whole / num_splits as u64);
    let part = TensorShape::new(dims);
    for i in 0..num_splits {
      self.merge_into_output(i, &part, tensors)?;
    }
    Ok(())
  }

  fn propagate_reduce(
    &self,
    axes: Option<Vec<usize>>,
    tensors: &mut TensorMap,
  ) -> Result<(), Error> {
    self.arity(1, 1)?;
    let axes = match axes {
      Some(axes) => axes,
      None => {
        if self.out_tensor(0, tensors)?.shape.is_unknown() {
          return Err(Error::shape(
            &self.name,
            "reduce axes unknown and output shape unset",
          ));
        }
        return Ok(());
      }
    };
    let t = self.in_tensor(0, tensors)?;
    let dims = match t.shape.dims() {
      Some(d) => d,
      None => {
        return Err(Error::shape(
          &self.name,
          format!("unknown rank on input {}", t.name()),
        ));
      }
    };
    if let Some(bad) = axes.iter().find(|a| **a >= dims.len()) {
      return Err(Error::shape(
        &self.name,
        format!("reduce axis {} out of range for {}", bad, t.shape),
      ));
    }
    let kept: Vec<Option<u64>> = dims
      .iter()
      .enumerate()
      .filter(|(i, _)| !axes.contains(i))
      .map(|(_, d)| *d)
      .collect();
    self.merge_into_output(0, &TensorShape::new(kept), tensors)
  }

  // the adapter's placeholder: forward a shape when it trivially can,
  // otherwise stay silent
  fn propagate_unknown(&self, tensors: &mut TensorMap) -> Result<(), Error> {
    if self.inputs.len() == 1 && self.outputs.len() == 1 {
      let shape = self.in_tensor(0, tensors)?.shape.clone();
      let out = self.out_tensor(0, tensors)?;
      if !shape.is_unknown() && out.shape.compatible_with(&shape) {
        return self.merge_into_output(0, &shape, tensors);
      }
    }
    Ok(())
  }

  /// Estimated arithmetic operation count, symbolic over unknown
  /// dimensions. Control gates, sources and data movement count zero; their
  /// cost belongs to the ops they feed. MatMul convention: one multiply-add
  /// counts as two flops, so [m,k]x[k,n] costs 2*m*k*n.
  pub fn calc_alg_flops(&self, tensors: &TensorMap) -> Result<Expr, Error> {
    match &self.kind {
      OpKind::Pointwise => Ok(self.out_tensor(0, tensors)?.num_elements()),
      OpKind::Reduce { .. } => Ok(self.in_tensor(0, tensors)?.num_elements()),
      OpKind::MatMul => {
        let a = self.in_tensor(0, tensors)?;
        let out = self.out_tensor(0, tensors)?;
        let k = a
          .shape
          .dim_expr(1, a.name())
          .unwrap_or_else(|| Expr::symbol(format!("{}::dim1", a.name())));
        Ok(Expr::from(2) * out.num_elements() * k)
      }
      _ => Ok(Expr::zero()),
    }
  }
}

/// Resulting dimensions of broadcasting two fully-known shapes.
fn broadcast_shapes(a: &TensorShape, b: &TensorShape) -> TensorShape {
  let (a, b) = match (a.dims(), b.dims()) {
    (Some(a), Some(b)) => (a, b),
    _ => return TensorShape::unknown_rank(),
  };
  let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
  let pad = long.len() - short.len();
  let dims = long
    .iter()
    .enumerate()
    .map(|(i, d)| {
      let other = if i >= pad { short[i - pad] } else { Some(1) };
      match (d, other) {
        (Some(x), Some(y)) => Some((*x).max(y)),
        _ => None,
      }
    })
    .collect();
  TensorShape::new(dims)
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;

  use super::{Op, OpKind};
  use crate::tensor::{DataType, Tensor, TensorMap, TensorShape};
  use crate::Error;

  fn tensor(name: &str, producer: &str, shape: TensorShape) -> Tensor {
    let mut t = Tensor::new(name, shape, DataType::Float32);
    t.set_producer(producer);
    t
  }

  fn arena(tensors: Vec<Tensor>) -> TensorMap {
    tensors
      .into_iter()
      .map(|t| (t.name().to_string(), t))
      .collect()
  }

  fn op(name: &str, kind: OpKind, inputs: &[&str], outputs: &[&str]) -> Op {
    let mut op = Op::new(name, kind);
    op.inputs = inputs.iter().map(|s| s.to_string()).collect();
    op.outputs = outputs.iter().map(|s| s.to_string()).collect();
    op
  }

  #[test]
  fn merge_is_visitable_on_first_ready_input_only() {
    let tensors = arena(vec![
      tensor("a", "prod_a", TensorShape::known(&[2])),
      tensor("b", "prod_b", TensorShape::known(&[2])),
    ]);
    let merge = op("m", OpKind::Merge, &["a", "b"], &["m_out", "m_idx"]);
    let add = op("add", OpKind::Pointwise, &["a", "b"], &["add_out"]);

    let mut visited = HashSet::new();
    assert!(!merge.can_visit(&visited, &tensors));
    visited.insert("prod_a".to_string());
    assert!(merge.can_visit(&visited, &tensors));
    assert!(!add.can_visit(&visited, &tensors));
    visited.insert("prod_b".to_string());
    assert!(add.can_visit(&visited, &tensors));
  }

  #[test]
  fn pointwise_unknown_input_fails_naming_the_op() {
    let mut tensors = arena(vec![
      tensor("x", "src", TensorShape::unknown_rank()),
      tensor("relu", "relu_op", TensorShape::unknown_rank()),
    ]);
    let relu = op("relu_op", OpKind::Pointwise, &["x"], &["relu"]);
    match relu.propagate_shapes(&mut tensors) {
      Err(Error::ShapePropagation { op, .. }) => assert_eq!(op, "relu_op"),
      other => panic!("expected shape propagation error, got {:?}", other),
    }
  }

  #[test]
  fn pointwise_broadcasts_and_counts_per_element() {
    let mut tensors = arena(vec![
      tensor("a", "pa", TensorShape::known(&[5, 1, 3])),
      tensor("b", "pb", TensorShape::known(&[4, 3])),
      tensor("sum", "add", TensorShape::unknown_rank()),
    ]);
    let add = op("add", OpKind::Pointwise, &["a", "b"], &["sum"]);
    add.propagate_shapes(&mut tensors).unwrap();
    assert_eq!(tensors["sum"].shape, TensorShape::known(&[5, 4, 3]));
    assert_eq!(
      add.calc_alg_flops(&tensors).unwrap().as_constant(),
      Some(60)
    );
  }

  #[test]
  fn matmul_shape_and_two_flops_per_mac() {
    let mut tensors = arena(vec![
      tensor("x", "px", TensorShape::known(&[10, 10])),
      tensor("w", "pw", TensorShape::known(&[10, 10])),
      tensor("y", "mm", TensorShape::unknown_rank()),
    ]);
    let mm = op("mm", OpKind::MatMul, &["x", "w"], &["y"]);
    mm.propagate_shapes(&mut tensors).unwrap();
    assert_eq!(tensors["y"].shape, TensorShape::known(&[10, 10]));
    assert_eq!(
      mm.calc_alg_flops(&tensors).unwrap().as_constant(),
      Some(2000)
    );
  }

  #[test]
  fn matmul_inner_dim_conflict() {
    let mut tensors = arena(vec![
      tensor("x", "px", TensorShape::known(&[10, 3])),
      tensor("w", "pw", TensorShape::known(&[4, 7])),
      tensor("y", "mm", TensorShape::unknown_rank()),
    ]);
    let mm = op("mm", OpKind::MatMul, &["x", "w"], &["y"]);
    assert!(matches!(
      mm.propagate_shapes(&mut tensors),
      Err(Error::ShapePropagation { .. })
    ));
  }

  #[test]
  fn matmul_flops_stay_symbolic_on_unknown_dims() {
    let tensors = arena(vec![
      tensor("x", "px", TensorShape::new(vec![None, Some(10)])),
      tensor("w", "pw", TensorShape::known(&[10, 10])),
      tensor("y", "mm", TensorShape::new(vec![None, Some(10)])),
    ]);
    let mm = op("mm", OpKind::MatMul, &["x", "w"], &["y"]);
    let flops = mm.calc_alg_flops(&tensors).unwrap();
    assert_eq!(flops.to_string(), "200*y::dim0");
  }

  #[test]
  fn switch_gates_value_shape_to_both_outputs() {
    let mut tensors = arena(vec![
      tensor("v", "pv", TensorShape::known(&[3, 3])),
      tensor("pred", "lc", TensorShape::scalar()),
      tensor("s_true", "s", TensorShape::unknown_rank()),
      tensor("s_false", "s", TensorShape::unknown_rank()),
    ]);
    let s = op("s", OpKind::Switch, &["v", "pred"], &["s_true", "s_false"]);
    s.propagate_shapes(&mut tensors).unwrap();
    assert_eq!(tensors["s_true"].shape, TensorShape::known(&[3, 3]));
    assert_eq!(tensors["s_false"].shape, TensorShape::known(&[3, 3]));
    assert_eq!(s.calc_alg_flops(&tensors).unwrap().as_constant(), Some(0));
  }

  #[test]
  fn switch_rejects_non_scalar_selector() {
    let mut tensors = arena(vec![
      tensor("v", "pv", TensorShape::known(&[3])),
      tensor("pred", "lc", TensorShape::known(&[2])),
      tensor("s_true", "s", TensorShape::unknown_rank()),
      tensor("s_false", "s", TensorShape::unknown_rank()),
    ]);
    let s = op("s", OpKind::Switch, &["v", "pred"], &["s_true", "s_false"]);
    assert!(matches!(
      s.propagate_shapes(&mut tensors),
      Err(Error::ShapePropagation { .. })
    ));
  }

  #[test]
  fn merge_propagates_first_known_shape() {
    let mut tensors = arena(vec![
      tensor("init", "pi", TensorShape::known(&[8])),
      tensor("looped", "ni", TensorShape::unknown_rank()),
      tensor("m_out", "m", TensorShape::unknown_rank()),
      tensor("m_idx", "m", TensorShape::scalar()),
    ]);
    let m = op("m", OpKind::Merge, &["init", "looped"], &["m_out", "m_idx"]);
    m.propagate_shapes(&mut tensors).unwrap();
    assert_eq!(tensors["m_out"].shape, TensorShape::known(&[8]));
    // the chosen-index output is left alone
    assert!(tensors["m_idx"].shape.is_scalar());
  }

  #[test]
  fn merge_with_no_known_input_fails() {
    let mut tensors = arena(vec![
      tensor("a", "pa", TensorShape::unknown_rank()),
      tensor("m_out", "m", TensorShape::unknown_rank()),
      tensor("m_idx", "m", TensorShape::scalar()),
    ]);
    let m = op("m", OpKind::Merge, &["a"], &["m_out", "m_idx"]);
    assert!(matches!(
      m.propagate_shapes(&mut tensors),
      Err(Error::ShapePropagation { .. })
    ));
  }

  #[test]
  fn concat_requires_integer_axis() {
    use crate::tensor::TensorValue;
    let mut tensors = arena(vec![
      tensor("a", "pa", TensorShape::known(&[2, 3])),
      tensor("b", "pb", TensorShape::known(&[2, 5])),
      tensor("axis", "pc", TensorShape::scalar()),
      tensor("cat", "cat_op", TensorShape::unknown_rank()),
    ]);
    let cat = op("cat_op", OpKind::Concat, &["a", "b", "axis"], &["cat"]);
    assert!(matches!(
      cat.propagate_shapes(&mut tensors),
      Err(Error::Unsupported { .. })
    ));

    tensors.get_mut("axis").unwrap().value = Some(TensorValue::Int(1));
    cat.propagate_shapes(&mut tensors).unwrap();
    assert_eq!(tensors["cat"].shape, TensorShape::known(&[2, 8]));
  }

  #[test]
  fn split_divides_the_axis() {
    let mut tensors = arena(vec![
      tensor("x", "px", TensorShape::known(&[6, 2])),
      tensor("p0", "sp", TensorShape::unknown_rank()),
      tensor("p1", "sp", TensorShape::unknown_rank()),
      tensor("p2", "sp", TensorShape::unknown_rank()),
    ]);
    let sp = op(
      "sp",
      OpKind::Split {
        num_splits: 3,
        axis: Some(0),
      },
      &["x"],
      &["p0", "p1", "p2"],
    );
    sp.propagate_shapes(&mut tensors).unwrap();
    for t in ["p0", "p1", "p2"] {
      assert_eq!(tensors[t].shape, TensorShape::known(&[2, 2]));
    }
  }

  #[test]
  fn reduce_removes_axes_and_counts_input_elements() {
    let mut tensors = arena(vec![
      tensor("x", "px", TensorShape::known(&[4, 5])),
      tensor("red", "r", TensorShape::unknown_rank()),
    ]);
    let r = op("r", OpKind::Reduce { axes: Some(vec![1]) }, &["x"], &["red"]);
    r.propagate_shapes(&mut tensors).unwrap();
    assert_eq!(tensors["red"].shape, TensorShape::known(&[4]));
    assert_eq!(r.calc_alg_flops(&tensors).unwrap().as_constant(), Some(20));
  }

  #[test]
  fn unknown_op_is_a_quiet_passthrough() {
    let mut tensors = arena(vec![
      tensor("x", "px", TensorShape::known(&[3])),
      tensor("y", "mystery", TensorShape::unknown_rank()),
    ]);
    let mystery = op("mystery", OpKind::Unknown, &["x"], &["y"]);
    mystery.propagate_shapes(&mut tensors).unwrap();
    assert_eq!(tensors["y"].shape, TensorShape::known(&[3]));
    assert_eq!(
      mystery.calc_alg_flops(&tensors).unwrap().as_constant(),
      Some(0)
    );
  }

  #[test]
  fn control_gates_cost_nothing() {
    let tensors = arena(vec![
      tensor("x", "px", TensorShape::known(&[100])),
      tensor("y", "e", TensorShape::known(&[100])),
    ]);
    for kind in [
      OpKind::Enter,
      OpKind::Exit,
      OpKind::NextIteration,
      OpKind::Identity,
    ] {
      let e = op("e", kind, &["x"], &["y"]);
      assert_eq!(e.calc_alg_flops(&tensors).unwrap().as_constant(), Some(0));
    }
  }
}
