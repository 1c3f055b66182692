///
/// Convenience builders for assembling graphs by hand, mostly for tests and
/// small experiments. Every builder targets an explicit [Graph]; there is no
/// ambient default graph to accidentally leak state between constructions.
///
/// Single-output builders name the output tensor after the op, which keeps
/// hand-built graphs readable in dot dumps and error messages.
///
use crate::ops::{Op, OpKind};
use crate::tensor::{DataType, Tensor, TensorShape, TensorValue};
use crate::{Error, Graph};

fn add_single_output(
  graph: &mut Graph,
  name: &str,
  kind: OpKind,
  shape: TensorShape,
  value: Option<TensorValue>,
) -> Result<String, Error> {
  let mut tensor = Tensor::new(name, shape, DataType::Unknown);
  if let Some(v) = value {
    tensor = tensor.with_value(v);
  }
  graph.add_op(Op::new(name, kind), vec![tensor])?;
  Ok(name.to_string())
}

pub fn constant(
  graph: &mut Graph,
  name: &str,
  shape: TensorShape,
  value: TensorValue,
) -> Result<String, Error> {
  add_single_output(graph, name, OpKind::Constant, shape, Some(value))
}

pub fn variable(graph: &mut Graph, name: &str, shape: TensorShape) -> Result<String, Error> {
  add_single_output(graph, name, OpKind::Variable, shape, None)
}

pub fn placeholder(graph: &mut Graph, name: &str, shape: TensorShape) -> Result<String, Error> {
  add_single_output(graph, name, OpKind::Placeholder, shape, None)
}

/// Elementwise op, unary or binary. The output shape may be left unknown and
/// recovered by propagation.
pub fn pointwise(
  graph: &mut Graph,
  name: &str,
  shape: TensorShape,
  in_a: &str,
  in_b: Option<&str>,
) -> Result<String, Error> {
  let out = add_single_output(graph, name, OpKind::Pointwise, shape, None)?;
  graph.add_input_to_op(name, in_a)?;
  if let Some(b) = in_b {
    graph.add_input_to_op(name, b)?;
  }
  Ok(out)
}

pub fn matmul(
  graph: &mut Graph,
  name: &str,
  shape: TensorShape,
  in_a: &str,
  in_b: &str,
) -> Result<String, Error> {
  let out = add_single_output(graph, name, OpKind::MatMul, shape, None)?;
  graph.add_input_to_op(name, in_a)?;
  graph.add_input_to_op(name, in_b)?;
  Ok(out)
}

/// Concatenation along `axis`. The axis rides along as a trailing rank-0
/// constant input named `{name}:axis`, the same wiring imported graphs use.
pub fn concat(
  graph: &mut Graph,
  name: &str,
  shape: TensorShape,
  inputs: &[&str],
  axis: i64,
) -> Result<String, Error> {
  let out = add_single_output(graph, name, OpKind::Concat, shape, None)?;
  let axis_name = format!("{}:axis", name);
  graph.add_op(
    Op::new(&axis_name, OpKind::Constant),
    vec![
      Tensor::new(&axis_name, TensorShape::scalar(), DataType::Int32)
        .with_value(TensorValue::Int(axis)),
    ],
  )?;
  for input in inputs {
    graph.add_input_to_op(name, input)?;
  }
  graph.add_input_to_op(name, &axis_name)?;
  Ok(out)
}

pub fn reduce(
  graph: &mut Graph,
  name: &str,
  shape: TensorShape,
  input: &str,
  axes: Option<Vec<usize>>,
) -> Result<String, Error> {
  let out = add_single_output(graph, name, OpKind::Reduce { axes }, shape, None)?;
  graph.add_input_to_op(name, input)?;
  Ok(out)
}

/// Split into `num_splits` outputs named `{name}_out{i}`.
pub fn split(
  graph: &mut Graph,
  name: &str,
  out_shape: TensorShape,
  input: &str,
  num_splits: usize,
  axis: Option<usize>,
) -> Result<Vec<String>, Error> {
  let outputs: Vec<String> = (0..num_splits).map(|i| format!("{}_out{}", name, i)).collect();
  let tensors = outputs
    .iter()
    .map(|n| Tensor::new(n, out_shape.clone(), DataType::Unknown))
    .collect();
  graph.add_op(Op::new(name, OpKind::Split { num_splits, axis }), tensors)?;
  graph.add_input_to_op(name, input)?;
  Ok(outputs)
}
