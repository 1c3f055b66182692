///
/// Flattened-graph import. We accept a serialized list of framework ops (the
/// shape tensorflow-style exporters produce), translate each op type onto our
/// closed op set, wire the tensors, and run control region recovery on the
/// result.
///
/// Unrecognized op types and dtypes are the one place we degrade instead of
/// failing: the op lands as [OpKind::Unknown], keeps the traversal connected,
/// and counts zero flops. Everything else about a malformed export is fatal.
///
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::graph::recover_control_blocks;
use crate::ops::{Op, OpKind};
use crate::tensor::{DataType, Tensor, TensorShape, TensorValue};
use crate::{Error, Graph};

/// One output tensor of a serialized op. `dims` mirrors the shape lattice:
/// absent means unknown rank, a null entry means that dimension is unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatTensorSpec {
  pub name: String,
  #[serde(default)]
  pub dims: Option<Vec<Option<u64>>>,
  #[serde(default)]
  pub dtype: Option<String>,
  /// Scalar payload, present on e.g. exported axis constants.
  #[serde(default)]
  pub value: Option<i64>,
}

/// One serialized op: its framework type name, the tensors it produces, and
/// the tensor names it consumes, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatOp {
  pub name: String,
  pub kind: String,
  #[serde(default)]
  pub outputs: Vec<FlatTensorSpec>,
  #[serde(default)]
  pub inputs: Vec<String>,
}

/// Framework op type -> our op set. `Split` is handled in the importer since
/// its arity comes from the output list.
fn op_kind_for(kind: &str) -> Option<OpKind> {
  let kind = match kind {
    "Add" | "AddV2" | "Sub" | "Mul" | "Neg" | "Maximum" | "Minimum" | "Less" | "Greater"
    | "GreaterEqual" | "Relu" | "Tanh" | "Sigmoid" | "Exp" | "Sqrt" | "Rsqrt" | "Pow"
    | "RealDiv" | "FloorDiv" | "FloorMod" | "LogicalAnd" | "LogicalOr" | "LogicalNot"
    | "Equal" | "NotEqual" => OpKind::Pointwise,
    "MatMul" => OpKind::MatMul,
    "Concat" | "ConcatV2" => OpKind::Concat,
    "Sum" | "Mean" | "Prod" | "Max" | "Min" | "All" | "Any" => OpKind::Reduce { axes: None },
    "Identity" | "Cast" | "StopGradient" => OpKind::Identity,
    "Const" => OpKind::Constant,
    "Placeholder" => OpKind::Placeholder,
    "Variable" | "VariableV2" => OpKind::Variable,
    "Enter" => OpKind::Enter,
    "Exit" => OpKind::Exit,
    "LoopCond" => OpKind::LoopCondition,
    "Merge" => OpKind::Merge,
    "NextIteration" => OpKind::NextIteration,
    "Switch" => OpKind::Switch,
    "NoOp" => OpKind::NoOp,
    _ => return None,
  };
  Some(kind)
}

fn dtype_for(dtype: &str) -> Option<DataType> {
  let dtype = match dtype {
    "bool" => DataType::Bool,
    "int32" => DataType::Int32,
    "int64" => DataType::Int64,
    "uint32" => DataType::Uint32,
    "float32" => DataType::Float32,
    "string" => DataType::Str,
    _ => return None,
  };
  Some(dtype)
}

fn tensor_from_spec(spec: &FlatTensorSpec) -> Tensor {
  let shape = match &spec.dims {
    None => TensorShape::unknown_rank(),
    Some(dims) => TensorShape::new(dims.clone()),
  };
  let dtype = match spec.dtype.as_deref() {
    None => DataType::Unknown,
    Some(name) => dtype_for(name).unwrap_or_else(|| {
      warn!(tensor = %spec.name, dtype = name, "unknown dtype, keeping it opaque");
      DataType::Unknown
    }),
  };
  let mut tensor = Tensor::new(&spec.name, shape, dtype);
  if let Some(v) = spec.value {
    tensor = tensor.with_value(TensorValue::Int(v));
  }
  tensor
}

/// Build a wired [Graph] from a flat op list and recover its control
/// regions. Ops are registered before any wiring happens, so the list may
/// reference tensors in any order (loop back-edges need that).
#[instrument(skip(ops), fields(ops = ops.len()))]
pub fn import_flat(ops: Vec<FlatOp>) -> Result<Graph, Error> {
  let mut graph = Graph::new();
  for flat in &ops {
    let kind = match flat.kind.as_str() {
      "Split" | "SplitV" => OpKind::Split {
        num_splits: flat.outputs.len(),
        axis: None,
      },
      other => op_kind_for(other).unwrap_or_else(|| {
        warn!(op = %flat.name, kind = other, "unknown op type, importing as opaque");
        OpKind::Unknown
      }),
    };
    let outputs = flat.outputs.iter().map(tensor_from_spec).collect();
    graph.add_op(Op::new(&flat.name, kind), outputs)?;
  }
  for flat in &ops {
    for input in &flat.inputs {
      graph.add_input_to_op(&flat.name, input)?;
    }
  }
  let recovered = recover_control_blocks(&mut graph)?;
  info!(ops = ops.len(), recovered, "graph imported");
  Ok(graph)
}
