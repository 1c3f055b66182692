//!
//! Static analysis IR for ML compute graphs.
//!
//! A flat list of imported ops is wired into a [graph::Graph], dynamic
//! control-flow clusters (Enter/Exit/Switch/Merge/NextIteration gated by a
//! loop-condition op) are recovered into nested block nodes, and then shape
//! propagation and algorithmic flop counting run over the result without ever
//! executing the model.
//!

use std::fmt;

pub mod api;
pub mod frameworks;
pub mod graph;
pub mod ops;
pub mod symbolic;
pub mod tensor;
pub mod utils;

pub use graph::{recover_control_blocks, ControlBlockOp, Graph, Node};
pub use ops::{Op, OpKind};
pub use symbolic::Expr;
pub use tensor::{DataType, Tensor, TensorShape, TensorValue};

/// Failure taxonomy for every pass over the graph.
///
/// `Structural` and `ShapePropagation` are fatal to the current pass: an
/// inconsistent graph would produce wrong cost/shape figures downstream. The
/// only soft path is the adapter substituting Unknown ops/dtypes, which warns
/// instead of constructing one of these. Every variant names the op or tensor
/// at fault so it can be located in the source model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
  /// Duplicate names, references to unregistered ops/tensors, malformed
  /// control-op fan-out.
  Structural { subject: String, reason: String },
  /// A shape needed for inference is unknown, or an inferred shape conflicts
  /// with a pre-existing one.
  ShapePropagation { op: String, reason: String },
  /// Constructs the analysis recognizes but does not model yet, e.g. nested
  /// control regions or a conditional-only region root.
  Unsupported { subject: String, reason: String },
}

impl Error {
  pub fn structural(subject: impl Into<String>, reason: impl Into<String>) -> Self {
    Error::Structural {
      subject: subject.into(),
      reason: reason.into(),
    }
  }

  pub fn shape(op: impl Into<String>, reason: impl Into<String>) -> Self {
    Error::ShapePropagation {
      op: op.into(),
      reason: reason.into(),
    }
  }

  pub fn unsupported(subject: impl Into<String>, reason: impl Into<String>) -> Self {
    Error::Unsupported {
      subject: subject.into(),
      reason: reason.into(),
    }
  }
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::Structural { subject, reason } => {
        write!(f, "structural error at {}: {}", subject, reason)
      }
      Error::ShapePropagation { op, reason } => {
        write!(f, "shape propagation failed at op {}: {}", op, reason)
      }
      Error::Unsupported { subject, reason } => {
        write!(f, "unsupported construct at {}: {}", subject, reason)
      }
    }
  }
}

impl std::error::Error for Error {}
