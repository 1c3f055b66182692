///
/// Typed, shaped values flowing between ops. A tensor is created by exactly
/// one producer op and read by any number of consumers; both sides are
/// recorded as plain op names into the owning graph's arena, so the
/// producer/consumer back-references never form ownership cycles.
///
pub mod shape;

use std::collections::{BTreeSet, HashMap};

pub use shape::TensorShape;

/// The arena every pass reads tensors from, keyed by tensor name.
pub type TensorMap = HashMap<String, Tensor>;

use crate::symbolic::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
  Bool,
  Int32,
  Int64,
  Uint32,
  Float32,
  Str,
  Unknown,
}

/// Scalar payload carried by constant tensors (e.g. a concat axis).
#[derive(Debug, Clone, PartialEq)]
pub enum TensorValue {
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
}

impl TensorValue {
  pub fn as_int(&self) -> Option<i64> {
    match self {
      TensorValue::Int(i) => Some(*i),
      _ => None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Tensor {
  name: String,
  pub shape: TensorShape,
  pub dtype: DataType,
  pub value: Option<TensorValue>,
  // producer op name, set when the op is registered with a graph
  producer: String,
  // keyed by consumer op name, which makes re-registration a no-op
  consumers: BTreeSet<String>,
}

impl Tensor {
  pub fn new(name: impl Into<String>, shape: TensorShape, dtype: DataType) -> Self {
    Tensor {
      name: name.into(),
      shape,
      dtype,
      value: None,
      producer: String::new(),
      consumers: BTreeSet::new(),
    }
  }

  pub fn with_value(mut self, value: TensorValue) -> Self {
    self.value = Some(value);
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn producer(&self) -> &str {
    &self.producer
  }

  pub(crate) fn set_producer(&mut self, op: &str) {
    self.producer = op.to_string();
  }

  pub(crate) fn add_consumer(&mut self, op: &str) {
    self.consumers.insert(op.to_string());
  }

  pub fn consumers(&self) -> impl Iterator<Item = &str> {
    self.consumers.iter().map(|s| s.as_str())
  }

  pub fn has_consumers(&self) -> bool {
    !self.consumers.is_empty()
  }

  /// Element count, symbolic over this tensor's unknown dimensions.
  pub fn num_elements(&self) -> Expr {
    self.shape.num_elements(&self.name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn consumer_registration_dedupes() {
    let mut t = Tensor::new("t", TensorShape::known(&[2]), DataType::Float32);
    t.add_consumer("a");
    t.add_consumer("a");
    t.add_consumer("b");
    assert_eq!(t.consumers().collect::<Vec<_>>(), vec!["a", "b"]);
  }

  #[test]
  fn symbolic_elements_carry_the_tensor_name() {
    let t = Tensor::new(
      "act",
      TensorShape::new(vec![None, Some(8)]),
      DataType::Float32,
    );
    assert_eq!(t.num_elements().to_string(), "8*act::dim0");
  }
}
