use std::fmt;

use crate::symbolic::Expr;

/// A dimension conflict found while merging two shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimConflict {
  pub index: usize,
  pub left: u64,
  pub right: u64,
}

impl fmt::Display for DimConflict {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "dimension {} disagrees: {} vs {}",
      self.index, self.left, self.right
    )
  }
}

/// Possibly-partial tensor shape: the rank itself can be unknown, and each
/// dimension of a known rank can individually be unknown.
#[derive(Debug, Clone)]
pub struct TensorShape {
  dims: Option<Vec<Option<u64>>>,
}

impl TensorShape {
  pub fn new(dims: Vec<Option<u64>>) -> Self {
    TensorShape { dims: Some(dims) }
  }

  pub fn unknown_rank() -> Self {
    TensorShape { dims: None }
  }

  pub fn scalar() -> Self {
    TensorShape { dims: Some(vec![]) }
  }

  pub fn known(dims: &[u64]) -> Self {
    TensorShape {
      dims: Some(dims.iter().map(|d| Some(*d)).collect()),
    }
  }

  pub fn rank(&self) -> Option<usize> {
    self.dims.as_ref().map(|d| d.len())
  }

  pub fn dims(&self) -> Option<&[Option<u64>]> {
    self.dims.as_deref()
  }

  /// True if the rank or any dimension is unknown.
  pub fn is_unknown(&self) -> bool {
    match &self.dims {
      None => true,
      Some(dims) => dims.iter().any(|d| d.is_none()),
    }
  }

  pub fn is_scalar(&self) -> bool {
    self.rank() == Some(0)
  }

  /// Element count when every dimension is known.
  pub fn known_num_elements(&self) -> Option<u64> {
    let dims = self.dims.as_ref()?;
    let mut n = 1u64;
    for d in dims {
      n *= (*d)?;
    }
    Some(n)
  }

  /// Element count as an expression: unknown dimension `i` contributes the
  /// symbol `{base}::dim{i}`, an unknown rank the symbol `{base}::elts`.
  /// Never fails, so flop formulas stay total over partial shapes.
  pub fn num_elements(&self, base: &str) -> Expr {
    match &self.dims {
      None => Expr::symbol(format!("{}::elts", base)),
      Some(dims) => {
        let mut n = Expr::from(1);
        for (i, d) in dims.iter().enumerate() {
          n = n
            * match d {
              Some(d) => Expr::from(*d as i64),
              None => Expr::symbol(format!("{}::dim{}", base, i)),
            };
        }
        n
      }
    }
  }

  /// One dimension as an expression, None if the rank is unknown or the
  /// index is out of range.
  pub fn dim_expr(&self, index: usize, base: &str) -> Option<Expr> {
    let dims = self.dims.as_ref()?;
    let d = dims.get(index)?;
    Some(match d {
      Some(d) => Expr::from(*d as i64),
      None => Expr::symbol(format!("{}::dim{}", base, index)),
    })
  }

  /// Unknown-aware comparison: shapes agree wherever both sides are known.
  /// This is the check ops use before merging; strict `==` treats unknown
  /// dimensions as never equal.
  pub fn compatible_with(&self, other: &TensorShape) -> bool {
    match (&self.dims, &other.dims) {
      (None, _) | (_, None) => true,
      (Some(a), Some(b)) => {
        a.len() == b.len()
          && a.iter().zip(b).all(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => x == y,
            _ => true,
          })
      }
    }
  }

  /// Standard broadcast rule, aligned from the trailing dimension: each pair
  /// must be equal, or one side 1, or one side unknown. Unknown ranks are
  /// optimistically compatible.
  pub fn can_broadcast_together(&self, other: &TensorShape) -> bool {
    let (a, b) = match (&self.dims, &other.dims) {
      (Some(a), Some(b)) => (a, b),
      _ => return true,
    };
    a.iter()
      .rev()
      .zip(b.iter().rev())
      .all(|(x, y)| match (x, y) {
        (Some(x), Some(y)) => x == y || *x == 1 || *y == 1,
        _ => true,
      })
  }

  /// Destructively refine unknown dimensions of `self` from known
  /// dimensions of `other`. A dimension known differently on both sides is a
  /// conflict; the caller attaches the op/tensor names.
  pub fn merge_shape(&mut self, other: &TensorShape) -> Result<(), DimConflict> {
    let other_dims = match &other.dims {
      None => return Ok(()),
      Some(d) => d,
    };
    let dims = match &mut self.dims {
      None => {
        self.dims = Some(other_dims.clone());
        return Ok(());
      }
      Some(d) => d,
    };
    if dims.len() != other_dims.len() {
      return Err(DimConflict {
        index: 0,
        left: dims.len() as u64,
        right: other_dims.len() as u64,
      });
    }
    for (i, (mine, theirs)) in dims.iter_mut().zip(other_dims).enumerate() {
      match (&mine, theirs) {
        (Some(l), Some(r)) if l != r => {
          return Err(DimConflict {
            index: i,
            left: *l,
            right: *r,
          });
        }
        (None, Some(r)) => *mine = Some(*r),
        _ => {}
      }
    }
    Ok(())
  }
}

/// Strict equality: any unknown rank or dimension on either side makes the
/// shapes unequal. Use `compatible_with` for the unknown-tolerant check.
impl PartialEq for TensorShape {
  fn eq(&self, other: &TensorShape) -> bool {
    match (&self.dims, &other.dims) {
      (Some(a), Some(b)) => {
        a.len() == b.len()
          && a.iter().zip(b).all(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => x == y,
            _ => false,
          })
      }
      _ => false,
    }
  }
}

impl fmt::Display for TensorShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.dims {
      None => write!(f, "<unknown rank>"),
      Some(dims) => {
        write!(f, "[")?;
        for (i, d) in dims.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          match d {
            Some(d) => write!(f, "{}", d)?,
            None => write!(f, "?")?,
          }
        }
        write!(f, "]")
      }
    }
  }
}
