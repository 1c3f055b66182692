///
/// Sum-of-products expressions for costs that depend on unresolved
/// quantities: loop trip counts and unknown tensor dimensions.
///
/// Flop formulas only ever need symbol creation, `+` and `*`, so no
/// simplification beyond collecting like terms is done here. Terms live in
/// `BTreeMap`s so equality and printing are deterministic.
///
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Mul};

/// A monomial maps each symbol name to its (positive) power.
type Monomial = BTreeMap<String, u32>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Expr {
  terms: BTreeMap<Monomial, i64>,
}

impl Expr {
  pub fn zero() -> Self {
    Expr::default()
  }

  pub fn symbol(name: impl Into<String>) -> Self {
    let mut m = Monomial::new();
    m.insert(name.into(), 1);
    let mut terms = BTreeMap::new();
    terms.insert(m, 1);
    Expr { terms }
  }

  pub fn is_zero(&self) -> bool {
    self.terms.is_empty()
  }

  /// The expression's value when no symbols are involved.
  pub fn as_constant(&self) -> Option<i64> {
    match self.terms.iter().next() {
      None => Some(0),
      Some((m, c)) if self.terms.len() == 1 && m.is_empty() => Some(*c),
      _ => None,
    }
  }

  // dead terms are dropped so Eq stays meaningful
  fn insert_term(&mut self, m: Monomial, c: i64) {
    if c == 0 {
      return;
    }
    let folded = self.terms.get(&m).copied().unwrap_or(0) + c;
    if folded == 0 {
      self.terms.remove(&m);
    } else {
      self.terms.insert(m, folded);
    }
  }
}

impl From<i64> for Expr {
  fn from(c: i64) -> Self {
    let mut terms = BTreeMap::new();
    if c != 0 {
      terms.insert(Monomial::new(), c);
    }
    Expr { terms }
  }
}

impl Add for Expr {
  type Output = Expr;
  fn add(self, other: Expr) -> Expr {
    let mut out = self;
    for (m, c) in other.terms {
      out.insert_term(m, c);
    }
    out
  }
}

impl AddAssign for Expr {
  fn add_assign(&mut self, other: Expr) {
    for (m, c) in other.terms {
      self.insert_term(m, c);
    }
  }
}

impl Mul for Expr {
  type Output = Expr;
  fn mul(self, other: Expr) -> Expr {
    let mut out = Expr::zero();
    for (ml, cl) in &self.terms {
      for (mr, cr) in &other.terms {
        let mut m = ml.clone();
        for (sym, pow) in mr {
          *m.entry(sym.clone()).or_insert(0) += pow;
        }
        out.insert_term(m, cl * cr);
      }
    }
    out
  }
}

impl Mul<i64> for Expr {
  type Output = Expr;
  fn mul(self, c: i64) -> Expr {
    self * Expr::from(c)
  }
}

impl fmt::Display for Expr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.terms.is_empty() {
      return write!(f, "0");
    }
    let mut first = true;
    for (m, c) in &self.terms {
      if !first {
        write!(f, " + ")?;
      }
      first = false;
      if m.is_empty() {
        write!(f, "{}", c)?;
        continue;
      }
      if *c != 1 {
        write!(f, "{}*", c)?;
      }
      let mut first_sym = true;
      for (sym, pow) in m {
        if !first_sym {
          write!(f, "*")?;
        }
        first_sym = false;
        if *pow == 1 {
          write!(f, "{}", sym)?;
        } else {
          write!(f, "{}^{}", sym, pow)?;
        }
      }
    }
    Ok(())
  }
}
