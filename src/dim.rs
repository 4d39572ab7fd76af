use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical dimension of a feature, expressed as exponents over a fixed set
/// of base quantities (e.g. the seven SI base quantities).
///
/// `Invalid` is the sentinel produced when two dimensions cannot be combined,
/// such as adding a length to a time. It is absorbing: any combination
/// involving `Invalid` yields `Invalid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Dim {
    Invalid,
    Vector(Vec<f64>),
}

impl Dim {
    /// All-zero exponent vector of the given width.
    pub fn dimensionless(width: usize) -> Self {
        Dim::Vector(vec![0.0; width.max(1)])
    }

    pub fn from_exponents(exps: &[f64]) -> Self {
        Dim::Vector(exps.to_vec())
    }

    pub fn invalid() -> Self {
        Dim::Invalid
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Dim::Invalid)
    }

    pub fn is_dimensionless(&self) -> bool {
        match self {
            Dim::Invalid => false,
            Dim::Vector(exps) => exps.iter().all(|e| *e == 0.0),
        }
    }

    fn exponents(&self) -> Option<&[f64]> {
        match self {
            Dim::Invalid => None,
            Dim::Vector(exps) => Some(exps),
        }
    }

    /// Widen two exponent vectors to a common length. A dimensionless vector
    /// broadcasts against any width; mismatched non-zero widths do not unify.
    fn unify(a: &[f64], b: &[f64]) -> Option<(Vec<f64>, Vec<f64>)> {
        if a.len() == b.len() {
            return Some((a.to_vec(), b.to_vec()));
        }
        let zero = |v: &[f64]| v.iter().all(|e| *e == 0.0);
        if zero(a) {
            Some((vec![0.0; b.len()], b.to_vec()))
        } else if zero(b) {
            Some((a.to_vec(), vec![0.0; a.len()]))
        } else {
            None
        }
    }
}

impl Default for Dim {
    fn default() -> Self {
        Dim::Invalid
    }
}

impl PartialEq for Dim {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Dim::Invalid, Dim::Invalid) => true,
            (Dim::Vector(a), Dim::Vector(b)) => match Dim::unify(a, b) {
                Some((a, b)) => a == b,
                None => false,
            },
            _ => false,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Invalid => write!(f, "invalid"),
            Dim::Vector(exps) => {
                write!(f, "[")?;
                for (i, e) in exps.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// How a primitive combines its operands' dimensions into a result dimension.
///
/// Recorded per primitive at registration time; `First` is the default when
/// no rule is declared.
#[derive(Debug, Clone, Copy)]
pub enum DimRule {
    /// Result is the first operand's dimension.
    First,
    /// All operands must share one dimension, which is the result (Add/Sub).
    SamePreserve,
    /// Exponents sum (Mul).
    Product,
    /// Exponents subtract, left minus right (Div).
    Quotient,
    /// Exponents scale by a fixed power (pow family, Rec).
    Power(f64),
    /// Operand must be dimensionless and so is the result (exp, ln, sin, cos).
    RequireDimensionless,
    /// User-supplied combination rule.
    Custom(fn(&[Dim]) -> Dim),
}

impl DimRule {
    pub fn combine(&self, operands: &[Dim]) -> Dim {
        if operands.is_empty() || operands.iter().any(Dim::is_invalid) {
            return Dim::Invalid;
        }
        match self {
            DimRule::First => operands[0].clone(),
            DimRule::SamePreserve => {
                if operands.windows(2).all(|w| w[0] == w[1]) {
                    operands[0].clone()
                } else {
                    Dim::Invalid
                }
            }
            DimRule::Product => fold_exponents(operands, |a, b| a + b),
            DimRule::Quotient => fold_exponents(operands, |a, b| a - b),
            DimRule::Power(k) => match operands[0].exponents() {
                Some(exps) => Dim::Vector(exps.iter().map(|e| e * k).collect()),
                None => Dim::Invalid,
            },
            DimRule::RequireDimensionless => {
                if operands.iter().all(Dim::is_dimensionless) {
                    Dim::dimensionless(operands[0].exponents().map_or(1, |e| e.len()))
                } else {
                    Dim::Invalid
                }
            }
            DimRule::Custom(rule) => rule(operands),
        }
    }
}

fn fold_exponents(operands: &[Dim], op: fn(f64, f64) -> f64) -> Dim {
    let mut acc = match operands[0].exponents() {
        Some(exps) => exps.to_vec(),
        None => return Dim::Invalid,
    };
    for operand in &operands[1..] {
        let exps = match operand.exponents() {
            Some(exps) => exps,
            None => return Dim::Invalid,
        };
        let (a, b) = match Dim::unify(&acc, exps) {
            Some(pair) => pair,
            None => return Dim::Invalid,
        };
        acc = a.iter().zip(&b).map(|(x, y)| op(*x, *y)).collect();
    }
    Dim::Vector(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn length() -> Dim {
        Dim::from_exponents(&[1.0, 0.0, 0.0])
    }

    fn time() -> Dim {
        Dim::from_exponents(&[0.0, 1.0, 0.0])
    }

    #[test]
    fn equality_is_componentwise() {
        assert_eq!(length(), length());
        assert_ne!(length(), time());
        assert_eq!(Dim::Invalid, Dim::Invalid);
        assert_ne!(Dim::Invalid, length());
    }

    #[test]
    fn dimensionless_widths_are_interchangeable() {
        assert_eq!(Dim::dimensionless(1), Dim::dimensionless(7));
        assert!(Dim::dimensionless(3).is_dimensionless());
        assert!(!length().is_dimensionless());
    }

    #[test]
    fn same_preserve_detects_mismatch() {
        let rule = DimRule::SamePreserve;
        assert_eq!(rule.combine(&[length(), length()]), length());
        assert!(rule.combine(&[length(), time()]).is_invalid());
    }

    #[test]
    fn product_and_quotient_fold_exponents() {
        assert_eq!(
            DimRule::Product.combine(&[length(), time()]),
            Dim::from_exponents(&[1.0, 1.0, 0.0])
        );
        assert_eq!(
            DimRule::Quotient.combine(&[length(), time()]),
            Dim::from_exponents(&[1.0, -1.0, 0.0])
        );
        // dimensionless broadcasts against a wider vector
        assert_eq!(
            DimRule::Product.combine(&[Dim::dimensionless(1), length()]),
            length()
        );
    }

    #[test]
    fn power_scales_exponents() {
        assert_eq!(
            DimRule::Power(2.0).combine(&[length()]),
            Dim::from_exponents(&[2.0, 0.0, 0.0])
        );
        assert_eq!(
            DimRule::Power(-1.0).combine(&[length()]),
            Dim::from_exponents(&[-1.0, 0.0, 0.0])
        );
    }

    #[test]
    fn transcendental_inputs_must_be_dimensionless() {
        let rule = DimRule::RequireDimensionless;
        assert!(rule.combine(&[Dim::dimensionless(3)]).is_dimensionless());
        assert!(rule.combine(&[length()]).is_invalid());
    }

    #[test]
    fn invalid_is_absorbing() {
        for rule in [
            DimRule::First,
            DimRule::SamePreserve,
            DimRule::Product,
            DimRule::Power(0.5),
        ] {
            assert!(rule.combine(&[Dim::Invalid, length()]).is_invalid());
        }
    }
}
