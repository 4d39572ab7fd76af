//! Builtin operator tables: the arithmetic/transcendental primitives and the
//! group-wise structural operators, each paired with its dimension rule and
//! default selection weight.

use crate::dim::DimRule;
use super::node::{PrimitiveFn, StructuralFn};

// --- Scalar kernels ---

fn add(a: f64, b: f64) -> f64 {
    a + b
}

fn sub(a: f64, b: f64) -> f64 {
    a - b
}

fn mul(a: f64, b: f64) -> f64 {
    a * b
}

fn div(a: f64, b: f64) -> f64 {
    a / b
}

fn exp(a: f64) -> f64 {
    a.exp()
}

fn ln(a: f64) -> f64 {
    a.ln()
}

fn sin(a: f64) -> f64 {
    a.sin()
}

fn cos(a: f64) -> f64 {
    a.cos()
}

fn abs(a: f64) -> f64 {
    a.abs()
}

fn neg(a: f64) -> f64 {
    -a
}

fn rec(a: f64) -> f64 {
    1.0 / a
}

fn relu(a: f64) -> f64 {
    if a > 0.0 {
        a
    } else {
        0.0
    }
}

fn powf(a: f64, e: f64) -> f64 {
    a.powf(e)
}

// --- Primitive table ---

pub struct PrimitiveSpec {
    pub name: &'static str,
    pub func: PrimitiveFn,
    pub weight: f64,
    pub dim_rule: DimRule,
}

/// The four arithmetic operators carry the standard weight 1.0; the
/// remaining operators default to half of that, mirroring how the original
/// operator families are balanced against (+, -, *, /).
pub fn builtin_primitives() -> Vec<PrimitiveSpec> {
    vec![
        PrimitiveSpec {
            name: "Add",
            func: PrimitiveFn::Binary(add),
            weight: 1.0,
            dim_rule: DimRule::SamePreserve,
        },
        PrimitiveSpec {
            name: "Sub",
            func: PrimitiveFn::Binary(sub),
            weight: 1.0,
            dim_rule: DimRule::SamePreserve,
        },
        PrimitiveSpec {
            name: "Mul",
            func: PrimitiveFn::Binary(mul),
            weight: 1.0,
            dim_rule: DimRule::Product,
        },
        PrimitiveSpec {
            name: "Div",
            func: PrimitiveFn::Binary(div),
            weight: 1.0,
            dim_rule: DimRule::Quotient,
        },
        PrimitiveSpec {
            name: "exp",
            func: PrimitiveFn::Unary(exp),
            weight: 0.5,
            dim_rule: DimRule::RequireDimensionless,
        },
        PrimitiveSpec {
            name: "ln",
            func: PrimitiveFn::Unary(ln),
            weight: 0.5,
            dim_rule: DimRule::RequireDimensionless,
        },
        PrimitiveSpec {
            name: "sin",
            func: PrimitiveFn::Unary(sin),
            weight: 0.5,
            dim_rule: DimRule::RequireDimensionless,
        },
        PrimitiveSpec {
            name: "cos",
            func: PrimitiveFn::Unary(cos),
            weight: 0.5,
            dim_rule: DimRule::RequireDimensionless,
        },
        PrimitiveSpec {
            name: "Abs",
            func: PrimitiveFn::Unary(abs),
            weight: 0.5,
            dim_rule: DimRule::First,
        },
        PrimitiveSpec {
            name: "Neg",
            func: PrimitiveFn::Unary(neg),
            weight: 0.5,
            dim_rule: DimRule::First,
        },
        PrimitiveSpec {
            name: "Rec",
            func: PrimitiveFn::Unary(rec),
            weight: 0.5,
            dim_rule: DimRule::Power(-1.0),
        },
        PrimitiveSpec {
            name: "Relu",
            func: PrimitiveFn::Unary(relu),
            weight: 0.5,
            dim_rule: DimRule::First,
        },
    ]
}

pub fn builtin_primitive(name: &str) -> Option<PrimitiveSpec> {
    builtin_primitives().into_iter().find(|s| s.name == name)
}

/// A fixed-exponent power operator, `pow{j}` style. The exponent is baked
/// into the function handle and the dimension rule together.
pub fn power_spec(exponent: f64) -> (PrimitiveFn, DimRule) {
    (PrimitiveFn::UnaryParam(exponent, powf), DimRule::Power(exponent))
}

// --- Structural table ---

pub struct StructuralSpec {
    pub name: &'static str,
    pub func: StructuralFn,
    pub weight: f64,
    pub dim_rule: DimRule,
}

/// The pass-through marker dominates the draw (0.75); the four group
/// aggregators share the remainder at 0.05 each.
pub fn builtin_structurals() -> Vec<StructuralSpec> {
    vec![
        StructuralSpec {
            name: "Self",
            func: StructuralFn::Identity,
            weight: 0.75,
            dim_rule: DimRule::First,
        },
        StructuralSpec {
            name: "MAdd",
            func: StructuralFn::SumRows,
            weight: 0.05,
            dim_rule: DimRule::First,
        },
        StructuralSpec {
            name: "MSub",
            func: StructuralFn::DiffRows,
            weight: 0.05,
            dim_rule: DimRule::First,
        },
        StructuralSpec {
            name: "MMul",
            func: StructuralFn::ProdRows,
            weight: 0.05,
            dim_rule: DimRule::First,
        },
        StructuralSpec {
            name: "MDiv",
            func: StructuralFn::RatioRows,
            weight: 0.05,
            dim_rule: DimRule::First,
        },
    ]
}
