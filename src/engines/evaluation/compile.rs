//! Closure-tree compilation and execution.
//!
//! A tree is compiled once into a `CompiledExpr` nested over `SymbolId`s,
//! then executed against the registry's stored data. There is no name-based
//! dispatch at execution time: primitives carry typed function handles and
//! terminals resolve by index into the arena.

use crate::dim::Dim;
use crate::engines::tree::ExprTree;
use crate::error::{Result, SymregError};
use crate::symbols::node::{FeatureData, NodeDef, PrimitiveFn, StructuralFn, SymbolId};
use crate::symbols::registry::SymbolSet;

/// Evaluable form of a tree. Cheap to clone; holds no data.
#[derive(Debug, Clone)]
pub enum CompiledExpr {
    Terminal(SymbolId),
    Call {
        op: SymbolId,
        args: Vec<CompiledExpr>,
    },
}

/// A runtime value flowing through evaluation. `Group` is the 2-D payload of
/// a grouped feature; structural operators reduce it to a `Column`.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Scalar(f64),
    Column(Vec<f64>),
    Group(Vec<Vec<f64>>),
}

/// Per-tree evaluation failure. Never surfaces to a caller: the scoring
/// layer converts it into the configured worst score.
#[derive(Debug, Clone)]
pub struct EvalFailure(pub String);

pub type EvalResult = std::result::Result<EvalValue, EvalFailure>;

/// Compile a tree against the registry that produced it. A reference to a
/// symbol the registry does not know is an internal-consistency failure
/// reported as `Compilation`.
pub fn compile(tree: &ExprTree, set: &SymbolSet) -> Result<CompiledExpr> {
    let nodes = tree.nodes();
    let mut pos = 0usize;
    let expr = compile_at(nodes, &mut pos, set)?;
    if pos != nodes.len() {
        return Err(SymregError::Compilation(format!(
            "{} trailing node(s) after the expression root",
            nodes.len() - pos
        )));
    }
    Ok(expr)
}

fn compile_at(nodes: &[SymbolId], pos: &mut usize, set: &SymbolSet) -> Result<CompiledExpr> {
    let Some(&id) = nodes.get(*pos) else {
        return Err(SymregError::Compilation(
            "expression ended while arguments were still expected".to_string(),
        ));
    };
    let def = set.get(id).ok_or_else(|| {
        SymregError::Compilation(format!(
            "symbol id {} is not present in the evaluation context",
            id.index()
        ))
    })?;
    *pos += 1;
    match def {
        NodeDef::Terminal(_) => Ok(CompiledExpr::Terminal(id)),
        _ => {
            let arity = def.arity();
            let mut args = Vec::with_capacity(arity);
            for _ in 0..arity {
                args.push(compile_at(nodes, pos, set)?);
            }
            Ok(CompiledExpr::Call { op: id, args })
        }
    }
}

/// Execute a compiled expression over the registry's stored data.
pub fn execute(expr: &CompiledExpr, set: &SymbolSet) -> EvalResult {
    match expr {
        CompiledExpr::Terminal(id) => match set.def(*id) {
            NodeDef::Terminal(t) => Ok(match &t.data {
                FeatureData::Scalar(v) => EvalValue::Scalar(*v),
                FeatureData::Column(c) => EvalValue::Column(c.as_ref().clone()),
                FeatureData::Group(g) => EvalValue::Group(g.as_ref().clone()),
            }),
            other => Err(EvalFailure(format!(
                "'{}' is not a terminal",
                other.name()
            ))),
        },
        CompiledExpr::Call { op, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(execute(arg, set)?);
            }
            match set.def(*op) {
                NodeDef::Primitive(p) => apply_primitive(p.func, &values),
                NodeDef::Structural(s) => {
                    let value = values.pop().ok_or_else(|| {
                        EvalFailure(format!("'{}' received no argument", s.name))
                    })?;
                    apply_structural(s.func, value)
                }
                NodeDef::Terminal(t) => {
                    Err(EvalFailure(format!("terminal '{}' applied as operator", t.name)))
                }
            }
        }
    }
}

fn apply_primitive(func: PrimitiveFn, values: &[EvalValue]) -> EvalResult {
    match func {
        PrimitiveFn::Unary(f) => map_unary(arg(values, 0)?, f),
        PrimitiveFn::UnaryParam(param, f) => map_unary(arg(values, 0)?, |a| f(a, param)),
        PrimitiveFn::Binary(f) => broadcast(arg(values, 0)?, arg(values, 1)?, f),
    }
}

fn arg(values: &[EvalValue], i: usize) -> std::result::Result<&EvalValue, EvalFailure> {
    values
        .get(i)
        .ok_or_else(|| EvalFailure(format!("missing operand {i}")))
}

fn map_unary(value: &EvalValue, f: impl Fn(f64) -> f64) -> EvalResult {
    Ok(match value {
        EvalValue::Scalar(v) => EvalValue::Scalar(f(*v)),
        EvalValue::Column(c) => EvalValue::Column(c.iter().map(|v| f(*v)).collect()),
        EvalValue::Group(g) => EvalValue::Group(
            g.iter()
                .map(|row| row.iter().map(|v| f(*v)).collect())
                .collect(),
        ),
    })
}

/// Elementwise application with numpy-style broadcasting: scalars broadcast
/// against anything, a column broadcasts across group rows, and equal shapes
/// combine pointwise. Shape mismatches fail the evaluation.
fn broadcast(a: &EvalValue, b: &EvalValue, f: fn(f64, f64) -> f64) -> EvalResult {
    use EvalValue::*;
    match (a, b) {
        (Scalar(x), Scalar(y)) => Ok(Scalar(f(*x, *y))),
        (Scalar(x), Column(c)) => Ok(Column(c.iter().map(|y| f(*x, *y)).collect())),
        (Column(c), Scalar(y)) => Ok(Column(c.iter().map(|x| f(*x, *y)).collect())),
        (Column(l), Column(r)) => {
            check_len(l.len(), r.len())?;
            Ok(Column(l.iter().zip(r).map(|(x, y)| f(*x, *y)).collect()))
        }
        (Scalar(x), Group(g)) => Ok(Group(
            g.iter()
                .map(|row| row.iter().map(|y| f(*x, *y)).collect())
                .collect(),
        )),
        (Group(g), Scalar(y)) => Ok(Group(
            g.iter()
                .map(|row| row.iter().map(|x| f(*x, *y)).collect())
                .collect(),
        )),
        (Column(c), Group(g)) => {
            let mut rows = Vec::with_capacity(g.len());
            for row in g {
                check_len(c.len(), row.len())?;
                rows.push(c.iter().zip(row).map(|(x, y)| f(*x, *y)).collect());
            }
            Ok(Group(rows))
        }
        (Group(g), Column(c)) => {
            let mut rows = Vec::with_capacity(g.len());
            for row in g {
                check_len(row.len(), c.len())?;
                rows.push(row.iter().zip(c).map(|(x, y)| f(*x, *y)).collect());
            }
            Ok(Group(rows))
        }
        (Group(l), Group(r)) => {
            check_len(l.len(), r.len())?;
            let mut rows = Vec::with_capacity(l.len());
            for (lr, rr) in l.iter().zip(r) {
                check_len(lr.len(), rr.len())?;
                rows.push(lr.iter().zip(rr).map(|(x, y)| f(*x, *y)).collect());
            }
            Ok(Group(rows))
        }
    }
}

fn check_len(a: usize, b: usize) -> std::result::Result<(), EvalFailure> {
    if a == b {
        Ok(())
    } else {
        Err(EvalFailure(format!("operand lengths differ: {a} vs {b}")))
    }
}

/// Structural operators reduce grouped payloads; on scalar and column values
/// every one of them acts as identity. `MSub`/`MDiv` only apply to groups of
/// exactly two rows.
fn apply_structural(func: StructuralFn, value: EvalValue) -> EvalResult {
    match (func, value) {
        (StructuralFn::Identity, value) => Ok(value),
        (StructuralFn::SumRows, EvalValue::Group(rows)) => {
            reduce_rows(&rows, |a, b| a + b).map(EvalValue::Column)
        }
        (StructuralFn::ProdRows, EvalValue::Group(rows)) => {
            reduce_rows(&rows, |a, b| a * b).map(EvalValue::Column)
        }
        (StructuralFn::DiffRows, EvalValue::Group(rows)) if rows.len() == 2 => {
            reduce_rows(&rows, |a, b| a - b).map(EvalValue::Column)
        }
        (StructuralFn::RatioRows, EvalValue::Group(rows)) if rows.len() == 2 => {
            reduce_rows(&rows, |a, b| a / b).map(EvalValue::Column)
        }
        (StructuralFn::Custom(f), EvalValue::Group(rows)) => Ok(EvalValue::Column(f(&rows))),
        (_, value) => Ok(value),
    }
}

fn reduce_rows(
    rows: &[Vec<f64>],
    f: fn(f64, f64) -> f64,
) -> std::result::Result<Vec<f64>, EvalFailure> {
    let mut iter = rows.iter();
    let first = iter
        .next()
        .ok_or_else(|| EvalFailure("empty feature group".to_string()))?;
    let mut acc = first.clone();
    for row in iter {
        check_len(acc.len(), row.len())?;
        for (a, v) in acc.iter_mut().zip(row) {
            *a = f(*a, *v);
        }
    }
    Ok(acc)
}

/// Flatten a finished evaluation to one prediction row of length `n`.
/// Scalars broadcast; a group that was never reduced is a failure.
pub fn to_column(value: EvalValue, n: usize) -> std::result::Result<Vec<f64>, EvalFailure> {
    match value {
        EvalValue::Scalar(v) => Ok(vec![v; n]),
        EvalValue::Column(c) => {
            check_len(c.len(), n)?;
            Ok(c)
        }
        EvalValue::Group(_) => Err(EvalFailure(
            "grouped feature was never reduced to a single row".to_string(),
        )),
    }
}

/// Combine terminal dimensions through the operators' dimension rules along
/// the compiled tree's shape.
pub fn combine_dims(expr: &CompiledExpr, set: &SymbolSet) -> Dim {
    match expr {
        CompiledExpr::Terminal(id) => set
            .def(*id)
            .dim()
            .cloned()
            .unwrap_or(Dim::Invalid),
        CompiledExpr::Call { op, args } => {
            let dims: Vec<Dim> = args.iter().map(|a| combine_dims(a, set)).collect();
            match set.def(*op) {
                NodeDef::Primitive(p) => p.dim_rule.combine(&dims),
                NodeDef::Structural(s) => s.dim_rule.combine(&dims),
                NodeDef::Terminal(_) => Dim::Invalid,
            }
        }
    }
}
