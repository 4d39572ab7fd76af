use crate::dim::{Dim, DimRule};
use crate::error::{Result, SymregError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Index of a definition inside its owning `SymbolSet`.
///
/// Trees store these instead of names; they are only meaningful against the
/// registry that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub(crate) u32);

impl SymbolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Payload stored behind a terminal.
///
/// A `Group` holds several feature rows sharing one dimension; structural
/// operators reduce it to a single `Column` during evaluation.
#[derive(Debug, Clone)]
pub enum FeatureData {
    Scalar(f64),
    Column(Arc<Vec<f64>>),
    Group(Arc<Vec<Vec<f64>>>),
}

/// Typed function handle of a primitive, matching its declared arity.
#[derive(Debug, Clone, Copy)]
pub enum PrimitiveFn {
    Unary(fn(f64) -> f64),
    Binary(fn(f64, f64) -> f64),
    /// Arity-1 function with a fixed parameter baked in at registration
    /// (the pow family's exponent).
    UnaryParam(f64, fn(f64, f64) -> f64),
}

impl PrimitiveFn {
    pub fn arity(&self) -> usize {
        match self {
            PrimitiveFn::Unary(_) => 1,
            PrimitiveFn::Binary(_) => 2,
            PrimitiveFn::UnaryParam(..) => 1,
        }
    }
}

/// Aggregation applied by a structural operator to a whole value.
///
/// The row reductions collapse a grouped feature into one row; on scalar and
/// column values they act as identity. `Identity` is the pass-through marker
/// skipped by both renderers.
#[derive(Debug, Clone, Copy)]
pub enum StructuralFn {
    Identity,
    SumRows,
    DiffRows,
    ProdRows,
    RatioRows,
    Custom(fn(&[Vec<f64>]) -> Vec<f64>),
}

#[derive(Debug, Clone)]
pub struct Terminal {
    pub name: String,
    pub display_name: Option<String>,
    pub dim: Dim,
    pub weight: f64,
    pub data: FeatureData,
    pub is_constant: bool,
}

impl Terminal {
    /// Canonical machine name.
    pub fn format(&self) -> &str {
        &self.name
    }

    /// Human-readable name, falling back to the machine name.
    pub fn format_long(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct Primitive {
    pub name: String,
    pub arity: usize,
    pub weight: f64,
    pub func: PrimitiveFn,
    pub dim_rule: DimRule,
}

impl Primitive {
    pub fn new(
        name: &str,
        func: PrimitiveFn,
        arity: usize,
        weight: f64,
        dim_rule: DimRule,
    ) -> Result<Self> {
        if arity == 0 {
            return Err(SymregError::Configuration(format!(
                "primitive '{name}' must take at least one argument"
            )));
        }
        if arity != func.arity() {
            return Err(SymregError::Configuration(format!(
                "primitive '{name}' declares arity {arity} but its function takes {} argument(s)",
                func.arity()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            arity,
            weight,
            func,
            dim_rule,
        })
    }

    /// Render as `name(arg0, arg1, ...)`.
    pub fn format(&self, args: &[String]) -> String {
        format!("{}({})", self.name, args.join(", "))
    }
}

#[derive(Debug, Clone)]
pub struct Structural {
    pub name: String,
    pub weight: f64,
    pub func: StructuralFn,
    pub dim_rule: DimRule,
}

impl Structural {
    pub const ARITY: usize = 1;

    pub fn pass_through(&self) -> bool {
        matches!(self.func, StructuralFn::Identity)
    }

    pub fn format(&self, args: &[String]) -> String {
        format!("{}({})", self.name, args.join(", "))
    }
}

/// One registered symbol: a leaf carrying data, an operator, or a group-wise
/// structural operator. Owned by the registry; trees refer to definitions by
/// `SymbolId`.
#[derive(Debug, Clone)]
pub enum NodeDef {
    Terminal(Terminal),
    Primitive(Primitive),
    Structural(Structural),
}

impl NodeDef {
    pub fn name(&self) -> &str {
        match self {
            NodeDef::Terminal(t) => &t.name,
            NodeDef::Primitive(p) => &p.name,
            NodeDef::Structural(s) => &s.name,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            NodeDef::Terminal(_) => 0,
            NodeDef::Primitive(p) => p.arity,
            NodeDef::Structural(_) => Structural::ARITY,
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            NodeDef::Terminal(t) => t.weight,
            NodeDef::Primitive(p) => p.weight,
            NodeDef::Structural(s) => s.weight,
        }
    }

    pub fn dim(&self) -> Option<&Dim> {
        match self {
            NodeDef::Terminal(t) => Some(&t.dim),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeDef::Terminal(_))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, NodeDef::Terminal(t) if t.is_constant)
    }

    /// True for structural markers that contribute no rendered text.
    pub fn pass_through(&self) -> bool {
        matches!(self, NodeDef::Structural(s) if s.pass_through())
    }

    /// Machine rendering: terminals ignore `args`, operators interpolate them.
    pub fn format(&self, args: &[String]) -> String {
        match self {
            NodeDef::Terminal(t) => t.format().to_string(),
            NodeDef::Primitive(p) => p.format(args),
            NodeDef::Structural(s) => s.format(args),
        }
    }

    /// Display rendering: terminals show their long name, operators render
    /// the same as `format`.
    pub fn format_long(&self, args: &[String]) -> String {
        match self {
            NodeDef::Terminal(t) => t.format_long().to_string(),
            NodeDef::Primitive(p) => p.format(args),
            NodeDef::Structural(s) => s.format(args),
        }
    }
}

// Definitions are keyed by name; the registry enforces global uniqueness.
impl PartialEq for NodeDef {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for NodeDef {}

impl std::hash::Hash for NodeDef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}
