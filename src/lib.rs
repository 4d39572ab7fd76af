//! Typed symbolic-expression engine for genetic-programming feature search
//! over physically-dimensioned data.
//!
//! A [`SymbolSet`] registers the features, constants and operators a search
//! may draw from; [`ExprTree`]s are flattened prefix-order candidate
//! expressions; the [`CalculateEngine`] compiles trees against the registry,
//! executes them over the stored data and scores accuracy plus dimensional
//! consistency, single trees or whole populations at a time.

pub mod dim;
pub mod engines;
pub mod error;
pub mod symbols;

pub use dim::{Dim, DimRule};
pub use engines::evaluation::{
    BatchOutcome, CalculateEngine, EngineConfig, Evaluation, ScorePenalty,
};
pub use engines::generation::{gen_full, gen_grow, generate};
pub use engines::tree::{Capsule, ExprTree, TreeSignature};
pub use error::{Result, SymregError};
pub use symbols::node::{FeatureData, NodeDef, PrimitiveFn, StructuralFn, SymbolId};
pub use symbols::registry::{CompressedSymbolSet, SymbolKind, SymbolSet};
