pub mod node;
pub mod primitives;
pub mod registry;

pub use node::{FeatureData, NodeDef, Primitive, PrimitiveFn, Structural, StructuralFn, SymbolId, Terminal};
pub use registry::{CompressedSymbol, CompressedSymbolSet, SymbolKind, SymbolSet};
